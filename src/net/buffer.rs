use crate::error::BenchError;

/// Byte used to fill outgoing payloads.
pub const PAYLOAD_FILL: u8 = b'Z';

/// Fixed-size payload reused for every send or receive call on one connection.
///
/// Allocation is fallible so that memory exhaustion while dispatching a new
/// connection is reported instead of aborting the whole process.
#[derive(Debug)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
}

impl TransferBuffer {
    /// Allocate `size` bytes, each set to `fill`.
    pub fn try_new(size: usize, fill: u8) -> Result<Self, BenchError> {
        if size == 0 {
            return Err(BenchError::InvalidArgs(
                "transfer buffer size must be positive".to_string(),
            ));
        }
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| BenchError::Allocation { size })?;
        bytes.resize(size, fill);
        Ok(Self { bytes })
    }

    /// A payload buffer for the sending side.
    pub fn payload(size: usize) -> Result<Self, BenchError> {
        Self::try_new(size, PAYLOAD_FILL)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
