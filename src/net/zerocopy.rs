//! # Zero-Copy Send Strategy
//!
//! Wraps a connection's two send primitives: `sendmsg(MSG_ZEROCOPY)` and the
//! plain copying write. The zero-copy path is attempted first while it is
//! enabled. The first time the kernel reports it as unsupported or denied, the
//! strategy disables it for good and re-sends the same chunk through the
//! copying path within the same call, so the byte stream never stalls and no
//! chunk is counted twice.
//!
//! ## Outcome Handling
//!
//! | zero-copy result                               | action                        |
//! |------------------------------------------------|-------------------------------|
//! | `n` bytes                                      | report `n`, stay enabled      |
//! | `EINVAL`, `EOPNOTSUPP`, `EPERM`, `ENOPROTOOPT` | disable, copy-send same chunk |
//! | `EINTR`                                        | retry the same chunk          |
//! | `ENOBUFS`                                      | reap completions, retry       |
//! | anything else                                  | worker-level send error       |
//!
//! Enabling `SO_ZEROCOPY` makes the kernel queue a completion notification on
//! the socket error queue for every zero-copy send. Those notifications are
//! drained after each flushed buffer, and whenever the kernel refuses a send
//! with `ENOBUFS` because they piled up. If nothing could be reaped, the retry
//! waits briefly so the kernel can post completions.

use super::worker::{ChunkSink, SendProgress};
use crate::cli::SendMode;
use async_trait::async_trait;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Back-off while the socket's option memory is held by unreaped zero-copy
/// completions.
const OPTMEM_BACKOFF: Duration = Duration::from_millis(1);

/// Worker-local zero-copy capability. Only ever moves from `Enabled` to
/// `Disabled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroCopyState {
    Enabled,
    Disabled,
}

impl ZeroCopyState {
    pub fn for_mode(mode: SendMode) -> Self {
        match mode {
            SendMode::ZeroCopy => ZeroCopyState::Enabled,
            SendMode::Copy => ZeroCopyState::Disabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == ZeroCopyState::Enabled
    }

    /// Permanently disable zero-copy. Returns true if this call made the
    /// transition.
    fn disable(&mut self) -> bool {
        let was_enabled = self.is_enabled();
        *self = ZeroCopyState::Disabled;
        was_enabled
    }
}

/// How a failed zero-copy send is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZeroCopyFailure {
    /// Kernel or privileges do not allow zero-copy; fall back to copying
    Unsupported,
    /// Interrupted system call; retry the same chunk
    Interrupted,
    /// Completion notifications exhausted socket option memory; reap, then
    /// retry the same chunk
    OptmemExhausted,
    /// Real transport error; end the worker
    Fatal,
}

pub fn classify_zero_copy_error(err: &io::Error) -> ZeroCopyFailure {
    if err.kind() == io::ErrorKind::Interrupted {
        return ZeroCopyFailure::Interrupted;
    }
    if is_optmem_exhausted(err) {
        return ZeroCopyFailure::OptmemExhausted;
    }
    if err.kind() == io::ErrorKind::Unsupported {
        return ZeroCopyFailure::Unsupported;
    }
    match err.raw_os_error().map(Errno::from_raw) {
        Some(Errno::EINVAL | Errno::EOPNOTSUPP | Errno::EPERM | Errno::ENOPROTOOPT) => {
            ZeroCopyFailure::Unsupported
        }
        _ => ZeroCopyFailure::Fatal,
    }
}

/// True when a zero-copy send was refused because completion notifications
/// exhausted the socket's option memory.
pub fn is_optmem_exhausted(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOBUFS)
}

/// The send primitives of one connection.
#[async_trait]
pub trait SendPath: Send {
    /// Send via the zero-copy path. May return a partial count.
    async fn send_zero_copy(&mut self, chunk: &[u8]) -> io::Result<usize>;

    /// Send via a plain copying write. May return a partial count.
    async fn send_copy(&mut self, chunk: &[u8]) -> io::Result<usize>;

    /// Opt the socket in to zero-copy transmission.
    fn enable_zero_copy(&mut self) -> io::Result<()>;

    /// Drain pending zero-copy completion notifications, returning how many
    /// were consumed.
    fn reap_completions(&mut self) -> io::Result<usize>;
}

/// Send strategy holding the connection and its zero-copy state.
pub struct SendStrategy<P> {
    path: P,
    state: ZeroCopyState,
    completions: u64,
}

impl<P: SendPath> SendStrategy<P> {
    pub fn new(mut path: P, mode: SendMode) -> Self {
        let mut state = ZeroCopyState::for_mode(mode);
        if state.is_enabled() {
            if let Err(e) = path.enable_zero_copy() {
                match classify_zero_copy_error(&e) {
                    ZeroCopyFailure::Unsupported => {
                        info!("Zero-copy unavailable ({}), using copying sends", e)
                    }
                    _ => warn!("Enabling zero-copy failed ({}), using copying sends", e),
                }
                state.disable();
            }
        }
        Self {
            path,
            state,
            completions: 0,
        }
    }

    pub fn state(&self) -> ZeroCopyState {
        self.state
    }

    /// Zero-copy completion notifications reaped so far.
    pub fn completions(&self) -> u64 {
        self.completions
    }

    pub fn path(&self) -> &P {
        &self.path
    }

    /// Make room on the error queue after an `ENOBUFS` refusal.
    async fn release_optmem(&mut self) -> io::Result<()> {
        let reaped = self.path.reap_completions()?;
        self.completions += reaped as u64;
        trace!("Option memory exhausted, reaped {} completions", reaped);
        if reaped == 0 {
            tokio::time::sleep(OPTMEM_BACKOFF).await;
        }
        Ok(())
    }

    async fn send_copy(&mut self, chunk: &[u8]) -> io::Result<SendProgress> {
        match self.path.send_copy(chunk).await {
            Ok(n) => Ok(SendProgress::Sent(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(SendProgress::Retry),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<P: SendPath> ChunkSink for SendStrategy<P> {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<SendProgress> {
        if self.state.is_enabled() {
            match self.path.send_zero_copy(chunk).await {
                Ok(n) => return Ok(SendProgress::Sent(n)),
                Err(e) => match classify_zero_copy_error(&e) {
                    ZeroCopyFailure::Unsupported => {
                        if self.state.disable() {
                            warn!("Zero-copy send rejected ({}), falling back to copying sends", e);
                        }
                    }
                    ZeroCopyFailure::Interrupted => return Ok(SendProgress::Retry),
                    ZeroCopyFailure::OptmemExhausted => {
                        self.release_optmem().await?;
                        return Ok(SendProgress::Retry);
                    }
                    ZeroCopyFailure::Fatal => return Err(e),
                },
            }
        }
        self.send_copy(chunk).await
    }

    fn buffer_flushed(&mut self) {
        if !self.state.is_enabled() {
            return;
        }
        match self.path.reap_completions() {
            Ok(reaped) => self.completions += reaped as u64,
            Err(e) => debug!("Reaping zero-copy completions failed: {}", e),
        }
    }
}

/// `sendmsg(2)` a single chunk with `MSG_ZEROCOPY`.
///
/// `MSG_NOSIGNAL` keeps a vanished peer from raising SIGPIPE; it surfaces as
/// `EPIPE` instead.
#[cfg(target_os = "linux")]
pub fn sendmsg_zerocopy(fd: RawFd, chunk: &[u8]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: chunk.as_ptr() as *mut libc::c_void,
        iov_len: chunk.len(),
    };
    // SAFETY: an all-zero msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    // SAFETY: `msg` points at one iovec covering `chunk`, which outlives the
    // call; the kernel pins the pages itself for zero-copy transmission.
    let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_ZEROCOPY | libc::MSG_NOSIGNAL) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn sendmsg_zerocopy(_fd: RawFd, _chunk: &[u8]) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Set `SO_ZEROCOPY` on the socket.
#[cfg(target_os = "linux")]
pub fn enable_socket_zerocopy(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    // SAFETY: option value is a live c_int of the advertised length.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ZEROCOPY,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn enable_socket_zerocopy(_fd: RawFd) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Consume every queued message on the socket error queue without blocking.
#[cfg(target_os = "linux")]
pub fn drain_error_queue(fd: RawFd) -> io::Result<usize> {
    let mut drained = 0;
    loop {
        let mut control = [0u8; 128];
        // SAFETY: an all-zero msghdr is a valid empty header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.len() as _;

        // SAFETY: `msg` only references `control`, which outlives the call.
        let rc = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT) };
        if rc >= 0 {
            drained += 1;
            continue;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(drained),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn drain_error_queue(_fd: RawFd) -> io::Result<usize> {
    Ok(0)
}
