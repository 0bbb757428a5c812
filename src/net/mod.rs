//! Connection plumbing shared by the server and the client: the owned
//! connection handle, the transfer buffer, the send strategies and the timed
//! transfer loops.

pub mod buffer;
pub mod connection;
pub mod worker;
pub mod zerocopy;

pub use buffer::TransferBuffer;
pub use connection::Connection;
pub use worker::{ChunkSink, ChunkSource, LoopResult, SendProgress, WorkerExit, WorkerReport};
pub use zerocopy::{SendPath, SendStrategy, ZeroCopyState};

/// Identifier of one accepted or connected transport connection
pub type ConnectionId = u64;
