use super::worker::ChunkSource;
use super::zerocopy::{self, SendPath};
use super::ConnectionId;
use async_trait::async_trait;
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tracing::debug;

/// One live TCP connection, owned by exactly one worker.
///
/// Dropping the handle shuts the connection down in both directions and then
/// closes the descriptor, so release happens once on every exit path.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self { id, peer, stream }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Apply SO_SNDBUF / SO_RCVBUF to the connection.
    pub fn set_buffer_sizes(&self, size: usize) -> io::Result<()> {
        let socket = SockRef::from(&self.stream);
        socket.set_send_buffer_size(size)?;
        socket.set_recv_buffer_size(size)?;
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        match SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            Ok(()) => debug!("Connection {} to {} shut down", self.id, self.peer),
            // The peer may already have torn the connection down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!("Shutdown of connection {} failed: {}", self.id, e),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

#[async_trait]
impl SendPath for Connection {
    async fn send_zero_copy(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let fd = self.raw_fd();
        loop {
            self.stream.writable().await?;
            match self
                .stream
                .try_io(Interest::WRITABLE, || zerocopy::sendmsg_zerocopy(fd, chunk))
            {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_copy(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.stream.write(chunk).await
    }

    fn enable_zero_copy(&mut self) -> io::Result<()> {
        zerocopy::enable_socket_zerocopy(self.raw_fd())
    }

    fn reap_completions(&mut self) -> io::Result<usize> {
        zerocopy::drain_error_queue(self.raw_fd())
    }
}

#[async_trait]
impl ChunkSource for Connection {
    async fn recv_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }
}
