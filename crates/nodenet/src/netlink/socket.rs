//! Non-blocking `NETLINK_ROUTE` socket driven by the tokio reactor.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// Large enough for one dump datagram at the kernel's default page size.
const RECV_BUFFER: usize = 32 * 1024;

pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    /// Port id the kernel bound us to.
    pid: u32,
}

impl NetlinkSocket {
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_ROUTE)?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;

        // Not every kernel has extended ACKs.
        let _ = socket.set_ext_ack(true);

        Ok(Self {
            pid: addr.port_number(),
            fd: AsyncFd::new(socket)?,
            seq: AtomicU32::new(1),
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Retry `op` whenever the reactor reports readiness but the call would
    /// still block.
    async fn io<T>(
        &self,
        interest: Interest,
        mut op: impl FnMut(&Socket) -> io::Result<T>,
    ) -> Result<T> {
        loop {
            let mut guard = self.fd.ready(interest).await?;
            if let Ok(result) = guard.try_io(|fd| op(fd.get_ref())) {
                return Ok(result?);
            }
        }
    }

    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        self.io(Interest::WRITABLE, |socket| socket.send(msg, 0))
            .await
            .map(drop)
    }

    /// Receive one datagram.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_BUFFER);
        self.io(Interest::READABLE, |socket| socket.recv(&mut buf, 0))
            .await?;
        Ok(buf.to_vec())
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
