//! UDP transports for the DHCP operators.
//!
//! Messages are built and parsed with `dhcproto`. Each exchange opens a
//! fresh socket bound to the client port on one link (`SO_BINDTODEVICE`),
//! so several links can run clients side by side.

mod v4;
mod v6;

pub use v4::Udp4Transport;
pub use v6::Udp6Transport;

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use tokio::net::UdpSocket;

/// Default time allowed for one full exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest datagram read from the client socket.
const MAX_DATAGRAM: usize = 1500;

fn set_int_option(fd: &OwnedFd, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // SAFETY: `value` lives across the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_to_device(fd: &OwnedFd, link: &str) -> io::Result<()> {
    let name = link.as_bytes();
    // SAFETY: the kernel copies at most `name.len()` bytes from the slice.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr() as *const libc::c_void,
            name.len() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind(fd: &OwnedFd, addr: SocketAddr) -> io::Result<()> {
    let rc = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: `sin` is a fully initialised sockaddr_in of the given size.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: `sin6` is a fully initialised sockaddr_in6 of the given size.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Open a non-blocking UDP socket on `link`, bound to `addr`.
pub(crate) fn client_socket(link: &str, addr: SocketAddr, broadcast: bool) -> io::Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    // SAFETY: socket(2) has no memory preconditions.
    let raw = unsafe {
        libc::socket(
            domain,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::IPPROTO_UDP,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_int_option(&fd, libc::SO_REUSEADDR, 1)?;
    if broadcast {
        set_int_option(&fd, libc::SO_BROADCAST, 1)?;
    }
    bind_to_device(&fd, link)?;
    bind(&fd, addr)?;

    UdpSocket::from_std(std::net::UdpSocket::from(fd))
}

/// Decode an uncompressed DNS wire-format name into its labels.
pub(crate) fn dns_labels(mut data: &[u8]) -> Option<Vec<String>> {
    let mut labels = Vec::new();
    while let Some((&len, rest)) = data.split_first() {
        if len == 0 {
            break;
        }
        let len = usize::from(len);
        if len > 63 || rest.len() < len {
            return None;
        }
        labels.push(String::from_utf8_lossy(&rest[..len]).into_owned());
        data = &rest[len..];
    }
    Some(labels)
}
