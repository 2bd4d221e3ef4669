use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Datagram endpoint used by a transfer session
///
/// Receive timeouts must surface as `io::ErrorKind::WouldBlock` or
/// `io::ErrorKind::TimedOut`, which is what `UdpSocket` reports depending on
/// the platform.
pub trait Socket {
    fn send_to(&self, buf: &[u8], to: &SocketAddr) -> io::Result<()>;

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()>;
}

impl Socket for UdpSocket {
    fn send_to(&self, buf: &[u8], to: &SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, buf, to).map(|_| ())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, Some(timeout))
    }
}

pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl<T: Socket + ?Sized> Socket for &T {
    fn send_to(&self, buf: &[u8], to: &SocketAddr) -> io::Result<()> {
        (**self).send_to(buf, to)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf)
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}
