//! Non-blocking TCP connect.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, SockaddrStorage};

/// Opens a non-blocking socket and starts connecting it to `addr`.
///
/// The returned stream is usually still connecting; watch it for
/// writability and then call [`poll_connected`].
pub fn connect_nonblocking(addr: SocketAddr) -> io::Result<TcpStream> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket(
        family,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )?;

    match connect(fd.as_raw_fd(), &SockaddrStorage::from(addr)) {
        Ok(()) | Err(Errno::EINPROGRESS) => {}
        Err(errno) => return Err(errno.into()),
    }

    Ok(TcpStream::from(fd))
}

/// Checks a connect started by [`connect_nonblocking`].
///
/// Returns `Ok(false)` while the connect is still in progress.
///
/// # Errors
///
/// Returns the error the connect attempt failed with.
pub fn poll_connected(stream: &TcpStream) -> io::Result<bool> {
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_connects_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = connect_nonblocking(addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !poll_connected(&stream).unwrap() {
            assert!(Instant::now() < deadline, "connect never completed");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[test]
    fn test_refused_connect_reports_error() {
        // Bind then drop to get a port with nothing listening
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let outcome = match connect_nonblocking(addr) {
            Err(e) => Err(e),
            Ok(stream) => loop {
                match poll_connected(&stream) {
                    Ok(false) => {
                        assert!(Instant::now() < deadline, "connect never failed");
                        thread::sleep(Duration::from_millis(5));
                    }
                    other => break other,
                }
            },
        };
        assert!(outcome.is_err());
    }
}
