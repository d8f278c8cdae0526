//! Socket surface
//!
//! `Socket` wraps a non-blocking, close-on-exec descriptor together
//! with its kind and address. Every blocking-looking method suspends
//! the calling frame: the operation goes through the backend when it
//! advertises the capability, or through the non-blocking
//! syscall + yield fallback otherwise.

use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use strand_aio::sys;
use strand_core::{CompletionResult, Error, Op, Result, SockAddr};

use crate::runtime::Runtime;

/// Where a socket lives.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Udp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }
}

/// Socket flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
    Unix,
}

/// A non-blocking socket bound to its endpoint address.
pub struct Socket {
    kind: SocketKind,
    fd: RawFd,
    addr: SockAddr,
}

impl Socket {
    /// Construct a non-blocking, close-on-exec socket for `endpoint`.
    ///
    /// TCP/UDP endpoints get the strongest available reuse option
    /// (`SO_REUSEPORT_LB` where the platform has it, else
    /// `SO_REUSEPORT`, else `SO_REUSEADDR`) so `auto`-mode runtimes can
    /// share a listening port. Unix sockets never get reuse options.
    pub fn init(endpoint: &Endpoint) -> Result<Socket> {
        let (kind, addr, sock_type) = match endpoint {
            Endpoint::Tcp { host, port } => {
                (SocketKind::Tcp, resolve(host, *port)?, libc::SOCK_STREAM)
            }
            Endpoint::Udp { host, port } => {
                (SocketKind::Udp, resolve(host, *port)?, libc::SOCK_DGRAM)
            }
            Endpoint::Unix { path } => (SocketKind::Unix, unix_addr(path)?, libc::SOCK_STREAM),
        };

        let domain = match kind {
            SocketKind::Unix => libc::AF_UNIX,
            _ => addr.family() as libc::c_int,
        };
        let fd = unsafe {
            libc::socket(
                domain,
                sock_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if fd < 0 {
            return Err(Error::from_errno(sys::last_errno()));
        }

        let socket = Socket { kind, fd, addr };
        if kind != SocketKind::Unix {
            socket.set_reuse();
        }
        Ok(socket)
    }

    /// Strongest available address-reuse option; failures cascade to
    /// the next weaker one.
    fn set_reuse(&self) {
        let one: libc::c_int = 1;
        let optlen = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

        #[cfg(target_os = "freebsd")]
        {
            let ret = unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEPORT_LB,
                    &one as *const _ as *const libc::c_void,
                    optlen,
                )
            };
            if ret == 0 {
                return;
            }
        }

        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &one as *const _ as *const libc::c_void,
                optlen,
            )
        };
        if ret != 0 {
            unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEADDR,
                    &one as *const _ as *const libc::c_void,
                    optlen,
                )
            };
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bind to the endpoint address given at `init`.
    pub fn bind(&self) -> Result<()> {
        let ret = unsafe { libc::bind(self.fd, self.addr.as_ptr(), self.addr.len) };
        if ret != 0 {
            return Err(Error::from_errno(sys::last_errno()));
        }
        Ok(())
    }

    /// Start listening. Only stream kinds are listenable.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        if self.kind == SocketKind::Udp {
            return Err(Error::OperationNotSupported);
        }
        let ret = unsafe { libc::listen(self.fd, backlog) };
        if ret != 0 {
            return Err(Error::from_errno(sys::last_errno()));
        }
        Ok(())
    }

    /// The local address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SockAddr> {
        let mut out = SockAddr::zeroed();
        let ret = unsafe { libc::getsockname(self.fd, out.as_mut_ptr(), &mut out.len) };
        if ret != 0 {
            return Err(Error::from_errno(sys::last_errno()));
        }
        Ok(out)
    }

    /// The bound TCP/UDP port.
    pub fn local_port(&self) -> Result<u16> {
        let addr = self.local_addr()?;
        match addr.family() as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(addr.as_ptr() as *const libc::sockaddr_in) };
                Ok(u16::from_be(sin.sin_port))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(addr.as_ptr() as *const libc::sockaddr_in6) };
                Ok(u16::from_be(sin6.sin6_port))
            }
            _ => Err(Error::OperationNotSupported),
        }
    }

    /// Accept one connection, suspending the frame until a peer
    /// arrives. Handshakes that die in the kernel queue are retried,
    /// not surfaced.
    pub fn accept(&self, rt: &Runtime) -> Result<Socket> {
        loop {
            let result = rt.io_run(Op::Accept {
                fd: self.fd,
                addr: Box::new(SockAddr::zeroed()),
            })?;
            match result {
                CompletionResult::Socket { fd, addr } => {
                    set_nonblocking(fd)?;
                    return Ok(Socket {
                        kind: self.kind,
                        fd,
                        addr,
                    });
                }
                CompletionResult::Value(v) if v < 0 => match Error::from_neg(v) {
                    // Peer gave up between kernel queue and accept.
                    Error::Closed => continue,
                    Error::Unexpected(libc::EINVAL) => return Err(Error::NotListening),
                    e => return Err(e),
                },
                CompletionResult::Timeout => return Err(Error::Timeout),
                other => {
                    log::warn!("accept produced unexpected completion {:?}", other);
                    return Err(Error::Unexpected(libc::EIO));
                }
            }
        }
    }

    /// Connect to the endpoint address, suspending until the handshake
    /// resolves.
    pub fn connect(&self, rt: &Runtime) -> Result<()> {
        rt.io_run(Op::Connect {
            fd: self.fd,
            addr: Box::new(self.addr),
        })?
        .into_void()
    }

    /// Receive up to `buf.len()` bytes. `Ok(0)` is orderly peer
    /// shutdown; an abortive reset surfaces as `Closed`.
    pub fn recv(&self, rt: &Runtime, buf: &mut [u8]) -> Result<usize> {
        let result = rt.io_run(Op::Recv {
            fd: self.fd,
            buf: buf.as_mut_ptr(),
            len: buf.len(),
        })?;
        result.into_value().map(|v| v as usize)
    }

    /// Send up to `buf.len()` bytes.
    pub fn send(&self, rt: &Runtime, buf: &[u8]) -> Result<usize> {
        let result = rt.io_run(Op::Send {
            fd: self.fd,
            buf: buf.as_ptr(),
            len: buf.len(),
        })?;
        result.into_value().map(|v| v as usize)
    }

    /// Receive exactly `buf.len()` bytes, or fewer if the peer closes
    /// partway: a `Closed` condition returns the partial count rather
    /// than failing.
    pub fn recv_all(&self, rt: &Runtime, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.recv(rt, &mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.is_closed() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Send all of `buf`, or as much as the peer accepted before
    /// closing: a `Closed` condition returns the partial count.
    pub fn send_all(&self, rt: &Runtime, buf: &[u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.send(rt, &buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.is_closed() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Close through the runtime, suspending until done.
    pub fn close(self, rt: &Runtime) -> Result<()> {
        let fd = self.fd;
        std::mem::forget(self);
        rt.io_run(Op::Close { fd })?.into_void()
    }

    /// Synchronous close, safe from any context including clean-up
    /// paths after a frame has failed. Errors are ignored; the
    /// descriptor is gone either way.
    pub fn close_blocking(self) {
        let fd = self.fd;
        std::mem::forget(self);
        unsafe { libc::close(fd) };
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

/// Parse a literal IP, falling back to system resolution.
fn resolve(host: &str, port: u16) -> Result<SockAddr> {
    use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

    let sa: SocketAddr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Unexpected(e.raw_os_error().unwrap_or(libc::EADDRNOTAVAIL)))?
            .next()
            .ok_or(Error::Unexpected(libc::EADDRNOTAVAIL))?,
    };
    Ok(encode(sa))
}

/// Encode a std SocketAddr into kernel form.
fn encode(sa: std::net::SocketAddr) -> SockAddr {
    match sa {
        std::net::SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            unsafe {
                SockAddr::from_raw(
                    &sin as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        std::net::SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            unsafe {
                SockAddr::from_raw(
                    &sin6 as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    }
}

/// Encode a filesystem path into sockaddr_un form.
fn unix_addr(path: &Path) -> Result<SockAddr> {
    let bytes = path.as_os_str().as_bytes();
    let mut sun: libc::sockaddr_un = unsafe { std::mem::zeroed() };

    if bytes.len() >= sun.sun_path.len() {
        return Err(Error::Unexpected(libc::ENAMETOOLONG));
    }
    sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            sun.sun_path.as_mut_ptr() as *mut u8,
            bytes.len(),
        );
    }

    // family + path + trailing NUL
    let len = std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok(unsafe {
        SockAddr::from_raw(
            &sun as *const _ as *const libc::sockaddr,
            len as libc::socklen_t,
        )
    })
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::from_errno(sys::last_errno()));
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(Error::from_errno(sys::last_errno()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tcp_literal() {
        let s = Socket::init(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
        assert_eq!(s.kind(), SocketKind::Tcp);
        assert!(s.fd() >= 0);
    }

    #[test]
    fn test_bind_listen_resolves_port() {
        let s = Socket::init(&Endpoint::tcp("0.0.0.0", 0)).unwrap();
        s.bind().unwrap();
        s.listen(8).unwrap();
        assert_ne!(s.local_port().unwrap(), 0);
    }

    #[test]
    fn test_udp_cannot_listen() {
        let s = Socket::init(&Endpoint::udp("127.0.0.1", 0)).unwrap();
        s.bind().unwrap();
        assert_eq!(s.listen(8), Err(Error::OperationNotSupported));
    }

    #[test]
    fn test_init_ipv6_literal() {
        let s = Socket::init(&Endpoint::tcp("::1", 0)).unwrap();
        s.bind().unwrap();
        s.listen(1).unwrap();
        assert_ne!(s.local_port().unwrap(), 0);
    }

    #[test]
    fn test_unix_path_too_long_rejected() {
        let long = "x".repeat(200);
        match Socket::init(&Endpoint::unix(long)) {
            Err(Error::Unexpected(e)) => assert_eq!(e, libc::ENAMETOOLONG),
            other => panic!("expected ENAMETOOLONG, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unix_socket_binds_path() {
        let dir = std::env::temp_dir().join(format!("strand-net-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sock");
        let _ = std::fs::remove_file(&path);

        let s = Socket::init(&Endpoint::unix(&path)).unwrap();
        s.bind().unwrap();
        s.listen(1).unwrap();
        assert!(path.exists());

        drop(s);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}
