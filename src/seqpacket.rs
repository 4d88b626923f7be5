//! Minimal async `AF_UNIX`/`SOCK_SEQPACKET` socket wrapper.
//!
//! `tokio::net` has no `SOCK_SEQPACKET` type, so this wraps a raw
//! non-blocking socket (created with `nix`) in `tokio::io::unix::AsyncFd`,
//! the same readiness-driven pattern tokio itself uses internally for
//! `TcpStream`/`UnixStream`. One `send`/`recv` call is one datagram — the
//! kernel preserves message boundaries for `SOCK_SEQPACKET`, so there is no
//! length-prefix framing to do beyond the fixed header in [`crate::message`].

use std::io::{self, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{
    accept, bind, connect, getsockopt, listen, recvmsg, sendmsg, socket, sockopt::PeerCredentials,
    AddressFamily, Backlog, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
    UnixAddr, UnixCredentials,
};
use nix::sys::uio::IoSlice;
use tokio::io::unix::AsyncFd;

fn new_nonblocking_seqpacket() -> io::Result<OwnedFd> {
    Ok(socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )?)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// One connected `SOCK_SEQPACKET` endpoint, either side (client, server or
/// broker control connection).
pub struct SeqPacketConn {
    fd: AsyncFd<OwnedFd>,
}

impl SeqPacketConn {
    fn from_owned(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Wrap an fd handed off by the broker (already connected).
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Self::from_owned(fd)
    }

    pub async fn connect(path: &Path) -> io::Result<Self> {
        let raw = new_nonblocking_seqpacket()?;
        let addr = UnixAddr::new(path)?;
        match connect(raw.as_raw_fd(), &addr) {
            Ok(()) => Self::from_owned(raw),
            Err(nix::Error::EINPROGRESS) => {
                let conn = Self::from_owned(raw)?;
                conn.fd.writable().await?.retain_ready();
                Ok(conn)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn peer_credentials(&self) -> io::Result<UnixCredentials> {
        Ok(getsockopt(self.fd.get_ref(), PeerCredentials)?)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }

    /// Send one datagram, optionally carrying a single passed fd. The kernel
    /// duplicates the fd for the peer; this call does not close or consume
    /// the caller's copy.
    pub async fn send(&self, payload: &[u8], fd: Option<RawFd>) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            let iov = [IoSlice::new(payload)];
            let fds = fd.map(|fd| [fd]);
            let cmsgs: &[ControlMessage] = match &fds {
                Some(fds) => &[ControlMessage::ScmRights(fds)],
                None => &[],
            };
            let result = sendmsg::<()>(
                guard.get_ref().as_raw_fd(),
                &iov,
                cmsgs,
                MsgFlags::empty(),
                None,
            );
            match result {
                Ok(_) => return Ok(()),
                Err(nix::Error::EWOULDBLOCK) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive one datagram up to `max_len` bytes.
    ///
    /// Returns `Ok(None)` on a clean peer shutdown (a zero-length
    /// `SOCK_SEQPACKET` read), matching the "EOF closes the session" rule.
    /// At most one passed fd is kept; additional fds received in the same
    /// ancillary are closed with a warning log.
    pub async fn recv(&self, max_len: usize) -> io::Result<Option<(Vec<u8>, Option<OwnedFd>)>> {
        loop {
            let mut guard = self.fd.readable().await?;
            let mut buf = vec![0u8; max_len];
            let mut iov = [IoSliceMut::new(&mut buf)];
            let mut cmsg_space = nix::cmsg_space!([RawFd; 4]);
            let result = recvmsg::<()>(
                guard.get_ref().as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_space),
                MsgFlags::empty(),
            );
            let msg = match result {
                Ok(msg) => msg,
                Err(nix::Error::EWOULDBLOCK) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let n = msg.bytes;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);

            let mut kept_fd = None;
            for cmsg in msg.cmsgs().into_iter().flatten() {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    for raw in fds {
                        if kept_fd.is_none() {
                            kept_fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                        } else {
                            tracing::warn!(fd = raw, "closing extra fd received on one frame");
                            drop(unsafe { OwnedFd::from_raw_fd(raw) });
                        }
                    }
                }
            }
            return Ok(Some((buf, kept_fd)));
        }
    }
}

/// A bound, listening `SOCK_SEQPACKET` socket at a well-known filesystem path.
pub struct SeqPacketListener {
    fd: AsyncFd<OwnedFd>,
    path: PathBuf,
}

impl SeqPacketListener {
    pub fn bind(path: &Path) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let raw = new_nonblocking_seqpacket()?;
        let addr = UnixAddr::new(path)?;
        bind(raw.as_raw_fd(), &addr)?;
        listen(&raw, Backlog::new(128).expect("128 is a valid backlog"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666));
        }
        Ok(Self {
            fd: AsyncFd::new(raw)?,
            path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> io::Result<(SeqPacketConn, UnixCredentials)> {
        loop {
            let mut guard = self.fd.readable().await?;
            match accept(guard.get_ref().as_raw_fd()) {
                Ok(raw) => {
                    let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                    set_nonblocking(owned.as_raw_fd())?;
                    let conn = SeqPacketConn::from_owned(owned)?;
                    let creds = conn.peer_credentials()?;
                    return Ok((conn, creds));
                }
                Err(nix::Error::EWOULDBLOCK) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
