//! Socket hand-off between processes over a Unix stream (`SCM_RIGHTS`).
//!
//! Each message carries one tag byte and one descriptor. Both helpers are
//! plain non-blocking syscalls meant to be driven by
//! `tokio::net::UnixStream::async_io`, which retries on `WouldBlock`.

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::unix::io::RawFd;

/// Tag byte sent with every descriptor
const HANDOFF_TAG: u8 = b'C';

/// Send `fd` across `socket`; the receiving process gets its own duplicate
pub fn send_fd(socket: RawFd, fd: RawFd) -> io::Result<()> {
    let payload = [HANDOFF_TAG];
    let iov = [IoSlice::new(&payload)];
    let fds = [fd];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(socket, &iov, &cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)?;
    Ok(())
}

/// Receive one descriptor; `Ok(None)` means the peer closed the channel
pub fn recv_fd(socket: RawFd) -> io::Result<Option<RawFd>> {
    let mut payload = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut payload)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
        .map_err(io::Error::from)?;
    if msg.bytes == 0 {
        return Ok(None);
    }

    for cmsg in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                return Ok(Some(fd));
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "hand-off message carried no descriptor",
    ))
}
