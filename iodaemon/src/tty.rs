//! Pty allocation and file-descriptor passing over a UNIX socket.
use std::io::IoSlice;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::sys::socket::{self, UnixAddr};

use crate::error::{DaemonError, Result};

pub struct Pty {
    pub master: RawFd,
    pub slave: RawFd,
}

/// Opens a pty/tty pair. Both fds are returned with `CLOEXEC` cleared on the
/// slave so it survives into the child across `exec`.
pub fn open_pty() -> Result<Pty> {
    let result = nix::pty::openpty(None, None).map_err(DaemonError::OpenPty)?;
    let master = std::mem::ManuallyDrop::new(result.master);
    let slave = std::mem::ManuallyDrop::new(result.slave);
    Ok(Pty {
        master: master.as_raw_fd(),
        slave: slave.as_raw_fd(),
    })
}

/// Makes `fd` the calling process's controlling terminal. Must be called
/// after `setsid()` in the child, before `exec`. Returns `io::Result` rather
/// than the daemon's own error type since its only caller runs inside
/// `Command::pre_exec`, which requires that signature.
pub fn set_controlling_terminal_in_child(fd: RawFd) -> std::io::Result<()> {
    if unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub fn set_window_size(fd: RawFd, cols: u16, rows: u16) -> Result<()> {
    let winsize = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &winsize) } < 0 {
        return Err(DaemonError::SetWindowSize(nix::Error::last()));
    }
    Ok(())
}

/// Sends `fds` as ancillary data on an otherwise-empty UNIX message, in
/// order, over `socket_fd`.
pub fn send_fds(socket_fd: RawFd, fds: &[RawFd]) -> Result<()> {
    let iov = [IoSlice::new(&[0u8])];
    let cmsg = socket::ControlMessage::ScmRights(fds);
    socket::sendmsg::<UnixAddr>(socket_fd, &iov, &[cmsg], socket::MsgFlags::empty(), None)
        .map_err(DaemonError::SendFds)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::fd::FromRawFd;
    use std::os::unix::net::{UnixListener, UnixStream};

    #[test]
    fn open_pty_returns_distinct_fds() {
        let pty = open_pty().unwrap();
        assert_ne!(pty.master, pty.slave);
        unsafe {
            libc::close(pty.master);
            libc::close(pty.slave);
        }
    }

    #[test]
    fn send_fds_delivers_ancillary_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();

        let sender = UnixStream::connect(&path).unwrap();
        let (receiver, _addr) = listener.accept().unwrap();

        let dummy_a = nix::unistd::dup(std::io::stdin().as_raw_fd()).unwrap();
        let dummy_b = nix::unistd::dup(std::io::stdin().as_raw_fd()).unwrap();
        send_fds(sender.as_raw_fd(), &[dummy_a, dummy_b]).unwrap();

        let mut cmsg_buf = nix::cmsg_space!([RawFd; 2]);
        let mut data_buf = [0u8; 1];
        let mut iov = [std::io::IoSliceMut::new(&mut data_buf)];
        let msg = socket::recvmsg::<()>(
            receiver.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            socket::MsgFlags::empty(),
        )
        .unwrap();

        let mut received = Vec::new();
        for cmsg in msg.cmsgs().unwrap() {
            if let socket::ControlMessageOwned::ScmRights(fds) = cmsg {
                received.extend(fds);
            }
        }
        assert_eq!(received.len(), 2);

        unsafe {
            libc::close(dummy_a);
            libc::close(dummy_b);
            for fd in received {
                libc::close(fd);
            }
        }
    }

    use std::os::fd::IntoRawFd;

    #[test]
    fn reader_sees_eof_after_fds_only_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();

        let sender = UnixStream::connect(&path).unwrap();
        let (receiver, _addr) = listener.accept().unwrap();
        let fd = nix::unistd::dup(std::io::stdin().as_raw_fd()).unwrap();
        send_fds(sender.as_raw_fd(), &[fd]).unwrap();
        drop(sender);

        let mut receiver = unsafe { std::fs::File::from_raw_fd(receiver.into_raw_fd()) };
        let mut buf = [0u8; 8];
        let n = receiver.read(&mut buf).unwrap();
        assert_eq!(n, 1);

        unsafe {
            libc::close(fd);
        }
    }
}
