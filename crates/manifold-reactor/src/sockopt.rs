//! Socket option plumbing
//!
//! Applied by the distribution layer to every channel before it is handed
//! to a worker, mirroring the configured `ReactorConfig` options onto the
//! socket. The session idle timeout is reactor bookkeeping and is never
//! pushed down to the OS socket.

use std::io;
use std::mem;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::config::ReactorConfig;

pub(crate) fn prepare_socket(socket: &TcpStream, config: &ReactorConfig) -> io::Result<()> {
    socket.set_nodelay(config.tcp_nodelay)?;
    let fd = socket.as_raw_fd();
    set_int(
        fd,
        libc::SOL_SOCKET,
        libc::SO_KEEPALIVE,
        config.so_keepalive as libc::c_int,
    )?;
    if let Some(linger) = config.so_linger {
        set_linger(fd, linger)?;
    }
    if config.snd_buf_size > 0 {
        set_int(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            config.snd_buf_size as libc::c_int,
        )?;
    }
    if config.rcv_buf_size > 0 {
        set_int(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            config.rcv_buf_size as libc::c_int,
        )?;
    }
    Ok(())
}

fn set_int(fd: RawFd, level: libc::c_int, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_linger(fd: RawFd, linger: Duration) -> io::Result<()> {
    let value = libc::linger {
        l_onoff: 1,
        l_linger: linger.as_secs() as libc::c_int,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &value as *const libc::linger as *const libc::c_void,
            mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
