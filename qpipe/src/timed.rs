//! Read deadlines on pipe file descriptors.
//!
//! Child pipes have no `set_read_timeout`, so each read that would block is
//! preceded by `poll(2)` on the descriptor. A read that stays unready past
//! the deadline fails with [`io::ErrorKind::TimedOut`].

#![allow(unsafe_code)]

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

/// Reader whose reads fail after a configurable idle period.
#[derive(Debug)]
pub struct TimedReader<R> {
    /// Wrapped pipe.
    inner: R,
    /// `None` blocks indefinitely.
    timeout: Option<Duration>,
}

impl<R: Read + AsFd> TimedReader<R> {
    /// Wraps `inner`.
    pub const fn new(inner: R, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }

    /// Changes the deadline applied to subsequent reads.
    pub const fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}

impl<R: Read + AsFd> Read for TimedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(timeout) = self.timeout {
            wait_readable(self.inner.as_fd(), timeout)?;
        }
        self.inner.read(buf)
    }
}

/// Blocks until `fd` is readable, hung up, or `timeout` elapses.
fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        // Rounded up so poll never returns before the deadline.
        let millis = libc::c_int::try_from(remaining.as_micros().div_ceil(1000))
            .unwrap_or(libc::c_int::MAX);
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for a descriptor borrowed for this call.
        let ret = unsafe { libc::poll(&raw mut pfd, 1, millis) };
        match ret {
            // POLLHUP and POLLERR are reported here too; the read surfaces them.
            1.. => return Ok(()),
            0 if Instant::now() < deadline => {}
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data within {timeout:?}"),
                ));
            }
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn idle_pipe_times_out() {
        let (_writer, reader) = UnixStream::pair().unwrap();
        let mut timed = TimedReader::new(reader, Some(Duration::from_millis(50)));
        let started = Instant::now();
        let err = timed.read(&mut [0; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn ready_data_and_hangup_are_returned() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut timed = TimedReader::new(reader, Some(Duration::from_secs(5)));

        writer.write_all(b"OK\n").unwrap();
        let mut buf = [0; 8];
        assert_eq!(timed.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"OK\n");

        drop(writer);
        assert_eq!(timed.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn deadline_is_never_cut_short() {
        let (_writer, reader) = UnixStream::pair().unwrap();
        let mut timed = TimedReader::new(reader, None);
        for micros in [1, 999, 1_500, 20_250] {
            let timeout = Duration::from_micros(micros);
            timed.set_timeout(Some(timeout));
            let started = Instant::now();
            assert!(timed.read(&mut [0; 1]).is_err());
            assert!(started.elapsed() >= timeout, "{timeout:?}");
        }
    }

    #[test]
    fn timeout_can_be_lifted() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut timed = TimedReader::new(reader, Some(Duration::from_millis(10)));
        assert!(timed.read(&mut [0; 1]).is_err());

        timed.set_timeout(None);
        writer.write_all(b"x").unwrap();
        assert_eq!(timed.read(&mut [0; 1]).unwrap(), 1);
    }
}
