use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// I/O readiness layer backed by `poll(2)`.
///
/// Each tick hands the driver the current read- and write-watcher fd sets
/// and a timeout derived from the earliest pending timer; the driver blocks
/// in a single `poll(2)` call and reports which streams are ready in each
/// direction.
pub(crate) struct Driver {
    /// Reused backing buffer for the `pollfd` array, write entries first.
    fds: Vec<libc::pollfd>,
}

/// Streams reported ready by one readiness wait.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    /// Ready write-watcher streams, processed before reads.
    pub(crate) writable: Vec<RawFd>,
    /// Ready read-watcher streams.
    pub(crate) readable: Vec<RawFd>,
}

impl Driver {
    /// Creates a new `Driver` instance.
    pub(crate) fn new() -> Self {
        Driver { fds: Vec::new() }
    }

    /// Waits for readiness on the given fd sets, blocking until either a
    /// stream delivers an event, the call is interrupted by a signal
    /// handler, or the timeout expires.
    ///
    /// `timeout` of `None` blocks indefinitely. A `Some` timeout is rounded
    /// up to the next millisecond so a timer never fires early out of a
    /// truncated wait.
    pub(crate) fn select(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: Option<Duration>,
    ) -> io::Result<Readiness> {
        self.fds.clear();
        for &fd in write {
            self.fds.push(libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            });
        }
        for &fd in read {
            self.fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }

        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(duration) => {
                let mut ms = duration.as_millis();
                if Duration::from_millis(ms as u64) < duration {
                    ms += 1;
                }
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let ready = unsafe {
            // Returns 0 if no file descriptors became ready during the
            // timeout duration.
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ready == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut readiness = Readiness::default();
        if ready == 0 {
            return Ok(readiness);
        }

        for pollfd in &self.fds {
            // Error and hang-up conditions are delivered through `revents`
            // regardless of the requested events; they count as readiness so
            // the subsequent read or write attempt can observe the failure.
            if pollfd.revents == 0 {
                continue;
            }

            if pollfd.events == libc::POLLOUT {
                readiness.writable.push(pollfd.fd);
            } else {
                readiness.readable.push(pollfd.fd);
            }
        }

        Ok(readiness)
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("capacity", &self.fds.capacity())
            .finish()
    }
}
