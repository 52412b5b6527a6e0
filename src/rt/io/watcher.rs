use std::io;
use std::os::unix::io::RawFd;

use crate::error::Error;
use crate::net::Stream;
use crate::rt::io::IO_CHUNK;
use crate::rt::slot::Slot;
use crate::rt::task::TaskId;

/// One in-flight I/O operation: a stream, the task suspended on it, a byte
/// buffer, and a progress integer.
///
/// For writes (`Watcher<()>`) the buffer holds the outgoing bytes and
/// `count` is the write offset; for reads (`Watcher<Vec<u8>>`) the buffer
/// accumulates received bytes and `count` is the byte cap. Watchers are
/// immutable once constructed; progress produces a replacement value via
/// [`Watcher::advanced`] or [`Watcher::grown`], so a suspended task can
/// never alias a watcher the scheduler is still updating.
#[derive(Debug)]
pub(crate) struct Watcher<T> {
    stream: Stream,
    task: TaskId,
    buffer: Vec<u8>,
    count: usize,
    slot: Slot<T>,
}

impl<T> Watcher<T> {
    pub(crate) fn new(
        stream: Stream,
        task: TaskId,
        buffer: Vec<u8>,
        count: usize,
        slot: Slot<T>,
    ) -> Self {
        Watcher {
            stream,
            task,
            buffer,
            count,
            slot,
        }
    }

    /// The watched stream's descriptor; the watcher-map key.
    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.stream.fd()
    }

    /// The task suspended on this operation.
    #[inline]
    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    /// The watched stream.
    #[inline]
    pub(crate) fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Whether this watcher belongs to the given task's execution.
    #[inline]
    pub(crate) fn belongs_to(&self, id: TaskId) -> bool {
        self.task == id
    }

    /// Resumes the suspended task with a payload.
    pub(crate) fn resolve(self, value: T) {
        self.slot.fill(Ok(value));
    }

    /// Raises a failure at the suspended task's suspension point.
    pub(crate) fn fail(self, error: Error) {
        self.slot.fill(Err(error));
    }
}

impl Watcher<()> {
    /// Attempts to write the next chunk, at most [`IO_CHUNK`] bytes past the
    /// current offset.
    pub(crate) fn write_chunk(&self) -> io::Result<usize> {
        let end = usize::min(self.count + IO_CHUNK, self.buffer.len());
        self.stream.write(&self.buffer[self.count..end])
    }

    /// Whether writing `written` more bytes delivers the whole buffer.
    #[inline]
    pub(crate) fn finished_after(&self, written: usize) -> bool {
        self.count + written >= self.buffer.len()
    }

    /// Replacement watcher with the offset advanced by `written`.
    pub(crate) fn advanced(self, written: usize) -> Self {
        Watcher {
            count: self.count + written,
            ..self
        }
    }
}

impl Watcher<Vec<u8>> {
    /// Attempts to read the next chunk from the stream into `buf`.
    pub(crate) fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Replacement watcher with `chunk` appended to the accumulated buffer.
    /// The byte cap is unchanged.
    pub(crate) fn grown(mut self, chunk: &[u8]) -> Self {
        self.buffer.extend_from_slice(chunk);
        self
    }

    /// Whether the accumulated bytes exceed the byte cap.
    #[inline]
    pub(crate) fn over_cap(&self) -> bool {
        self.buffer.len() > self.count
    }

    /// Resumes the suspended task with the accumulated bytes.
    pub(crate) fn resolve_accumulated(self) {
        let Watcher { buffer, slot, .. } = self;
        slot.fill(Ok(buffer));
    }
}
