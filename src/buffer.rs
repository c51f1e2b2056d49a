//! Owned scatter/gather buffers for frame assembly.
//!
//! A serialized frame is built exactly once, directly into its final send
//! buffer: [`FrameWriter`] hands the serializer chunk tails to write into,
//! doubling the allocation size as the message grows, and reserves a fixed
//! prefix for the 8-byte frame head so the lengths can be patched in after
//! serialization without a second pass or a concat.

use std::io;

/// An ordered sequence of owned byte chunks.
///
/// Chunks are written by a [`FrameWriter`] and consumed by the session's
/// gather-write; the chunk boundaries never appear on the wire. Send queues
/// are also `BufferVec`s: the socket task detaches the pending queue with
/// [`BufferVec::swap`] for the duration of a write while producers keep
/// appending to the fresh one.
#[derive(Debug, Default)]
pub struct BufferVec {
    chunks: Vec<Vec<u8>>,
}

impl BufferVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh zeroed chunk of `size` bytes.
    pub fn new_chunk(&mut self, size: usize) -> &mut [u8] {
        self.chunks.push(vec![0u8; size]);
        self.last_chunk_mut()
    }

    /// Mutable view of the most recently appended chunk.
    ///
    /// Callers must have appended at least one chunk.
    pub fn last_chunk_mut(&mut self) -> &mut [u8] {
        let i = self.chunks.len() - 1;
        &mut self.chunks[i]
    }

    /// Truncate the last chunk's logical size to `len` bytes.
    pub fn commit_last(&mut self, len: usize) {
        if let Some(last) = self.chunks.last_mut() {
            last.truncate(len);
        }
    }

    /// Exchange contents with `other` without copying chunk data.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.chunks, &mut other.chunks);
    }

    /// Steal every chunk of `other`, appending them in order.
    pub fn merge_from(&mut self, other: Self) {
        self.chunks.extend(other.chunks);
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total logical bytes across all chunks.
    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Flatten into one contiguous vector. Test and diagnostics helper; the
    /// send path never concatenates.
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for c in &self.chunks {
            out.extend_from_slice(c);
        }
        out
    }
}

/// First chunk allocation; every further chunk doubles the previous size.
const INIT_CHUNK_SIZE: usize = 256;

/// A zero-copy output stream over a [`BufferVec`].
///
/// `next`/`back_up` follow the usual zero-copy stream contract: `next` hands
/// out the unused tail of the last chunk (or a fresh, doubled chunk) and
/// optimistically marks it fully used; `back_up` returns the unwritten tail.
/// [`io::Write`] is implemented on top of the pair, so any serializer that
/// writes to an `io::Write` lands its bytes directly in the final chunks.
pub struct FrameWriter<'a> {
    buf: &'a mut BufferVec,
    /// Allocation size of the last chunk; the next allocation is double this.
    chunk_size: usize,
    /// Bytes of the last chunk handed out so far.
    used: usize,
    /// Reserved prefix length of the first chunk, 0 when none.
    head_size: usize,
    byte_count: usize,
}

impl<'a> FrameWriter<'a> {
    /// Start writing into `buf`, which must be empty.
    pub fn new(buf: &'a mut BufferVec) -> Self {
        debug_assert!(buf.is_empty());
        Self {
            buf,
            chunk_size: INIT_CHUNK_SIZE / 2,
            used: INIT_CHUNK_SIZE / 2,
            head_size: 0,
            byte_count: 0,
        }
    }

    /// Reserve `head_size` bytes at the very front for a fixed-size prefix.
    ///
    /// Only valid immediately after construction, before any write: it
    /// allocates the first chunk and marks the prefix used so serialization
    /// starts right after it. The prefix is filled in later via
    /// [`FrameWriter::patch_head`], once the trailing lengths are known.
    pub fn init_head(&mut self, head_size: usize) {
        debug_assert!(self.buf.is_empty() && self.byte_count == 0);
        self.chunk_size <<= 1;
        debug_assert!(head_size <= self.chunk_size);
        self.buf.new_chunk(self.chunk_size);
        self.head_size = head_size;
        self.used = head_size;
        self.byte_count = head_size;
    }

    /// Overwrite the reserved prefix. Call after all payload writes.
    pub fn patch_head(&mut self, head: &[u8]) {
        debug_assert_eq!(head.len(), self.head_size);
        self.buf.chunks[0][..head.len()].copy_from_slice(head);
    }

    /// Hand out writable space: the unused tail of the last chunk if any,
    /// otherwise a fresh chunk of double the previous allocation. The
    /// returned slice is marked fully used; return what goes unwritten with
    /// [`FrameWriter::back_up`].
    pub fn next(&mut self) -> &mut [u8] {
        if self.used == self.chunk_size {
            self.chunk_size <<= 1;
            self.used = self.chunk_size;
            self.byte_count += self.chunk_size;
            self.buf.new_chunk(self.chunk_size)
        } else {
            let start = self.used;
            let len = self.chunk_size - self.used;
            self.used = self.chunk_size;
            self.byte_count += len;
            &mut self.buf.last_chunk_mut()[start..]
        }
    }

    /// Return the trailing `count` bytes of the last `next` call.
    pub fn back_up(&mut self, count: usize) {
        debug_assert!(count <= self.used);
        self.used -= count;
        self.byte_count -= count;
    }

    /// Total bytes written (including the reserved prefix).
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Logical size of the last chunk; pass to [`BufferVec::commit_last`]
    /// when done.
    pub fn last_len(&self) -> usize {
        self.used
    }

    /// Truncate the last chunk to its written size, finishing the buffer.
    pub fn finish(self) {
        let len = self.used;
        self.buf.commit_last(len);
    }
}

impl io::Write for FrameWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let (copied, handed) = {
            let chunk = self.next();
            let n = data.len().min(chunk.len());
            chunk[..n].copy_from_slice(&data[..n]);
            (n, chunk.len())
        };
        self.back_up(handed - copied);
        Ok(copied)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
