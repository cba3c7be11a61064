/*
 * The Shadow Simulator
 * See LICENSE for licensing information
 */

//! A FIFO queue of bytes used as socket send and receive storage.
//!
//! Bytes are stored in a linked list of fixed-capacity chunks. A new chunk is only allocated when
//! the last chunk is full, and a chunk is freed as soon as its last byte has been popped, so the
//! queue never holds more than the chunks containing unread data plus the unused tail of the last
//! chunk.
//!
//! To avoid memory copies when moving bytes out of the queue (for example into a packet payload),
//! you can use [`ByteQueue::pop_chunk`], which splits off a reference-counted [`Bytes`] that shares
//! the chunk's allocation.

#![forbid(unsafe_code)]

use std::collections::LinkedList;
use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, Bytes, BytesMut};

/// A queue of stream bytes.
pub struct ByteQueue {
    /// The queued bytes. Every chunk holds at least one unread byte.
    chunks: LinkedList<BytesMut>,
    /// The number of bytes in the queue.
    length: usize,
    /// The size of newly allocated chunks.
    chunk_capacity: usize,
    #[cfg(test)]
    /// An allocation counter for testing purposes.
    total_allocations: u64,
}

impl ByteQueue {
    /// Create an empty queue. No memory is allocated until bytes are pushed. Panics if
    /// `chunk_capacity` is 0.
    pub fn new(chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "Chunk capacity must be non-zero");

        Self {
            chunks: LinkedList::new(),
            length: 0,
            chunk_capacity,
            #[cfg(test)]
            total_allocations: 0,
        }
    }

    /// The number of bytes in the queue.
    pub fn num_bytes(&self) -> usize {
        self.length
    }

    /// Returns true if the queue has bytes.
    pub fn has_bytes(&self) -> bool {
        self.num_bytes() > 0
    }

    /// The number of chunks currently allocated.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    #[must_use]
    fn alloc_chunk(&mut self) -> BytesMut {
        #[cfg(test)]
        {
            self.total_allocations += 1;
        }

        BytesMut::with_capacity(self.chunk_capacity)
    }

    /// Returns the last chunk if it has unused space, otherwise appends a newly allocated chunk and
    /// returns it.
    fn writable_tail(&mut self) -> &mut BytesMut {
        let tail_is_full = match self.chunks.back() {
            Some(tail) => tail.len() == tail.capacity(),
            None => true,
        };

        if tail_is_full {
            let chunk = self.alloc_chunk();
            self.chunks.push_back(chunk);
        }

        // we pushed a chunk above if there wasn't one
        self.chunks.back_mut().unwrap()
    }

    /// Remove the last chunk if it's empty. This can only happen if a reader returned fewer bytes
    /// than requested after we allocated a new chunk for them.
    fn drop_empty_tail(&mut self) {
        if self.chunks.back().is_some_and(|x| x.is_empty()) {
            self.chunks.pop_back();
        }
    }

    /// Push bytes onto the queue. All bytes are always written since the queue is unbounded; any
    /// limit on the queue size must be enforced by the caller. Returns the number of bytes written.
    pub fn push(&mut self, mut src: &[u8]) -> usize {
        let total = src.len();

        while !src.is_empty() {
            let tail = self.writable_tail();
            let space = tail.capacity() - tail.len();
            let to_copy = std::cmp::min(space, src.len());

            // stays within the chunk's capacity, so this never reallocates
            tail.extend_from_slice(&src[..to_copy]);
            src = &src[to_copy..];

            self.length += to_copy;
        }

        total
    }

    /// Push at most `len` bytes read from `src` onto the queue. Stops early if the reader reaches
    /// EOF. Returns an error only if no bytes could be read.
    pub fn push_from<R: Read>(&mut self, mut src: R, len: usize) -> std::io::Result<usize> {
        let mut total_copied = 0;

        while total_copied < len {
            let remaining = len - total_copied;

            let tail = self.writable_tail();
            let old_len = tail.len();
            let to_read = std::cmp::min(remaining, tail.capacity() - old_len);

            // zero-fill the space we're about to read into; doesn't reallocate
            tail.resize(old_len + to_read, 0);

            let rv = loop {
                match src.read(&mut tail[old_len..]) {
                    // may have been interrupted due to a signal, so try again
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    x => break x,
                }
            };

            let copied = *rv.as_ref().unwrap_or(&0);
            tail.truncate(old_len + copied);
            self.length += copied;
            total_copied += copied;

            match rv {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    self.drop_empty_tail();
                    // a partial write may have occurred in previous iterations
                    if total_copied == 0 {
                        return Err(e);
                    }
                    return Ok(total_copied);
                }
            }
        }

        self.drop_empty_tail();

        Ok(total_copied)
    }

    /// Pop bytes from the queue into `dst`. Copies up to `dst.len()` bytes and returns the number
    /// of bytes copied, which is 0 if the queue is empty. Drained chunks are freed immediately.
    pub fn pop(&mut self, dst: &mut [u8]) -> usize {
        let mut total_copied = 0;

        while total_copied < dst.len() {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };

            let to_copy = std::cmp::min(chunk.len(), dst.len() - total_copied);
            dst[total_copied..][..to_copy].copy_from_slice(&chunk[..to_copy]);
            chunk.advance(to_copy);

            if chunk.is_empty() {
                self.chunks.pop_front();
            }

            self.length -= to_copy;
            total_copied += to_copy;
        }

        total_copied
    }

    /// Pop at most `len` bytes from the queue, writing them to `dst`. Returns an error only if no
    /// bytes could be written. Bytes are only removed from the queue once they've been written.
    pub fn pop_into<W: Write>(&mut self, mut dst: W, len: usize) -> std::io::Result<usize> {
        let mut total_copied = 0;

        while total_copied < len {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };

            let to_write = std::cmp::min(chunk.len(), len - total_copied);

            let copied = match dst.write(&chunk[..to_write]) {
                Ok(x) => x,
                // may have been interrupted due to a signal, so try again
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // a partial write may have occurred in previous iterations
                Err(e) if total_copied == 0 => return Err(e),
                Err(_) => break,
            };

            if copied == 0 {
                break;
            }

            chunk.advance(copied);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }

            self.length -= copied;
            total_copied += copied;
        }

        Ok(total_copied)
    }

    /// Pop at most `max_len` bytes from the front of the queue without copying them. The returned
    /// bytes never span more than one chunk, so fewer than `max_len` bytes may be returned even if
    /// the queue has more. Returns `None` if the queue is empty or `max_len` is 0.
    pub fn pop_chunk(&mut self, max_len: usize) -> Option<Bytes> {
        if max_len == 0 {
            return None;
        }

        let chunk = self.chunks.front_mut()?;

        let bytes = if chunk.len() <= max_len {
            // hand out the whole chunk
            self.chunks.pop_front()?
        } else {
            chunk.split_to(max_len)
        };

        self.length -= bytes.len();

        Some(bytes.freeze())
    }

    /// Copy up to `dst.len()` bytes from the front of the queue without removing them.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let mut total_copied = 0;

        for chunk in &self.chunks {
            if total_copied == dst.len() {
                break;
            }

            let to_copy = std::cmp::min(chunk.len(), dst.len() - total_copied);
            dst[total_copied..][..to_copy].copy_from_slice(&chunk[..to_copy]);
            total_copied += to_copy;
        }

        total_copied
    }

    /// Remove all bytes and free all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.length = 0;
    }
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteQueue")
            .field("num_bytes", &self.length)
            .field("num_chunks", &self.chunks.len())
            .field("chunk_capacity", &self.chunk_capacity)
            .finish()
    }
}

// a sanity check only when using debug mode
#[cfg(debug_assertions)]
impl std::ops::Drop for ByteQueue {
    fn drop(&mut self) {
        // check that the length is consistent with the number of remaining bytes
        assert_eq!(
            self.num_bytes(),
            self.chunks.iter().map(|x| x.len()).sum::<usize>()
        );
        assert!(self.chunks.iter().all(|x| !x.is_empty()));
    }
}
