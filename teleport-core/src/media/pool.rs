//! Bounded pool of reusable byte buffers.
//!
//! Raw image planes are large and produced at frame rate, so both pipelines
//! recycle them. Ownership makes the release contract explicit: a buffer
//! can only be released by whoever owns it, i.e. after every reader let go.

use std::sync::Mutex;

/// A bounded free-list of `Vec<u8>` buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl BufferPool {
    /// Keep at most `max_buffers` idle buffers around.
    pub fn new(max_buffers: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    /// Take an empty buffer with at least `capacity` bytes reserved.
    pub fn acquire(&self, capacity: usize) -> Vec<u8> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let mut buf = recycled.unwrap_or_default();
        debug_assert!(buf.is_empty());
        buf.reserve(capacity);
        buf
    }

    /// Return a buffer. Its length is reset; when the pool is full the
    /// buffer is simply dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_buffers {
            free.push(buf);
        }
    }

    /// Number of idle buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_resets_length_and_reuses_allocation() {
        let pool = BufferPool::new(2);
        let mut buf = pool.acquire(1024);
        buf.extend_from_slice(&[7u8; 512]);
        let ptr = buf.as_ptr();
        pool.release(buf);

        let again = pool.acquire(16);
        assert!(again.is_empty());
        assert!(again.capacity() >= 1024);
        assert_eq!(again.as_ptr(), ptr);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = BufferPool::new(1);
        pool.release(vec![1, 2, 3]);
        pool.release(vec![4, 5, 6]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn empty_pool_allocates() {
        let pool = BufferPool::new(4);
        let buf = pool.acquire(64);
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.available(), 0);
    }
}
