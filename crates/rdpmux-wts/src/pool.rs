use std::sync::{Arc, Mutex};

/// A pool of reusable byte buffers amortising per-frame allocations.
///
/// One buffer is taken per received frame and per emitted chunk; the buffer
/// hands itself back to the pool when the last holder drops it.
#[derive(Clone)]
pub struct StreamPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
    max_pooled: usize,
}

impl StreamPool {
    pub fn new(buffer_capacity: usize) -> Self {
        const MAX_POOLED_BUFFERS: usize = 32;

        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::new()),
                buffer_capacity,
                max_pooled: MAX_POOLED_BUFFERS,
            }),
        }
    }

    /// Takes a cleared buffer out of the pool, allocating when empty.
    pub fn take(&self) -> PooledBuffer {
        let buffer = {
            let mut buffers = self.inner.buffers.lock().expect("pool poisoned");
            buffers.pop()
        };

        let buffer = buffer.unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_capacity));

        PooledBuffer {
            buffer,
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A buffer borrowed from a [`StreamPool`]; returns itself on drop.
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();

        let mut buffers = match self.pool.buffers.lock() {
            Ok(buffers) => buffers,
            Err(_) => return,
        };

        if buffers.len() < self.pool.max_pooled {
            buffers.push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_returns_to_the_pool_on_drop() {
        let pool = StreamPool::new(64);

        {
            let mut buffer = pool.take();
            buffer.extend_from_slice(&[1, 2, 3]);
        }

        let reused = pool.take();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 3);
    }
}
