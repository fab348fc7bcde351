use bytes::BytesMut;
use object_pool::{Pool, Reusable};

const BUFFER_CAPACITY: usize = 4096;
const POOL_CAPACITY: usize = 16;

pub struct BufferPool {
    buffers: Pool<BytesMut>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Pool::new(capacity, || BytesMut::with_capacity(BUFFER_CAPACITY)),
        }
    }

    /// Checks out an empty buffer, allocating a new one if the pool is drained.
    pub fn get(&self) -> Reusable<'_, BytesMut> {
        let mut buf = self
            .buffers
            .pull(|| BytesMut::with_capacity(BUFFER_CAPACITY));
        buf.clear();
        buf
    }

    pub fn available(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .finish()
    }
}
