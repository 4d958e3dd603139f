use crate::prelude::Complex32;

/// Recycles sample blocks so steady-state streaming does not allocate.
pub struct BufferPool {
    buffers: Vec<Vec<Complex32>>,
    max_capacity: usize,
}

impl BufferPool {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            max_capacity,
        }
    }

    /// Hands out a zeroed block of `length` samples, reusing a released one if any.
    pub fn checkout(&mut self, length: usize) -> Vec<Complex32> {
        match self.buffers.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(length, Complex32::new(0.0, 0.0));
                buffer
            }
            None => vec![Complex32::new(0.0, 0.0); length],
        }
    }

    /// Returns a block to the pool; surplus blocks are dropped.
    pub fn release(&mut self, buffer: Vec<Complex32>) {
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn available(&self) -> usize {
        self.buffers.len()
    }
}

/// Peak sample magnitude of a block, for diagnostics.
pub fn peak_magnitude(block: &[Complex32]) -> f32 {
    block.iter().map(|s| s.norm()).fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_blocks_are_reused_and_zeroed() {
        let mut pool = BufferPool::with_capacity(2);
        let mut block = pool.checkout(4);
        block[0] = Complex32::new(1.0, 1.0);
        pool.release(block);
        assert_eq!(pool.available(), 1);

        let block = pool.checkout(6);
        assert_eq!(block.len(), 6);
        assert_eq!(peak_magnitude(&block), 0.0);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn pool_never_grows_past_capacity() {
        let mut pool = BufferPool::with_capacity(1);
        pool.release(vec![Complex32::new(0.0, 0.0); 2]);
        pool.release(vec![Complex32::new(0.0, 0.0); 2]);
        assert_eq!(pool.available(), 1);
    }
}
