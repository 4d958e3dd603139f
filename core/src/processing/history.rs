use crate::prelude::Complex32;
use std::collections::VecDeque;

/// A raw block tagged with where it sits in stream time.
pub struct TimedBlock {
    pub offset_s: f64,
    pub sample_rate_hz: u32,
    pub samples: Vec<Complex32>,
}

impl TimedBlock {
    pub fn end_s(&self) -> f64 {
        self.offset_s + self.samples.len() as f64 / self.sample_rate_hz as f64
    }
}

/// Most recent raw blocks of one device, oldest first.
pub struct SampleHistory {
    capacity: usize,
    blocks: VecDeque<TimedBlock>,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            blocks: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Stores `block` and hands back the sample buffer it displaced, if any.
    pub fn push(&mut self, block: TimedBlock) -> Option<Vec<Complex32>> {
        let evicted = if self.blocks.len() == self.capacity {
            self.blocks.pop_front().map(|old| old.samples)
        } else {
            None
        };
        self.blocks.push_back(block);
        evicted
    }

    /// Removes the oldest block and hands back its samples.
    pub fn pop_oldest(&mut self) -> Option<Vec<Complex32>> {
        self.blocks.pop_front().map(|block| block.samples)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Samples covering `[start_s, end_s)` that are still retained.
    pub fn window(&self, start_s: f64, end_s: f64) -> Vec<Complex32> {
        let mut out = Vec::new();
        if end_s <= start_s {
            return out;
        }
        for block in &self.blocks {
            let block_end = block.end_s();
            if block_end <= start_s || block.offset_s >= end_s {
                continue;
            }
            let rate = block.sample_rate_hz as f64;
            let len = block.samples.len();
            let first = (((start_s - block.offset_s).max(0.0) * rate).floor() as usize).min(len);
            let last = (((end_s.min(block_end) - block.offset_s) * rate).ceil() as usize).min(len);
            if first < last {
                out.extend_from_slice(&block.samples[first..last]);
            }
        }
        out
    }
}
