use crate::prelude::SpectrumFrame;
use std::collections::VecDeque;
use std::sync::Arc;

/// Symmetric moving average across consecutive frames, taken per bin in dBFS.
///
/// A frame is released once `width / 2` newer frames have arrived, averaged
/// with up to `width / 2` neighbours on each side. At stream start the window
/// is truncated on the left; the newest `width / 2` frames are held back.
pub struct FrameSmoother {
    width: usize,
    window: VecDeque<Arc<SpectrumFrame>>,
}

impl FrameSmoother {
    /// `width` is forced odd and at least 1.
    pub fn new(width: usize) -> Self {
        let width = width.max(1) | 1;
        Self {
            width,
            window: VecDeque::with_capacity(width),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Frames pushed but not yet released.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn push(&mut self, frame: Arc<SpectrumFrame>) -> Option<SpectrumFrame> {
        if self
            .window
            .back()
            .is_some_and(|last| last.len() != frame.len())
        {
            self.window.clear();
        }

        self.window.push_back(frame);
        if self.window.len() > self.width {
            self.window.pop_front();
        }

        let half = self.width / 2;
        if self.window.len() <= half {
            return None;
        }

        let center = self.window.len() - 1 - half;
        let low = center.saturating_sub(half);
        let members = self.window.range(low..).collect::<Vec<_>>();
        let count = members.len() as f32;

        let mut smoothed = SpectrumFrame::clone(&self.window[center]);
        for (bin, power) in smoothed.power_dbfs.iter_mut().enumerate() {
            *power = members.iter().map(|f| f.power_dbfs[bin]).sum::<f32>() / count;
        }
        Some(smoothed)
    }
}
