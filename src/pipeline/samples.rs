//! Layout-aware views over decoded audio samples
//!
//! Decoders hand back either one interleaved plane or one plane per channel.
//! The audio transform needs to skip leading samples in both layouts without
//! caring which one it got.

/// How channels are laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// One plane, channels interleaved per sample frame
    Interleaved,

    /// One plane per channel
    Planar,
}

/// Borrowed view of `count` sample frames
#[derive(Debug, Clone)]
pub struct SampleView<'a> {
    planes: Vec<&'a [u8]>,
    layout: SampleLayout,
    channels: usize,
    bytes_per_sample: usize,
    count: usize,
}

impl<'a> SampleView<'a> {
    /// View over a single interleaved plane
    pub fn interleaved(data: &'a [u8], channels: usize, bytes_per_sample: usize, count: usize) -> Self {
        debug_assert!(data.len() >= count * channels * bytes_per_sample);

        Self {
            planes: vec![data],
            layout: SampleLayout::Interleaved,
            channels,
            bytes_per_sample,
            count,
        }
    }

    /// View over one plane per channel
    pub fn planar(planes: Vec<&'a [u8]>, bytes_per_sample: usize, count: usize) -> Self {
        debug_assert!(planes.iter().all(|p| p.len() >= count * bytes_per_sample));

        Self {
            channels: planes.len(),
            planes,
            layout: SampleLayout::Planar,
            bytes_per_sample,
            count,
        }
    }

    /// View over interleaved signed 16-bit samples
    pub fn from_i16(samples: &'a [i16], channels: usize) -> Self {
        let channels = channels.max(1);
        let count = samples.len() / channels;
        Self::interleaved(bytemuck::cast_slice(samples), channels, 2, count)
    }

    /// Bytes between consecutive sample frames within a plane
    pub fn block_align(&self) -> usize {
        match self.layout {
            SampleLayout::Interleaved => self.bytes_per_sample * self.channels,
            SampleLayout::Planar => self.bytes_per_sample,
        }
    }

    /// The same view with the first `n` sample frames dropped
    pub fn skip(&self, n: usize) -> SampleView<'a> {
        let n = n.min(self.count);
        let offset = n * self.block_align();

        Self {
            planes: self.planes.iter().map(|p| &p[offset.min(p.len())..]).collect(),
            layout: self.layout,
            channels: self.channels,
            bytes_per_sample: self.bytes_per_sample,
            count: self.count - n,
        }
    }

    pub fn planes(&self) -> &[&'a [u8]] {
        &self.planes
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }

    /// Sample frames in view
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_interleaved() {
        let samples: Vec<i16> = (0..12).collect();
        let view = SampleView::from_i16(&samples, 2);
        assert_eq!(view.len(), 6);
        assert_eq!(view.block_align(), 4);

        let skipped = view.skip(2);
        assert_eq!(skipped.len(), 4);
        assert_eq!(skipped.planes()[0].len(), 16);
        assert_eq!(&skipped.planes()[0][..2], &4i16.to_ne_bytes());
    }

    #[test]
    fn test_skip_planar() {
        let left = [1u8, 0, 2, 0, 3, 0, 4, 0];
        let right = [5u8, 0, 6, 0, 7, 0, 8, 0];
        let view = SampleView::planar(vec![&left, &right], 2, 4);
        assert_eq!(view.channels(), 2);
        assert_eq!(view.block_align(), 2);

        let skipped = view.skip(3);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped.planes()[0], &[4, 0]);
        assert_eq!(skipped.planes()[1], &[8, 0]);
    }

    #[test]
    fn test_skip_past_end_is_empty() {
        let samples = [0i16; 8];
        let view = SampleView::from_i16(&samples, 2).skip(100);
        assert!(view.is_empty());
        assert!(view.planes()[0].is_empty());
    }
}
