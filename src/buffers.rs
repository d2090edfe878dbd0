use crate::channel::{ActiveChannels, ChannelId};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("failed to allocate {captures}x{samples} sample buffer for channel {channel}")]
    AllocationFailed {
        channel: ChannelId,
        captures: u32,
        samples: u32,
    },

    #[error("dataset for channel {channel} has {actual} samples, expected {expected}")]
    ShapeMismatch {
        channel: ChannelId,
        expected: usize,
        actual: usize,
    },
}

/// Sample storage for one channel: `captures` rows of `samples_per_capture`
/// signed ADC codes, one row per memory segment.
///
/// Rows are lent to the driver through registration and filled during bulk
/// retrieval; the flat row-major layout keeps each row contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentBuffer {
    captures: usize,
    samples_per_capture: usize,
    data: Vec<i16>,
}

impl SegmentBuffer {
    /// Allocate a zero-initialized buffer, reporting allocation failure
    /// instead of aborting.
    pub fn zeroed(
        channel: ChannelId,
        captures: u32,
        samples_per_capture: u32,
    ) -> Result<Self, BufferError> {
        let fail = || BufferError::AllocationFailed {
            channel,
            captures,
            samples: samples_per_capture,
        };
        let total = (captures as usize)
            .checked_mul(samples_per_capture as usize)
            .ok_or_else(fail)?;
        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|_| fail())?;
        data.resize(total, 0);
        Ok(Self {
            captures: captures as usize,
            samples_per_capture: samples_per_capture as usize,
            data,
        })
    }

    /// Rebuild a buffer from raw samples, e.g. when reading a capture file.
    pub fn from_raw(
        channel: ChannelId,
        captures: u32,
        samples_per_capture: u32,
        data: Vec<i16>,
    ) -> Result<Self, BufferError> {
        let expected = (captures as usize) * (samples_per_capture as usize);
        if data.len() != expected {
            return Err(BufferError::ShapeMismatch {
                channel,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            captures: captures as usize,
            samples_per_capture: samples_per_capture as usize,
            data,
        })
    }

    pub fn captures(&self) -> usize {
        self.captures
    }

    pub fn samples_per_capture(&self) -> usize {
        self.samples_per_capture
    }

    /// One segment's samples.
    pub fn segment(&self, index: u32) -> &[i16] {
        let start = index as usize * self.samples_per_capture;
        &self.data[start..start + self.samples_per_capture]
    }

    pub fn segment_mut(&mut self, index: u32) -> &mut [i16] {
        let start = index as usize * self.samples_per_capture;
        &mut self.data[start..start + self.samples_per_capture]
    }

    /// All samples, row-major by segment.
    pub fn raw(&self) -> &[i16] {
        &self.data
    }
}

/// One [`SegmentBuffer`] per active channel, in registry order.
///
/// The order is replayed verbatim by device registration and by the
/// persistence writer, which is what keeps dataset names aligned with data.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BufferSet {
    entries: Vec<(ChannelId, SegmentBuffer)>,
}

impl BufferSet {
    /// Allocate one zeroed buffer per active channel.
    pub fn allocate(
        active: &ActiveChannels,
        captures: u32,
        samples_per_capture: u32,
    ) -> Result<Self, BufferError> {
        let mut entries = Vec::with_capacity(active.len());
        for (channel, _) in active.iter() {
            entries.push((
                channel,
                SegmentBuffer::zeroed(channel, captures, samples_per_capture)?,
            ));
        }
        Ok(Self { entries })
    }

    pub(crate) fn push(&mut self, channel: ChannelId, buffer: SegmentBuffer) {
        self.entries.push((channel, buffer));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &SegmentBuffer)> {
        self.entries.iter().map(|(c, b)| (*c, b))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ChannelId, &mut SegmentBuffer)> {
        self.entries.iter_mut().map(|(c, b)| (*c, b))
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.entries.iter().map(|(c, _)| *c).collect()
    }

    pub fn get(&self, channel: ChannelId) -> Option<&SegmentBuffer> {
        self.entries
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, b)| b)
    }

    pub fn get_mut(&mut self, channel: ChannelId) -> Option<&mut SegmentBuffer> {
        self.entries
            .iter_mut()
            .find(|(c, _)| *c == channel)
            .map(|(_, b)| b)
    }
}
