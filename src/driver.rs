//! The opaque hardware-control boundary.
//!
//! Everything the capture engine needs from a vendor driver is expressed by
//! [`ScopeDriver`]; the rest of the crate never talks to hardware directly.
//! [`crate::sim::SimScope`] implements it in-process for tests and demos.

use crate::buffers::BufferSet;
use crate::channel::{ChannelConfig, ChannelId, Resolution};
use crate::trigger::TriggerDirection;

/// Opaque identifier for one open instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(i16);

impl DeviceHandle {
    pub fn new(raw: i16) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i16 {
        self.0
    }
}

/// What the device can actually deliver for a requested timebase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseInfo {
    /// Actual interval between samples, in nanoseconds.
    pub interval_ns: f32,
    /// Maximum samples per segment achievable at this timebase.
    pub max_samples: u32,
}

/// Result of a bulk segment retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReadout {
    /// One flag per retrieved segment; set when the input exceeded the
    /// configured range during that capture.
    pub overflow: Vec<bool>,
    /// Samples actually delivered per segment.
    pub samples: u32,
}

/// Unit of the per-segment trigger time values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTimeUnits {
    Femtoseconds,
    Picoseconds,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

/// Per-segment trigger timing, used to align segments on a common time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTriggerInfo {
    pub status: u32,
    pub segment_index: u32,
    pub trigger_time: i64,
    pub time_units: TriggerTimeUnits,
    pub timestamp_counter: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no instrument responded or resolution {resolution:?} is unsupported")]
    DeviceUnavailable { resolution: Resolution },

    #[error("device memory cannot hold {segments} segments of {samples} samples")]
    InsufficientMemory { segments: u32, samples: u32 },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("device rejected configuration: {reason}")]
    DeviceRejectedConfig { reason: String },

    #[error("timebase {timebase} cannot deliver {samples} samples")]
    TimebaseUnsupported { timebase: u32, samples: u32 },

    #[error("buffer registration rejected for channel {channel}, segment {segment}")]
    BufferRegistrationFailed { channel: ChannelId, segment: u32 },

    #[error("driver call failed with status {status:#06x}")]
    Status { status: u32 },
}

impl DriverError {
    /// Vendor-style status code, for the session's stage log.
    pub fn status_code(&self) -> u32 {
        match self {
            Self::DeviceUnavailable { .. } => 0x0003,
            Self::InsufficientMemory { .. } => 0x0002,
            Self::InvalidArgument { .. } => 0x000d,
            Self::DeviceRejectedConfig { .. } => 0x0023,
            Self::TimebaseUnsupported { .. } => 0x0014,
            Self::BufferRegistrationFailed { .. } => 0x0032,
            Self::Status { status } => *status,
        }
    }
}

/// Hardware-control interface of a rapid-block capable oscilloscope.
///
/// Call ordering is the caller's job (the session and orchestrator enforce
/// it); implementations are free to reject out-of-order calls with
/// [`DriverError::InvalidArgument`].
pub trait ScopeDriver {
    /// Open the instrument at the requested ADC resolution.
    fn open(&mut self, resolution: Resolution) -> Result<DeviceHandle, DriverError>;

    /// Full-scale ADC code for the configured resolution. Needed before any
    /// threshold conversion.
    fn max_adc_code(&mut self, handle: DeviceHandle) -> Result<i16, DriverError>;

    /// Partition device memory into `segments` segments, returning the
    /// per-segment sample capacity that results.
    fn memory_segments(&mut self, handle: DeviceHandle, segments: u32)
        -> Result<u32, DriverError>;

    /// Number of captures to acquire in the next block run; at most the
    /// configured segment count.
    fn set_capture_count(&mut self, handle: DeviceHandle, captures: u32)
        -> Result<(), DriverError>;

    fn set_channel(
        &mut self,
        handle: DeviceHandle,
        config: &ChannelConfig,
    ) -> Result<(), DriverError>;

    /// Arm a single-source trigger. `threshold_adc` is already converted to
    /// device counts against the source channel's range.
    fn set_simple_trigger(
        &mut self,
        handle: DeviceHandle,
        source: ChannelId,
        threshold_adc: i16,
        direction: TriggerDirection,
        delay_samples: u32,
        auto_trigger_ms: u16,
    ) -> Result<(), DriverError>;

    /// Actual sample interval and achievable sample count for a timebase.
    fn resolve_timebase(
        &mut self,
        handle: DeviceHandle,
        timebase: u32,
        samples: u32,
    ) -> Result<TimebaseInfo, DriverError>;

    /// Declare the write-back binding for one (channel, segment) pair.
    /// Every binding is checked; any rejection aborts the run.
    fn register_buffer(
        &mut self,
        handle: DeviceHandle,
        channel: ChannelId,
        segment: u32,
        samples: u32,
    ) -> Result<(), DriverError>;

    /// Start filling memory segments as triggers occur.
    fn start_block(
        &mut self,
        handle: DeviceHandle,
        pre_trigger_samples: u32,
        post_trigger_samples: u32,
        timebase: u32,
    ) -> Result<(), DriverError>;

    /// Has the block completed? Polled; never blocks.
    fn is_ready(&mut self, handle: DeviceHandle) -> Result<bool, DriverError>;

    /// Bulk-retrieve segments `first..=last` into the registered rows of
    /// `buffers`. Only valid once [`Self::is_ready`] has reported true.
    fn read_segments(
        &mut self,
        handle: DeviceHandle,
        first_segment: u32,
        last_segment: u32,
        buffers: &mut BufferSet,
    ) -> Result<BulkReadout, DriverError>;

    /// Per-segment trigger timing for segments `first..=last`.
    fn trigger_info(
        &mut self,
        handle: DeviceHandle,
        first_segment: u32,
        last_segment: u32,
    ) -> Result<Vec<SegmentTriggerInfo>, DriverError>;

    /// Stop acquisition and release device-side segment memory.
    fn stop(&mut self, handle: DeviceHandle) -> Result<(), DriverError>;

    fn close(&mut self, handle: DeviceHandle) -> Result<(), DriverError>;
}
