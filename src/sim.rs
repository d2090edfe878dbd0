//! In-process simulated oscilloscope.
//!
//! `SimScope` implements [`ScopeDriver`] with deterministic waveform data and
//! the same argument contracts a real instrument enforces, so the full
//! capture path can run in tests and demos without hardware.

use crate::buffers::BufferSet;
use crate::channel::{ChannelConfig, ChannelId, Resolution};
use crate::driver::{
    BulkReadout, DeviceHandle, DriverError, ScopeDriver, SegmentTriggerInfo, TimebaseInfo,
    TriggerTimeUnits,
};
use crate::trigger::TriggerDirection;

const DEFAULT_CAPACITY_SAMPLES: u32 = 512_000_000;

#[derive(Debug, Clone, Copy)]
struct ArmedState {
    pre_trigger_samples: u32,
    post_trigger_samples: u32,
}

/// Simulated rapid-block oscilloscope.
#[derive(Debug)]
pub struct SimScope {
    handle: Option<DeviceHandle>,
    resolution: Option<Resolution>,
    max_adc: i16,
    capacity_samples: u32,
    per_segment: Option<u32>,
    segments: u32,
    captures: u32,
    channels: [Option<ChannelConfig>; 4],
    trigger_source: Option<ChannelId>,
    registrations: Vec<(ChannelId, u32, u32)>,
    armed: Option<ArmedState>,
    ready: bool,
    polls_until_ready: u32,
    polls_seen: u32,
    never_ready: bool,
}

impl Default for SimScope {
    fn default() -> Self {
        Self::new()
    }
}

impl SimScope {
    pub fn new() -> Self {
        Self {
            handle: None,
            resolution: None,
            max_adc: 0,
            capacity_samples: DEFAULT_CAPACITY_SAMPLES,
            per_segment: None,
            segments: 0,
            captures: 0,
            channels: [None; 4],
            trigger_source: None,
            registrations: Vec::new(),
            armed: None,
            ready: false,
            polls_until_ready: 0,
            polls_seen: 0,
            never_ready: false,
        }
    }

    /// Shrink the simulated device memory, in samples.
    pub fn with_capacity(mut self, samples: u32) -> Self {
        self.capacity_samples = samples;
        self
    }

    /// Report not-ready for the first `polls` ready queries.
    pub fn ready_after_polls(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    /// Never signal ready, as if the trigger never arrives.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Channel the armed trigger watches, if any.
    pub fn trigger_source(&self) -> Option<ChannelId> {
        self.trigger_source
    }

    fn check_handle(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        if self.handle == Some(handle) {
            Ok(())
        } else {
            Err(DriverError::InvalidArgument {
                reason: "unknown or closed device handle".into(),
            })
        }
    }

    fn channel(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels[id.index()].as_ref()
    }

    fn is_enabled(&self, id: ChannelId) -> bool {
        self.channel(id).is_some_and(|c| c.enabled)
    }

    /// Deterministic waveform: a sine whose phase depends on channel and
    /// segment, at half the full-scale code.
    fn sample_value(&self, channel: ChannelId, segment: u32, index: usize, total: usize) -> i16 {
        let amplitude = f64::from(self.max_adc) * 0.5;
        let phase = f64::from(segment + 1) * 0.25 + channel.index() as f64 * 0.1;
        let x = index as f64 / total.max(1) as f64;
        (amplitude * (std::f64::consts::TAU * (4.0 * x + phase)).sin()) as i16
    }
}

impl ScopeDriver for SimScope {
    fn open(&mut self, resolution: Resolution) -> Result<DeviceHandle, DriverError> {
        if self.handle.is_some() {
            return Err(DriverError::InvalidArgument {
                reason: "device is already open".into(),
            });
        }
        let handle = DeviceHandle::new(1);
        self.handle = Some(handle);
        self.resolution = Some(resolution);
        // 8-bit mode exposes a smaller full-scale code; every higher
        // resolution reports the 16-bit-scaled value.
        self.max_adc = match resolution {
            Resolution::Bits8 => 32_512,
            _ => 32_767,
        };
        log::debug!("sim scope opened at {} bits", resolution.bits());
        Ok(handle)
    }

    fn max_adc_code(&mut self, handle: DeviceHandle) -> Result<i16, DriverError> {
        self.check_handle(handle)?;
        Ok(self.max_adc)
    }

    fn memory_segments(
        &mut self,
        handle: DeviceHandle,
        segments: u32,
    ) -> Result<u32, DriverError> {
        self.check_handle(handle)?;
        if segments == 0 {
            return Err(DriverError::InvalidArgument {
                reason: "segment count must be at least 1".into(),
            });
        }
        let per_segment = self.capacity_samples / segments;
        if per_segment == 0 {
            return Err(DriverError::InsufficientMemory {
                segments,
                samples: 1,
            });
        }
        self.segments = segments;
        self.per_segment = Some(per_segment);
        Ok(per_segment)
    }

    fn set_capture_count(
        &mut self,
        handle: DeviceHandle,
        captures: u32,
    ) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        if self.per_segment.is_none() {
            return Err(DriverError::InvalidArgument {
                reason: "memory segments not configured".into(),
            });
        }
        if captures == 0 || captures > self.segments {
            return Err(DriverError::InvalidArgument {
                reason: format!("capture count {captures} must be in 1..={}", self.segments),
            });
        }
        self.captures = captures;
        Ok(())
    }

    fn set_channel(
        &mut self,
        handle: DeviceHandle,
        config: &ChannelConfig,
    ) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        if config.offset_volts.abs() * 1_000.0 > config.range.full_scale_mv() {
            return Err(DriverError::DeviceRejectedConfig {
                reason: format!(
                    "offset {} V exceeds the ±{} mV range",
                    config.offset_volts,
                    config.range.full_scale_mv()
                ),
            });
        }
        self.channels[config.channel.index()] = Some(*config);
        Ok(())
    }

    fn set_simple_trigger(
        &mut self,
        handle: DeviceHandle,
        source: ChannelId,
        _threshold_adc: i16,
        _direction: TriggerDirection,
        _delay_samples: u32,
        _auto_trigger_ms: u16,
    ) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        if !self.is_enabled(source) {
            return Err(DriverError::DeviceRejectedConfig {
                reason: format!("trigger source channel {source} is not enabled"),
            });
        }
        self.trigger_source = Some(source);
        Ok(())
    }

    fn resolve_timebase(
        &mut self,
        handle: DeviceHandle,
        timebase: u32,
        samples: u32,
    ) -> Result<TimebaseInfo, DriverError> {
        self.check_handle(handle)?;
        let per_segment = self.per_segment.ok_or(DriverError::InvalidArgument {
            reason: "memory segments not configured".into(),
        })?;
        // 8-bit mode reaches the fastest timebase; higher resolutions
        // start one index later.
        let min_timebase = match self.resolution {
            Some(Resolution::Bits8) => 0,
            _ => 1,
        };
        if timebase < min_timebase || samples > per_segment {
            return Err(DriverError::TimebaseUnsupported { timebase, samples });
        }
        let interval_ns = if timebase < 3 {
            2_u32.pow(timebase) as f32
        } else {
            (timebase - 2) as f32 * 8.0
        };
        Ok(TimebaseInfo {
            interval_ns,
            max_samples: per_segment,
        })
    }

    fn register_buffer(
        &mut self,
        handle: DeviceHandle,
        channel: ChannelId,
        segment: u32,
        samples: u32,
    ) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        let per_segment = self.per_segment.unwrap_or(0);
        if !self.is_enabled(channel) || segment >= self.segments || samples > per_segment {
            return Err(DriverError::BufferRegistrationFailed { channel, segment });
        }
        self.registrations.retain(|(c, s, _)| !(*c == channel && *s == segment));
        self.registrations.push((channel, segment, samples));
        Ok(())
    }

    fn start_block(
        &mut self,
        handle: DeviceHandle,
        pre_trigger_samples: u32,
        post_trigger_samples: u32,
        _timebase: u32,
    ) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        let per_segment = self.per_segment.ok_or(DriverError::InvalidArgument {
            reason: "memory segments not configured".into(),
        })?;
        let samples = pre_trigger_samples + post_trigger_samples;
        if samples > per_segment {
            return Err(DriverError::InsufficientMemory {
                segments: self.segments,
                samples,
            });
        }
        self.armed = Some(ArmedState {
            pre_trigger_samples,
            post_trigger_samples,
        });
        self.ready = false;
        self.polls_seen = 0;
        Ok(())
    }

    fn is_ready(&mut self, handle: DeviceHandle) -> Result<bool, DriverError> {
        self.check_handle(handle)?;
        if self.armed.is_none() {
            return Err(DriverError::InvalidArgument {
                reason: "no block capture in progress".into(),
            });
        }
        if self.never_ready {
            return Ok(false);
        }
        self.polls_seen += 1;
        if self.polls_seen > self.polls_until_ready {
            self.ready = true;
        }
        Ok(self.ready)
    }

    fn read_segments(
        &mut self,
        handle: DeviceHandle,
        first_segment: u32,
        last_segment: u32,
        buffers: &mut BufferSet,
    ) -> Result<BulkReadout, DriverError> {
        self.check_handle(handle)?;
        if !self.ready {
            return Err(DriverError::InvalidArgument {
                reason: "capture is not ready for retrieval".into(),
            });
        }
        if last_segment < first_segment || last_segment >= self.segments {
            return Err(DriverError::InvalidArgument {
                reason: format!(
                    "segment range {first_segment}..={last_segment} outside 0..{}",
                    self.segments
                ),
            });
        }
        let armed = self.armed.ok_or(DriverError::InvalidArgument {
            reason: "no block capture in progress".into(),
        })?;
        let samples = armed.pre_trigger_samples + armed.post_trigger_samples;

        let registrations = self.registrations.clone();
        for (channel, segment, registered_samples) in registrations {
            if segment < first_segment || segment > last_segment {
                continue;
            }
            if let Some(buffer) = buffers.get_mut(channel) {
                if segment as usize >= buffer.captures() {
                    continue;
                }
                let row = buffer.segment_mut(segment);
                let fill = row.len().min(registered_samples as usize);
                for (i, sample) in row.iter_mut().take(fill).enumerate() {
                    *sample = self.sample_value(channel, segment, i, fill);
                }
            }
        }

        Ok(BulkReadout {
            overflow: vec![false; (last_segment - first_segment + 1) as usize],
            samples,
        })
    }

    fn trigger_info(
        &mut self,
        handle: DeviceHandle,
        first_segment: u32,
        last_segment: u32,
    ) -> Result<Vec<SegmentTriggerInfo>, DriverError> {
        self.check_handle(handle)?;
        if !self.ready {
            return Err(DriverError::InvalidArgument {
                reason: "capture is not ready for trigger correlation".into(),
            });
        }
        if last_segment < first_segment || last_segment >= self.captures {
            return Err(DriverError::InvalidArgument {
                reason: format!(
                    "trigger info range {first_segment}..={last_segment} outside the {} captures",
                    self.captures
                ),
            });
        }
        Ok((first_segment..=last_segment)
            .map(|segment| SegmentTriggerInfo {
                status: 0,
                segment_index: segment,
                trigger_time: i64::from(segment + 1) * 1_000,
                time_units: TriggerTimeUnits::Nanoseconds,
                timestamp_counter: u64::from(segment + 1) * 125_000,
            })
            .collect())
    }

    fn stop(&mut self, handle: DeviceHandle) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        self.armed = None;
        self.ready = false;
        Ok(())
    }

    fn close(&mut self, handle: DeviceHandle) -> Result<(), DriverError> {
        self.check_handle(handle)?;
        self.handle = None;
        Ok(())
    }
}
