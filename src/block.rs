//! The block-capture state machine: resolve timebase, arm, poll, retrieve.
//!
//! The progression is encoded in types. [`BlockRunner`] can only arm after a
//! timebase is resolved, [`ArmedBlock`] can only hand out data through
//! [`ArmedBlock::wait`], and trigger timing is only reachable on
//! [`RetrievedBlock`], so retrieval before the ready flag or trigger-info
//! fetches before retrieval do not compile.

use crate::buffers::BufferSet;
use crate::driver::{
    BulkReadout, DeviceHandle, DriverError, ScopeDriver, SegmentTriggerInfo, TimebaseInfo,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Fixed acquisition geometry for one rapid-block run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub segments: u32,
    pub captures: u32,
    pub timebase: u32,
}

impl BlockPlan {
    pub fn new(
        pre_trigger_samples: u32,
        post_trigger_samples: u32,
        segments: u32,
        captures: u32,
        timebase: u32,
    ) -> Result<Self, CaptureError> {
        if segments == 0 {
            return Err(CaptureError::InvalidPlan {
                reason: "segment count must be at least 1".into(),
            });
        }
        if captures == 0 || captures > segments {
            return Err(CaptureError::InvalidPlan {
                reason: format!("capture count {captures} must be in 1..={segments}"),
            });
        }
        match pre_trigger_samples.checked_add(post_trigger_samples) {
            None | Some(0) => {
                return Err(CaptureError::InvalidPlan {
                    reason: "pre + post trigger samples must be nonzero and fit in u32".into(),
                })
            }
            Some(_) => {}
        }
        Ok(Self {
            pre_trigger_samples,
            post_trigger_samples,
            segments,
            captures,
            timebase,
        })
    }

    /// Samples per segment: pre-trigger plus post-trigger.
    pub fn max_samples(&self) -> u32 {
        self.pre_trigger_samples + self.post_trigger_samples
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid capture plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("no trigger arrived within {waited:?}")]
    TriggerTimeout { waited: Duration },

    #[error("capture cancelled after {waited:?}")]
    Cancelled { waited: Duration },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl CaptureError {
    /// Status code for the session's stage log, vendor-style like
    /// [`DriverError::status_code`].
    pub fn status_code(&self) -> u32 {
        match self {
            Self::InvalidPlan { .. } => 0x000d,
            Self::TriggerTimeout { .. } => 0x0102,
            Self::Cancelled { .. } => 0x0103,
            Self::Driver(e) => e.status_code(),
        }
    }
}

/// How to wait for the ready flag.
///
/// The default is the instrument-script behavior: busy-poll with no
/// deadline. Production callers should set a deadline so a trigger that
/// never arrives surfaces as [`CaptureError::TriggerTimeout`] instead of a
/// hang, and may add a poll interval to stop burning a core.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollPolicy {
    pub deadline: Option<Duration>,
    pub interval: Duration,
}

impl PollPolicy {
    /// Busy-poll with no deadline.
    pub fn busy() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Cooperative cancellation flag, checked on every poll iteration.
///
/// Clones share the flag, so a process-level signal handler can keep one
/// and trip it while the capture worker blocks in [`ArmedBlock::wait`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Everything a completed block run produces besides the sample data itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    /// One flag per segment; set when the input exceeded the channel range.
    pub overflow: Vec<bool>,
    /// Actual interval between samples, in nanoseconds.
    pub sample_interval_ns: f32,
    /// Samples the device actually delivered per segment.
    pub returned_max_samples: u32,
    /// Per-segment trigger timing, empty if the fetch failed or was skipped.
    pub trigger_info: Vec<SegmentTriggerInfo>,
    /// Wall-clock time at which retrieval completed.
    pub completed_at: SystemTime,
}

impl CaptureOutcome {
    /// Number of segments whose input exceeded the configured range.
    pub fn overflow_count(&self) -> usize {
        self.overflow.iter().filter(|&&o| o).count()
    }
}

/// Entry state of the orchestrator; borrows the driver for the duration of
/// one block run.
pub struct BlockRunner<'d, D: ScopeDriver> {
    driver: &'d mut D,
    handle: DeviceHandle,
}

impl<'d, D: ScopeDriver> BlockRunner<'d, D> {
    pub fn new(driver: &'d mut D, handle: DeviceHandle) -> Self {
        Self { driver, handle }
    }

    /// Ask the device for the actual sample interval and achievable sample
    /// count for the plan's timebase.
    pub fn resolve_timebase(&mut self, plan: &BlockPlan) -> Result<TimebaseInfo, CaptureError> {
        let info = self
            .driver
            .resolve_timebase(self.handle, plan.timebase, plan.max_samples())?;
        log::debug!(
            "timebase {} resolved: {} ns/sample, {} samples max",
            plan.timebase,
            info.interval_ns,
            info.max_samples
        );
        Ok(info)
    }

    /// Issue the block-start command; the device begins filling segments as
    /// triggers occur.
    pub fn arm(
        self,
        plan: &BlockPlan,
        info: TimebaseInfo,
    ) -> Result<ArmedBlock<'d, D>, CaptureError> {
        self.driver.start_block(
            self.handle,
            plan.pre_trigger_samples,
            plan.post_trigger_samples,
            plan.timebase,
        )?;
        log::debug!(
            "block armed: {} pre + {} post samples, {} captures over {} segments",
            plan.pre_trigger_samples,
            plan.post_trigger_samples,
            plan.captures,
            plan.segments
        );
        Ok(ArmedBlock {
            driver: self.driver,
            handle: self.handle,
            plan: *plan,
            info,
            armed_at: Instant::now(),
        })
    }
}

/// A block capture in flight. The buffers stay untouched by host code until
/// [`Self::wait`] returns them filled.
pub struct ArmedBlock<'d, D: ScopeDriver> {
    driver: &'d mut D,
    handle: DeviceHandle,
    plan: BlockPlan,
    info: TimebaseInfo,
    armed_at: Instant,
}

impl<'d, D: ScopeDriver> ArmedBlock<'d, D> {
    /// One ready-flag query.
    pub fn poll(&mut self) -> Result<bool, CaptureError> {
        Ok(self.driver.is_ready(self.handle)?)
    }

    /// Block until the capture completes, then bulk-retrieve every segment
    /// into the registered buffer rows.
    ///
    /// Returns [`CaptureError::TriggerTimeout`] when the policy deadline
    /// expires and [`CaptureError::Cancelled`] when the token trips; in both
    /// cases the device is still armed and the session's teardown stop
    /// releases it.
    #[tracing::instrument(skip_all, fields(segments = self.plan.segments))]
    pub fn wait(
        mut self,
        policy: &PollPolicy,
        cancel: &CancelToken,
        buffers: &mut BufferSet,
    ) -> Result<RetrievedBlock<'d, D>, CaptureError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled {
                    waited: self.armed_at.elapsed(),
                });
            }
            if self.poll()? {
                break;
            }
            if let Some(deadline) = policy.deadline {
                if self.armed_at.elapsed() >= deadline {
                    return Err(CaptureError::TriggerTimeout {
                        waited: self.armed_at.elapsed(),
                    });
                }
            }
            if !policy.interval.is_zero() {
                thread::sleep(policy.interval);
            }
        }

        let readout =
            self.driver
                .read_segments(self.handle, 0, self.plan.segments - 1, buffers)?;
        let completed_at = SystemTime::now();
        log::debug!(
            "retrieved {} segments, {} samples each, {} overflowed",
            self.plan.segments,
            readout.samples,
            readout.overflow.iter().filter(|&&o| o).count()
        );
        Ok(RetrievedBlock {
            driver: self.driver,
            handle: self.handle,
            plan: self.plan,
            info: self.info,
            readout,
            completed_at,
            trigger_info: None,
        })
    }
}

/// A completed block run: samples are in host memory, trigger timing can now
/// be correlated.
pub struct RetrievedBlock<'d, D: ScopeDriver> {
    driver: &'d mut D,
    handle: DeviceHandle,
    plan: BlockPlan,
    info: TimebaseInfo,
    readout: BulkReadout,
    completed_at: SystemTime,
    trigger_info: Option<Vec<SegmentTriggerInfo>>,
}

impl<D: ScopeDriver> RetrievedBlock<'_, D> {
    /// Fetch per-segment trigger timing, one entry per requested capture in
    /// segment-index order. Diagnostic data; a failure here does not
    /// invalidate the retrieved samples.
    pub fn trigger_info(&mut self) -> Result<&[SegmentTriggerInfo], CaptureError> {
        if self.trigger_info.is_none() {
            let entries = self
                .driver
                .trigger_info(self.handle, 0, self.plan.captures - 1)?;
            for entry in &entries {
                log::debug!(
                    "segment {}: status {:#06x}, trigger time {} {:?}, counter {}",
                    entry.segment_index,
                    entry.status,
                    entry.trigger_time,
                    entry.time_units,
                    entry.timestamp_counter
                );
            }
            self.trigger_info = Some(entries);
        }
        Ok(self.trigger_info.as_deref().unwrap_or_default())
    }

    pub fn finish(self) -> CaptureOutcome {
        CaptureOutcome {
            overflow: self.readout.overflow,
            sample_interval_ns: self.info.interval_ns,
            returned_max_samples: self.readout.samples,
            trigger_info: self.trigger_info.unwrap_or_default(),
            completed_at: self.completed_at,
        }
    }
}
