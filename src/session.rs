//! The capture session: one device, one configuration pass, one run.
//!
//! `DeviceSession` owns the device handle, the active-channel registry and
//! an ordered log of (stage, status) pairs for diagnostics. Whatever happens
//! during `run()`, the device is stopped and closed exactly once; that is
//! the only path that releases device-side segment memory.

use crate::block::{BlockPlan, BlockRunner, CancelToken, CaptureError, CaptureOutcome, PollPolicy};
use crate::buffers::{BufferError, BufferSet};
use crate::channel::{ActiveChannels, ChannelConfig, ChannelError, ChannelId, Resolution};
use crate::driver::{DeviceHandle, DriverError, ScopeDriver};
use crate::persist::{self, CaptureMetadata, PersistError};
use crate::trigger::{SimpleTrigger, TriggerError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Stages of the capture sequence, in the order the session issues them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OpenUnit,
    MaximumValue,
    MemorySegments,
    SetCaptureCount,
    SetChannel,
    SetTrigger,
    SetDataBuffer,
    GetTimebase,
    RunBlock,
    GetValuesBulk,
    GetTriggerInfo,
    WriteFile,
    Stop,
    CloseUnit,
}

/// One entry of the session's diagnostic log. Status 0 is success; driver
/// failures record their vendor-style status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: Stage,
    pub status: u32,
}

fn driver_status<T>(result: &Result<T, DriverError>) -> u32 {
    result.as_ref().err().map_or(0, DriverError::status_code)
}

fn capture_status<T>(result: &Result<T, CaptureError>) -> u32 {
    result.as_ref().err().map_or(0, CaptureError::status_code)
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is already closed")]
    SessionClosed,

    #[error("no channels are enabled; configure at least one before capturing")]
    NoActiveChannels,

    #[error("trigger source channel {channel} is not enabled")]
    TriggerSourceDisabled { channel: ChannelId },

    #[error("channel configuration: {0}")]
    Channel(#[from] ChannelError),

    #[error("trigger configuration: {0}")]
    Trigger(#[from] TriggerError),

    #[error("buffer management: {0}")]
    Buffer(#[from] BufferError),

    #[error("block capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("driver: {0}")]
    Driver(#[from] DriverError),

    #[error("persistence: {0}")]
    Persist(#[from] PersistError),
}

/// What one completed capture cycle produced.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: CaptureOutcome,
    pub buffers: BufferSet,
    /// Time from buffer generation to the end of bulk retrieval.
    pub elapsed: Duration,
    pub path: PathBuf,
}

/// An open instrument plus everything configured against it.
pub struct DeviceSession<D: ScopeDriver> {
    driver: D,
    handle: DeviceHandle,
    resolution: Resolution,
    max_adc: i16,
    active: ActiveChannels,
    trigger: Option<SimpleTrigger>,
    status_log: Vec<StageStatus>,
    closed: bool,
}

impl<D: ScopeDriver> DeviceSession<D> {
    /// Open the instrument at the requested resolution and query its
    /// full-scale ADC code.
    pub fn open(mut driver: D, resolution: Resolution) -> Result<Self, SessionError> {
        let mut status_log = Vec::new();

        let opened = driver.open(resolution);
        status_log.push(StageStatus {
            stage: Stage::OpenUnit,
            status: driver_status(&opened),
        });
        let handle = opened?;

        let queried = driver.max_adc_code(handle);
        status_log.push(StageStatus {
            stage: Stage::MaximumValue,
            status: driver_status(&queried),
        });
        let max_adc = match queried {
            Ok(code) => code,
            Err(e) => {
                // Never leak an open handle.
                let _ = driver.close(handle);
                return Err(e.into());
            }
        };

        log::info!(
            "device open at {} bits, full-scale code {max_adc}",
            resolution.bits()
        );
        Ok(Self {
            driver,
            handle,
            resolution,
            max_adc,
            active: ActiveChannels::new(),
            trigger: None,
            status_log,
            closed: false,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn max_adc(&self) -> i16 {
        self.max_adc
    }

    pub fn active_channels(&self) -> &ActiveChannels {
        &self.active
    }

    pub fn trigger(&self) -> Option<&SimpleTrigger> {
        self.trigger.as_ref()
    }

    /// Ordered (stage, status) log of every driver interaction so far.
    pub fn status_log(&self) -> &[StageStatus] {
        &self.status_log
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    /// Partition device memory for the plan's segments and set the capture
    /// count. Returns the achievable per-segment sample capacity.
    pub fn configure_memory(&mut self, plan: &BlockPlan) -> Result<u32, SessionError> {
        self.ensure_open()?;

        let partitioned = self.driver.memory_segments(self.handle, plan.segments);
        self.status_log.push(StageStatus {
            stage: Stage::MemorySegments,
            status: driver_status(&partitioned),
        });
        let per_segment = partitioned?;
        if per_segment < plan.max_samples() {
            return Err(DriverError::InsufficientMemory {
                segments: plan.segments,
                samples: plan.max_samples(),
            }
            .into());
        }

        let counted = self.driver.set_capture_count(self.handle, plan.captures);
        self.status_log.push(StageStatus {
            stage: Stage::SetCaptureCount,
            status: driver_status(&counted),
        });
        counted?;

        log::debug!(
            "memory partitioned: {} segments, {} samples each",
            plan.segments,
            per_segment
        );
        Ok(per_segment)
    }

    /// Apply one channel's settings. Enabled channels enter the active
    /// registry in call order; configuring the same channel twice is a
    /// caller error. A failure here aborts session startup; there is no
    /// partial-configuration recovery.
    pub fn set_channel(&mut self, config: ChannelConfig) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.active.record(&config)?;

        let applied = self.driver.set_channel(self.handle, &config);
        self.status_log.push(StageStatus {
            stage: Stage::SetChannel,
            status: driver_status(&applied),
        });
        applied?;

        log::debug!(
            "channel {} {}: {} coupled, ±{} mV, offset {} V",
            config.channel,
            if config.enabled { "enabled" } else { "disabled" },
            config.coupling.as_str(),
            config.range.full_scale_mv(),
            config.offset_volts
        );
        Ok(())
    }

    /// Convert the trigger threshold against the source channel's configured
    /// range and arm it. The range is looked up in the registry, so the
    /// threshold can never be scaled against a different range than the
    /// channel actually uses.
    pub fn arm_trigger(&mut self, trigger: SimpleTrigger) -> Result<(), SessionError> {
        self.ensure_open()?;
        let range = self
            .active
            .range_of(trigger.source)
            .ok_or(SessionError::TriggerSourceDisabled {
                channel: trigger.source,
            })?;
        let threshold_adc = trigger.threshold_adc(range, self.max_adc)?;

        let armed = self.driver.set_simple_trigger(
            self.handle,
            trigger.source,
            threshold_adc,
            trigger.direction,
            trigger.delay_samples,
            trigger.auto_trigger_ms,
        );
        self.status_log.push(StageStatus {
            stage: Stage::SetTrigger,
            status: driver_status(&armed),
        });
        armed?;

        log::debug!(
            "trigger armed on channel {}: {} mV ({} counts), {} edge",
            trigger.source,
            trigger.threshold_mv,
            threshold_adc,
            trigger.direction.as_str()
        );
        self.trigger = Some(trigger);
        Ok(())
    }

    /// Allocate one zeroed captures×maxSamples buffer per active channel and
    /// register every (channel, segment) row with the device, in registry
    /// order. Any registration failure aborts: a capture must not proceed
    /// with a buffer subset.
    pub fn generate_buffers(&mut self, plan: &BlockPlan) -> Result<BufferSet, SessionError> {
        self.ensure_open()?;
        if self.active.is_empty() {
            return Err(SessionError::NoActiveChannels);
        }

        let buffers = BufferSet::allocate(&self.active, plan.captures, plan.max_samples())?;
        for channel in self.active.channels() {
            for segment in 0..plan.captures {
                let registered =
                    self.driver
                        .register_buffer(self.handle, channel, segment, plan.max_samples());
                self.status_log.push(StageStatus {
                    stage: Stage::SetDataBuffer,
                    status: driver_status(&registered),
                });
                registered?;
            }
        }
        log::debug!(
            "registered {} buffers ({} channels × {} segments)",
            buffers.len() * plan.captures as usize,
            buffers.len(),
            plan.captures
        );
        Ok(buffers)
    }

    /// The full capture cycle: generate buffers, run the block, persist,
    /// stop. Blocks the calling thread for the capture's whole duration;
    /// run it on a dedicated worker and keep a [`CancelToken`] clone on the
    /// control side.
    ///
    /// The device is stopped and closed on every exit path, including
    /// errors; the session is unusable afterwards.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn run<P: AsRef<Path>>(
        &mut self,
        plan: &BlockPlan,
        policy: &PollPolicy,
        cancel: &CancelToken,
        path: P,
    ) -> Result<RunReport, SessionError> {
        self.ensure_open()?;
        let outcome = self.run_inner(plan, policy, cancel, path.as_ref());
        let teardown = self.shutdown();
        match outcome {
            Ok(report) => {
                teardown?;
                log::info!(
                    "capture complete: {} segments in {:?}, written to {}",
                    plan.captures,
                    report.elapsed,
                    report.path.display()
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(teardown_err) = teardown {
                    log::warn!("teardown after failed run also failed: {teardown_err}");
                }
                Err(err)
            }
        }
    }

    fn run_inner(
        &mut self,
        plan: &BlockPlan,
        policy: &PollPolicy,
        cancel: &CancelToken,
        path: &Path,
    ) -> Result<RunReport, SessionError> {
        let started = Instant::now();
        let mut buffers = self.generate_buffers(plan)?;

        let mut runner = BlockRunner::new(&mut self.driver, self.handle);
        let resolved = runner.resolve_timebase(plan);
        self.status_log.push(StageStatus {
            stage: Stage::GetTimebase,
            status: capture_status(&resolved),
        });
        let info = resolved?;

        let armed = runner.arm(plan, info);
        self.status_log.push(StageStatus {
            stage: Stage::RunBlock,
            status: capture_status(&armed),
        });
        let armed = armed?;

        let retrieved = armed.wait(policy, cancel, &mut buffers);
        self.status_log.push(StageStatus {
            stage: Stage::GetValuesBulk,
            status: capture_status(&retrieved),
        });
        let mut retrieved = retrieved?;
        let elapsed = started.elapsed();

        // Diagnostic only: losing trigger timing does not invalidate the
        // sample data, so log and move on.
        let correlated = retrieved.trigger_info().map(<[_]>::to_vec);
        self.status_log.push(StageStatus {
            stage: Stage::GetTriggerInfo,
            status: capture_status(&correlated),
        });
        if let Err(err) = &correlated {
            log::warn!("trigger info fetch failed (capture data unaffected): {err}");
        }
        let outcome = retrieved.finish();

        let metadata = CaptureMetadata {
            sample_interval_ns: outcome.sample_interval_ns,
            max_adc: self.max_adc,
            channels: self.active.channels(),
            ranges: self.active.ranges(),
        };
        let written = persist::write_capture_file(path, &metadata, &buffers);
        self.status_log.push(StageStatus {
            stage: Stage::WriteFile,
            status: u32::from(written.is_err()),
        });
        written?;

        Ok(RunReport {
            outcome,
            buffers,
            elapsed,
            path: path.to_path_buf(),
        })
    }

    /// Stop acquisition and close the handle. Safe to call once; later
    /// calls are no-ops so the guaranteed teardown can never double-release.
    fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stopped = self.driver.stop(self.handle);
        self.status_log.push(StageStatus {
            stage: Stage::Stop,
            status: driver_status(&stopped),
        });
        let closed = self.driver.close(self.handle);
        self.status_log.push(StageStatus {
            stage: Stage::CloseUnit,
            status: driver_status(&closed),
        });

        stopped?;
        closed?;
        log::debug!("device stopped and closed");
        Ok(())
    }

    /// Explicit teardown for sessions that never ran.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.shutdown()
    }
}

impl<D: ScopeDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.shutdown() {
                log::warn!("device teardown during drop failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Coupling, VoltageRange};
    use crate::driver::{BulkReadout, SegmentTriggerInfo, TimebaseInfo};
    use crate::sim::SimScope;
    use crate::trigger::TriggerDirection;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FailPoint {
        MemorySegments,
        RegisterBuffer,
        ResolveTimebase,
        StartBlock,
        ReadSegments,
        TriggerInfo,
    }

    #[derive(Default)]
    struct CallCounts {
        stops: AtomicU32,
        closes: AtomicU32,
        block_starts: AtomicU32,
        retrievals: AtomicU32,
    }

    /// SimScope wrapper that fails at one chosen stage and counts the calls
    /// the teardown guarantees care about.
    struct FaultyScope {
        inner: SimScope,
        fail_at: Option<FailPoint>,
        counts: Arc<CallCounts>,
    }

    impl FaultyScope {
        fn new(inner: SimScope, fail_at: Option<FailPoint>) -> (Self, Arc<CallCounts>) {
            let counts = Arc::new(CallCounts::default());
            (
                Self {
                    inner,
                    fail_at,
                    counts: Arc::clone(&counts),
                },
                counts,
            )
        }

        fn fails_at(&self, point: FailPoint) -> bool {
            self.fail_at == Some(point)
        }
    }

    impl ScopeDriver for FaultyScope {
        fn open(&mut self, resolution: Resolution) -> Result<DeviceHandle, DriverError> {
            self.inner.open(resolution)
        }

        fn max_adc_code(&mut self, handle: DeviceHandle) -> Result<i16, DriverError> {
            self.inner.max_adc_code(handle)
        }

        fn memory_segments(
            &mut self,
            handle: DeviceHandle,
            segments: u32,
        ) -> Result<u32, DriverError> {
            if self.fails_at(FailPoint::MemorySegments) {
                return Err(DriverError::InsufficientMemory {
                    segments,
                    samples: 1,
                });
            }
            self.inner.memory_segments(handle, segments)
        }

        fn set_capture_count(
            &mut self,
            handle: DeviceHandle,
            captures: u32,
        ) -> Result<(), DriverError> {
            self.inner.set_capture_count(handle, captures)
        }

        fn set_channel(
            &mut self,
            handle: DeviceHandle,
            config: &ChannelConfig,
        ) -> Result<(), DriverError> {
            self.inner.set_channel(handle, config)
        }

        fn set_simple_trigger(
            &mut self,
            handle: DeviceHandle,
            source: ChannelId,
            threshold_adc: i16,
            direction: TriggerDirection,
            delay_samples: u32,
            auto_trigger_ms: u16,
        ) -> Result<(), DriverError> {
            self.inner.set_simple_trigger(
                handle,
                source,
                threshold_adc,
                direction,
                delay_samples,
                auto_trigger_ms,
            )
        }

        fn resolve_timebase(
            &mut self,
            handle: DeviceHandle,
            timebase: u32,
            samples: u32,
        ) -> Result<TimebaseInfo, DriverError> {
            if self.fails_at(FailPoint::ResolveTimebase) {
                return Err(DriverError::TimebaseUnsupported { timebase, samples });
            }
            self.inner.resolve_timebase(handle, timebase, samples)
        }

        fn register_buffer(
            &mut self,
            handle: DeviceHandle,
            channel: ChannelId,
            segment: u32,
            samples: u32,
        ) -> Result<(), DriverError> {
            if self.fails_at(FailPoint::RegisterBuffer) {
                return Err(DriverError::BufferRegistrationFailed { channel, segment });
            }
            self.inner.register_buffer(handle, channel, segment, samples)
        }

        fn start_block(
            &mut self,
            handle: DeviceHandle,
            pre_trigger_samples: u32,
            post_trigger_samples: u32,
            timebase: u32,
        ) -> Result<(), DriverError> {
            self.counts.block_starts.fetch_add(1, Ordering::SeqCst);
            if self.fails_at(FailPoint::StartBlock) {
                return Err(DriverError::Status { status: 0x01af });
            }
            self.inner
                .start_block(handle, pre_trigger_samples, post_trigger_samples, timebase)
        }

        fn is_ready(&mut self, handle: DeviceHandle) -> Result<bool, DriverError> {
            self.inner.is_ready(handle)
        }

        fn read_segments(
            &mut self,
            handle: DeviceHandle,
            first_segment: u32,
            last_segment: u32,
            buffers: &mut BufferSet,
        ) -> Result<BulkReadout, DriverError> {
            self.counts.retrievals.fetch_add(1, Ordering::SeqCst);
            if self.fails_at(FailPoint::ReadSegments) {
                return Err(DriverError::Status { status: 0x01b0 });
            }
            self.inner
                .read_segments(handle, first_segment, last_segment, buffers)
        }

        fn trigger_info(
            &mut self,
            handle: DeviceHandle,
            first_segment: u32,
            last_segment: u32,
        ) -> Result<Vec<SegmentTriggerInfo>, DriverError> {
            if self.fails_at(FailPoint::TriggerInfo) {
                return Err(DriverError::Status { status: 0x01b1 });
            }
            self.inner.trigger_info(handle, first_segment, last_segment)
        }

        fn stop(&mut self, handle: DeviceHandle) -> Result<(), DriverError> {
            self.counts.stops.fetch_add(1, Ordering::SeqCst);
            self.inner.stop(handle)
        }

        fn close(&mut self, handle: DeviceHandle) -> Result<(), DriverError> {
            self.counts.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close(handle)
        }
    }

    fn small_plan() -> BlockPlan {
        BlockPlan::new(16, 48, 3, 3, 2).unwrap()
    }

    /// Two channels on, two off, trigger on A: the original experiment's
    /// configuration pass.
    fn configure(session: &mut DeviceSession<FaultyScope>, plan: &BlockPlan) {
        session
            .set_channel(ChannelConfig::enabled(
                ChannelId::A,
                Coupling::Dc,
                VoltageRange::V20,
            ))
            .unwrap();
        session
            .set_channel(ChannelConfig::enabled(
                ChannelId::B,
                Coupling::Dc,
                VoltageRange::V20,
            ))
            .unwrap();
        session
            .set_channel(ChannelConfig::disabled(ChannelId::C))
            .unwrap();
        session
            .set_channel(ChannelConfig::disabled(ChannelId::D))
            .unwrap();
        session
            .arm_trigger(
                SimpleTrigger::start_capturing_when(ChannelId::A, 500.0)
                    .rising_edge()
                    .with_auto_trigger_ms(1000)
                    .build(),
            )
            .unwrap();
        session.configure_memory(plan).unwrap();
    }

    fn session_with(
        fail_at: Option<FailPoint>,
        sim: SimScope,
        plan: &BlockPlan,
    ) -> (DeviceSession<FaultyScope>, Arc<CallCounts>) {
        let (driver, counts) = FaultyScope::new(sim, fail_at);
        let mut session = DeviceSession::open(driver, Resolution::Bits12).unwrap();
        configure(&mut session, plan);
        (session, counts)
    }

    #[test]
    fn two_enabled_channels_give_two_full_size_buffers() {
        let plan = BlockPlan::new(400, 100_000, 3, 3, 2).unwrap();
        let (mut session, _) = session_with(None, SimScope::new(), &plan);

        let buffers = session.generate_buffers(&plan).unwrap();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers.channels(), vec![ChannelId::A, ChannelId::B]);
        for (_, buffer) in buffers.iter() {
            assert_eq!(buffer.captures(), 3);
            assert_eq!(buffer.samples_per_capture(), 100_400);
        }
    }

    #[test]
    fn full_cycle_captures_persists_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        let plan = small_plan();
        let (mut session, counts) = session_with(None, SimScope::new(), &plan);

        let report = session
            .run(&plan, &PollPolicy::busy(), &CancelToken::new(), &path)
            .unwrap();

        assert_eq!(report.buffers.len(), 2);
        assert_eq!(report.outcome.overflow, vec![false, false, false]);
        assert_eq!(report.outcome.overflow_count(), 0);
        assert_eq!(report.outcome.trigger_info.len(), 3);
        assert_eq!(report.outcome.returned_max_samples, 64);
        // timebase 2 resolves to 4 ns/sample in the simulator
        assert!((report.outcome.sample_interval_ns - 4.0).abs() < f32::EPSILON);

        let (metadata, buffers) = persist::read_capture_file(&path).unwrap();
        assert_eq!(metadata.channels, vec![ChannelId::A, ChannelId::B]);
        assert_eq!(metadata.ranges, vec![VoltageRange::V20, VoltageRange::V20]);
        assert_eq!(metadata.max_adc, 32_767);
        assert_eq!(buffers, report.buffers);
        assert!(buffers
            .get(ChannelId::A)
            .unwrap()
            .segment(0)
            .iter()
            .any(|&s| s != 0));

        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);

        // The session is spent; a second run must not touch the device.
        let err = session
            .run(&plan, &PollPolicy::busy(), &CancelToken::new(), &path)
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed));
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_failure_aborts_before_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let plan = small_plan();
        let (mut session, counts) =
            session_with(Some(FailPoint::RegisterBuffer), SimScope::new(), &plan);

        let err = session
            .run(
                &plan,
                &PollPolicy::busy(),
                &CancelToken::new(),
                dir.path().join("capture.json"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Driver(DriverError::BufferRegistrationFailed { .. })
        ));
        assert_eq!(counts.block_starts.load(Ordering::SeqCst), 0);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_and_close_run_exactly_once_whatever_stage_fails() {
        for fail_at in [
            FailPoint::RegisterBuffer,
            FailPoint::ResolveTimebase,
            FailPoint::StartBlock,
            FailPoint::ReadSegments,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let plan = small_plan();
            let (mut session, counts) = session_with(Some(fail_at), SimScope::new(), &plan);

            session
                .run(
                    &plan,
                    &PollPolicy::busy(),
                    &CancelToken::new(),
                    dir.path().join("capture.json"),
                )
                .unwrap_err();
            assert_eq!(counts.stops.load(Ordering::SeqCst), 1, "{fail_at:?}");
            assert_eq!(counts.closes.load(Ordering::SeqCst), 1, "{fail_at:?}");
        }
    }

    #[test]
    fn trigger_info_failure_does_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        let plan = small_plan();
        let (mut session, counts) =
            session_with(Some(FailPoint::TriggerInfo), SimScope::new(), &plan);

        let report = session
            .run(&plan, &PollPolicy::busy(), &CancelToken::new(), &path)
            .unwrap();
        assert!(report.outcome.trigger_info.is_empty());
        assert!(path.exists());
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn config_failure_aborts_startup_and_drop_still_tears_down() {
        let plan = small_plan();
        let (driver, counts) = FaultyScope::new(SimScope::new(), Some(FailPoint::MemorySegments));
        let mut session = DeviceSession::open(driver, Resolution::Bits12).unwrap();
        session
            .set_channel(ChannelConfig::enabled(
                ChannelId::A,
                Coupling::Dc,
                VoltageRange::V20,
            ))
            .unwrap();

        let err = session.configure_memory(&plan).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Driver(DriverError::InsufficientMemory { .. })
        ));
        drop(session);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn segments_that_cannot_hold_the_plan_are_rejected() {
        let plan = small_plan();
        let (driver, _) = FaultyScope::new(SimScope::new().with_capacity(90), None);
        let mut session = DeviceSession::open(driver, Resolution::Bits12).unwrap();
        // 90 samples over 3 segments leaves 30 per segment; the plan needs 64.
        let err = session.configure_memory(&plan).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Driver(DriverError::InsufficientMemory { .. })
        ));
    }

    #[test]
    fn trigger_on_disabled_channel_is_rejected() {
        let (driver, _) = FaultyScope::new(SimScope::new(), None);
        let mut session = DeviceSession::open(driver, Resolution::Bits12).unwrap();
        session
            .set_channel(ChannelConfig::disabled(ChannelId::C))
            .unwrap();

        let err = session
            .arm_trigger(SimpleTrigger::start_capturing_when(ChannelId::C, 500.0).build())
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::TriggerSourceDisabled {
                channel: ChannelId::C
            }
        ));
    }

    #[test]
    fn reconfiguring_a_channel_is_a_caller_error() {
        let (driver, _) = FaultyScope::new(SimScope::new(), None);
        let mut session = DeviceSession::open(driver, Resolution::Bits12).unwrap();
        session
            .set_channel(ChannelConfig::enabled(
                ChannelId::A,
                Coupling::Dc,
                VoltageRange::V20,
            ))
            .unwrap();
        let err = session
            .set_channel(ChannelConfig::enabled(
                ChannelId::A,
                Coupling::Dc,
                VoltageRange::V10,
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::Channel(_)));
        assert_eq!(session.active_channels().len(), 1);
    }

    #[test]
    fn never_ready_device_times_out_instead_of_retrieving() {
        let dir = tempfile::tempdir().unwrap();
        let plan = small_plan();
        let (mut session, counts) = session_with(None, SimScope::new().never_ready(), &plan);

        let policy = PollPolicy::busy()
            .with_deadline(Duration::from_millis(50))
            .with_interval(Duration::from_millis(1));
        let err = session
            .run(
                &plan,
                &policy,
                &CancelToken::new(),
                dir.path().join("capture.json"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Capture(CaptureError::TriggerTimeout { .. })
        ));
        // Retrieval was never attempted without an observed ready flag.
        assert_eq!(counts.retrievals.load(Ordering::SeqCst), 0);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let plan = small_plan();
        let (mut session, counts) = session_with(None, SimScope::new().never_ready(), &plan);

        let cancel = CancelToken::new();
        let control_side = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            control_side.cancel();
        });

        let policy = PollPolicy::busy().with_interval(Duration::from_millis(1));
        let err = session
            .run(&plan, &policy, &cancel, dir.path().join("capture.json"))
            .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(
            err,
            SessionError::Capture(CaptureError::Cancelled { .. })
        ));
        assert_eq!(counts.retrievals.load(Ordering::SeqCst), 0);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_log_records_the_failing_stage() {
        let dir = tempfile::tempdir().unwrap();
        let plan = small_plan();
        let (mut session, _) =
            session_with(Some(FailPoint::ResolveTimebase), SimScope::new(), &plan);

        session
            .run(
                &plan,
                &PollPolicy::busy(),
                &CancelToken::new(),
                dir.path().join("capture.json"),
            )
            .unwrap_err();
        let log = session.status_log();
        let timebase_entry = log
            .iter()
            .find(|s| s.stage == Stage::GetTimebase)
            .unwrap();
        assert_ne!(timebase_entry.status, 0);
        assert_eq!(
            log.iter().filter(|s| s.stage == Stage::Stop).count(),
            1
        );
        assert_eq!(
            log.iter().filter(|s| s.stage == Stage::CloseUnit).count(),
            1
        );
        assert!(!log.iter().any(|s| s.stage == Stage::RunBlock && s.status == 0));
    }
}

