//! # RapidBlock RS
//!
//! A Rust library for driving PicoScope-class multi-channel oscilloscopes in
//! rapid block mode: configure channels and a trigger, partition device
//! memory into segments, capture many triggered waveform segments back to
//! back, bulk-retrieve them together with per-segment trigger timing, and
//! persist everything with the metadata needed to reconstruct physical units
//! later.
//!
//! The vendor driver is abstracted behind the [`ScopeDriver`] trait; the
//! bundled [`SimScope`] implements it in-process so the whole capture path
//! runs without hardware.
//!
//! ## Features
//!
//! - **Channel configuration**: coupling, voltage range and offset per
//!   channel, with an ordered active-channel registry that keeps buffers and
//!   persisted datasets aligned
//! - **Trigger configuration**: single-source threshold triggers with a
//!   builder pattern; thresholds are converted against the source channel's
//!   own range so the two can never disagree
//! - **Segmented capture**: one buffer row per (channel, segment), armed
//!   once and bulk-retrieved after the ready flag
//! - **Bounded waiting**: the ready poll takes a deadline and a
//!   [`CancelToken`], so a trigger that never arrives is a reportable
//!   timeout instead of a hang
//! - **Guaranteed teardown**: the device is stopped and closed exactly once
//!   on every exit path, success or failure
//! - **Persistence**: metadata plus per-channel datasets, written to a
//!   temporary path and atomically renamed into place
//!
//! ## Examples
//!
//! ### A full capture cycle
//!
//! ```rust,no_run
//! use rapidblock_rs::{
//!     BlockPlan, CancelToken, ChannelConfig, ChannelId, Coupling, DeviceSession, PollPolicy,
//!     Resolution, SimScope, SimpleTrigger, VoltageRange,
//! };
//! use std::time::Duration;
//!
//! let mut session = DeviceSession::open(SimScope::new(), Resolution::Bits12)?;
//!
//! // Two channels on, two off; the trigger watches channel A at 500 mV.
//! session.set_channel(ChannelConfig::enabled(ChannelId::A, Coupling::Dc, VoltageRange::V20))?;
//! session.set_channel(ChannelConfig::enabled(ChannelId::B, Coupling::Dc, VoltageRange::V20))?;
//! session.set_channel(ChannelConfig::disabled(ChannelId::C))?;
//! session.set_channel(ChannelConfig::disabled(ChannelId::D))?;
//! session.arm_trigger(
//!     SimpleTrigger::start_capturing_when(ChannelId::A, 500.0)
//!         .rising_edge()
//!         .with_auto_trigger_ms(1000)
//!         .build(),
//! )?;
//!
//! // 3 captures over 3 segments, 400 pre- + 100_000 post-trigger samples.
//! let plan = BlockPlan::new(400, 100_000, 3, 3, 2)?;
//! session.configure_memory(&plan)?;
//!
//! let policy = PollPolicy::busy().with_deadline(Duration::from_secs(10));
//! let report = session.run(&plan, &policy, &CancelToken::new(), "/tmp/capture.json")?;
//! println!(
//!     "captured {} segments in {:?}",
//!     report.outcome.overflow.len(),
//!     report.elapsed
//! );
//! # Ok::<(), rapidblock_rs::SessionError>(())
//! ```
//!
//! ### Trigger configuration
//!
//! ```rust
//! use rapidblock_rs::{ChannelId, SimpleTrigger, TriggerDirection};
//!
//! let trigger = SimpleTrigger::start_capturing_when(ChannelId::A, 500.0)
//!     .rising_edge()
//!     .with_auto_trigger_ms(1000)
//!     .build();
//! assert_eq!(trigger.direction, TriggerDirection::Rising);
//! ```
//!
//! ### Unit conversion
//!
//! ```rust
//! use rapidblock_rs::{adc_to_mv, mv_to_adc, VoltageRange};
//!
//! let counts = mv_to_adc(500.0, VoltageRange::V20, 32767);
//! assert_eq!(counts, 819);
//! let millivolts = adc_to_mv(counts, VoltageRange::V20, 32767);
//! assert!((millivolts - 500.0).abs() < 0.2);
//! ```
//!
//! ### Reading a capture file back
//!
//! ```rust,no_run
//! use rapidblock_rs::persist::read_capture_file;
//! use std::path::Path;
//!
//! let (metadata, buffers) = read_capture_file(Path::new("/tmp/capture.json"))?;
//! for (channel, range) in metadata.channels.iter().zip(&metadata.ranges) {
//!     let buffer = buffers.get(*channel).expect("dataset order matches metadata");
//!     println!("channel {channel}: {} captures, ±{} mV", buffer.captures(), range.full_scale_mv());
//! }
//! # Ok::<(), rapidblock_rs::PersistError>(())
//! ```

pub mod block;
pub mod buffers;
pub mod channel;
pub mod driver;
pub mod persist;
pub mod session;
pub mod sim;
pub mod trigger;

// Re-export the main types for convenience
pub use block::{BlockPlan, CancelToken, CaptureError, CaptureOutcome, PollPolicy};

pub use buffers::{BufferError, BufferSet, SegmentBuffer};

pub use channel::{
    ActiveChannels, ChannelConfig, ChannelError, ChannelId, Coupling, Resolution, VoltageRange,
};

pub use driver::{
    BulkReadout, DeviceHandle, DriverError, ScopeDriver, SegmentTriggerInfo, TimebaseInfo,
    TriggerTimeUnits,
};

pub use persist::{CaptureMetadata, PersistError};

pub use session::{DeviceSession, RunReport, SessionError, Stage, StageStatus};

pub use sim::SimScope;

pub use trigger::{
    adc_to_mv, mv_to_adc, SimpleTrigger, SimpleTriggerBuilder, TriggerDirection, TriggerError,
};
