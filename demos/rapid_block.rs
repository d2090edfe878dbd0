// Rapid block capture against the simulated oscilloscope
//
// Mirrors a classic two-channel experiment: channels A and B at ±20 V DC,
// a 500 mV rising-edge trigger on A, three captures over three segments.

use clap::Parser;
use rapidblock_rs::{
    adc_to_mv, persist::read_capture_file, BlockPlan, CancelToken, ChannelConfig, ChannelId,
    Coupling, DeviceSession, PollPolicy, Resolution, SimScope, SimpleTrigger, VoltageRange,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Run a rapid block capture on the simulated scope")]
struct Args {
    /// Output capture file
    #[arg(long, default_value = "/tmp/capture.json")]
    output: PathBuf,

    /// Pre-trigger samples per segment
    #[arg(long, default_value_t = 400)]
    pre: u32,

    /// Post-trigger samples per segment
    #[arg(long, default_value_t = 100_000)]
    post: u32,

    /// Device memory segments
    #[arg(long, default_value_t = 3)]
    segments: u32,

    /// Captures to acquire (at most the segment count)
    #[arg(long, default_value_t = 3)]
    captures: u32,

    /// Timebase index
    #[arg(long, default_value_t = 2)]
    timebase: u32,

    /// Give up if no trigger arrives within this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("RapidBlock Capture Example");
    println!("==========================\n");

    let mut session = DeviceSession::open(SimScope::new(), Resolution::Bits12)?;
    println!(
        "Device open at {} bits, full-scale code {}",
        session.resolution().bits(),
        session.max_adc()
    );

    session.set_channel(ChannelConfig::enabled(
        ChannelId::A,
        Coupling::Dc,
        VoltageRange::V20,
    ))?;
    session.set_channel(ChannelConfig::enabled(
        ChannelId::B,
        Coupling::Dc,
        VoltageRange::V20,
    ))?;
    session.set_channel(ChannelConfig::disabled(ChannelId::C))?;
    session.set_channel(ChannelConfig::disabled(ChannelId::D))?;
    println!("Channels A and B enabled at ±20 V DC");

    session.arm_trigger(
        SimpleTrigger::start_capturing_when(ChannelId::A, 500.0)
            .rising_edge()
            .with_auto_trigger_ms(1000)
            .build(),
    )?;
    println!("Trigger armed: 500 mV rising edge on channel A\n");

    let plan = BlockPlan::new(
        args.pre,
        args.post,
        args.segments,
        args.captures,
        args.timebase,
    )?;
    let per_segment = session.configure_memory(&plan)?;
    println!(
        "Memory partitioned: {} segments, {} samples available each",
        args.segments, per_segment
    );

    // A process-level signal handler would hold a clone of this token and
    // trip it to interrupt the wait below.
    let cancel = CancelToken::new();
    let policy = PollPolicy::busy()
        .with_interval(Duration::from_micros(50))
        .with_deadline(Duration::from_millis(args.timeout_ms));

    let report = session.run(&plan, &policy, &cancel, &args.output)?;
    println!(
        "Captured {} segments of {} samples in {:?}",
        report.outcome.overflow.len(),
        report.outcome.returned_max_samples,
        report.elapsed
    );
    println!(
        "Sample interval: {} ns, overflowed segments: {}",
        report.outcome.sample_interval_ns,
        report.outcome.overflow_count()
    );
    for info in &report.outcome.trigger_info {
        println!(
            "  segment {}: trigger time {} {:?}, counter {}",
            info.segment_index, info.trigger_time, info.time_units, info.timestamp_counter
        );
    }

    let (metadata, buffers) = read_capture_file(&args.output)?;
    println!("\nRead back {}:", args.output.display());
    for (channel, range) in metadata.channels.iter().zip(&metadata.ranges) {
        let buffer = buffers
            .get(*channel)
            .expect("dataset order matches metadata");
        let peak_mv = buffer
            .segment(0)
            .iter()
            .map(|&s| adc_to_mv(s, *range, metadata.max_adc).abs())
            .fold(0.0, f64::max);
        println!(
            "  channel {channel}: {} captures × {} samples, first-segment peak {:.0} mV",
            buffer.captures(),
            buffer.samples_per_capture(),
            peak_mv
        );
    }

    Ok(())
}
