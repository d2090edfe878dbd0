use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical input channel of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    A,
    B,
    C,
    D,
}

impl ChannelId {
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input coupling of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Dc => "DC",
        }
    }
}

/// Full-scale input voltage range of a channel.
///
/// The full-scale value in millivolts is what links raw ADC counts back to
/// physical units, so it is persisted alongside the captured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoltageRange {
    Mv10,
    Mv20,
    Mv50,
    Mv100,
    Mv200,
    Mv500,
    V1,
    V2,
    V5,
    V10,
    V20,
    V50,
}

impl VoltageRange {
    /// Full-scale value in millivolts (the range is symmetric around 0 V).
    pub fn full_scale_mv(&self) -> f64 {
        match self {
            Self::Mv10 => 10.0,
            Self::Mv20 => 20.0,
            Self::Mv50 => 50.0,
            Self::Mv100 => 100.0,
            Self::Mv200 => 200.0,
            Self::Mv500 => 500.0,
            Self::V1 => 1_000.0,
            Self::V2 => 2_000.0,
            Self::V5 => 5_000.0,
            Self::V10 => 10_000.0,
            Self::V20 => 20_000.0,
            Self::V50 => 50_000.0,
        }
    }
}

/// ADC bit depth, fixed when the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Bits8,
    Bits12,
    Bits14,
    Bits15,
    Bits16,
}

impl Resolution {
    pub fn bits(&self) -> u8 {
        match self {
            Self::Bits8 => 8,
            Self::Bits12 => 12,
            Self::Bits14 => 14,
            Self::Bits15 => 15,
            Self::Bits16 => 16,
        }
    }
}

/// One channel's acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pub channel: ChannelId,
    pub enabled: bool,
    pub coupling: Coupling,
    pub range: VoltageRange,
    pub offset_volts: f64,
}

impl ChannelConfig {
    /// An enabled DC channel with no analog offset.
    pub fn enabled(channel: ChannelId, coupling: Coupling, range: VoltageRange) -> Self {
        Self {
            channel,
            enabled: true,
            coupling,
            range,
            offset_volts: 0.0,
        }
    }

    /// A disabled channel. Coupling and range are still sent to the driver
    /// but the channel takes no part in buffers, triggering or persistence.
    pub fn disabled(channel: ChannelId) -> Self {
        Self {
            channel,
            enabled: false,
            coupling: Coupling::Dc,
            range: VoltageRange::V20,
            offset_volts: 0.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} was already configured in this session")]
    AlreadyConfigured(ChannelId),
}

/// Ordered registry of the channels that will participate in a capture.
///
/// Insertion order is load-bearing: buffer generation, device buffer
/// registration and persisted dataset naming all replay this order.
/// A channel may be configured at most once per session; repeats are
/// rejected rather than guessed at.
#[derive(Debug, Default)]
pub struct ActiveChannels {
    entries: Vec<(ChannelId, VoltageRange)>,
    configured: [bool; 4],
}

impl ActiveChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a channel configuration. Enabled channels enter the registry
    /// in call order; disabled ones are only marked as configured.
    pub fn record(&mut self, config: &ChannelConfig) -> Result<(), ChannelError> {
        let idx = config.channel.index();
        if self.configured[idx] {
            return Err(ChannelError::AlreadyConfigured(config.channel));
        }
        self.configured[idx] = true;
        if config.enabled {
            self.entries.push((config.channel, config.range));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, VoltageRange)> + '_ {
        self.entries.iter().copied()
    }

    /// The configured range of an enabled channel, if it is enabled.
    pub fn range_of(&self, channel: ChannelId) -> Option<VoltageRange> {
        self.entries
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, r)| *r)
    }

    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.entries.iter().any(|(c, _)| *c == channel)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.entries.iter().map(|(c, _)| *c).collect()
    }

    pub fn ranges(&self) -> Vec<VoltageRange> {
        self.entries.iter().map(|(_, r)| *r).collect()
    }
}
