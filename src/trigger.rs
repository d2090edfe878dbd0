use crate::channel::{ChannelId, VoltageRange};

/// Edge or level condition that fires the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDirection {
    Above,
    Below,
    Rising,
    Falling,
    RisingOrFalling,
}

impl TriggerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::RisingOrFalling => "rising-or-falling",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("threshold {threshold_mv} mV is outside the ±{full_scale_mv} mV input range")]
    ThresholdOutOfRange {
        threshold_mv: f64,
        full_scale_mv: f64,
    },
}

/// Convert a threshold in millivolts to raw ADC counts.
///
/// Linear in the threshold and rounded to the nearest count:
/// full scale of the selected range maps to `max_adc`, 0 mV maps to 0.
pub fn mv_to_adc(millivolts: f64, range: VoltageRange, max_adc: i16) -> i16 {
    let scaled = millivolts / range.full_scale_mv() * f64::from(max_adc);
    let clamped = scaled
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    clamped as i16
}

/// Convert raw ADC counts back to millivolts. Inverse of [`mv_to_adc`]
/// up to rounding; the persisted metadata exists to feed this later.
pub fn adc_to_mv(raw: i16, range: VoltageRange, max_adc: i16) -> f64 {
    f64::from(raw) / f64::from(max_adc) * range.full_scale_mv()
}

/// A single-source, single-threshold trigger.
///
/// The threshold is kept in millivolts; conversion to device counts happens
/// at arm time against the source channel's configured range, so the two can
/// never disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleTrigger {
    pub source: ChannelId,
    pub threshold_mv: f64,
    pub direction: TriggerDirection,
    pub delay_samples: u32,
    pub auto_trigger_ms: u16,
}

impl SimpleTrigger {
    pub fn start_capturing_when(source: ChannelId, threshold_mv: f64) -> SimpleTriggerBuilder {
        SimpleTriggerBuilder {
            source,
            threshold_mv,
            direction: TriggerDirection::Rising,
            delay_samples: 0,
            auto_trigger_ms: 0,
        }
    }

    /// Threshold in ADC counts for the given range and full-scale code.
    pub fn threshold_adc(
        &self,
        range: VoltageRange,
        max_adc: i16,
    ) -> Result<i16, TriggerError> {
        if self.threshold_mv.abs() > range.full_scale_mv() {
            return Err(TriggerError::ThresholdOutOfRange {
                threshold_mv: self.threshold_mv,
                full_scale_mv: range.full_scale_mv(),
            });
        }
        Ok(mv_to_adc(self.threshold_mv, range, max_adc))
    }
}

#[derive(Debug)]
pub struct SimpleTriggerBuilder {
    source: ChannelId,
    threshold_mv: f64,
    direction: TriggerDirection,
    delay_samples: u32,
    auto_trigger_ms: u16,
}

impl SimpleTriggerBuilder {
    pub fn rising_edge(mut self) -> Self {
        self.direction = TriggerDirection::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.direction = TriggerDirection::Falling;
        self
    }

    pub fn either_edge(mut self) -> Self {
        self.direction = TriggerDirection::RisingOrFalling;
        self
    }

    pub fn above_level(mut self) -> Self {
        self.direction = TriggerDirection::Above;
        self
    }

    pub fn below_level(mut self) -> Self {
        self.direction = TriggerDirection::Below;
        self
    }

    /// Delay between the trigger event and the first post-trigger sample.
    pub fn with_delay_samples(mut self, samples: u32) -> Self {
        self.delay_samples = samples;
        self
    }

    /// Fire anyway after this many milliseconds without a trigger.
    /// 0 waits indefinitely.
    pub fn with_auto_trigger_ms(mut self, millis: u16) -> Self {
        self.auto_trigger_ms = millis;
        self
    }

    pub fn build(self) -> SimpleTrigger {
        SimpleTrigger {
            source: self.source,
            threshold_mv: self.threshold_mv,
            direction: self.direction,
            delay_samples: self.delay_samples,
            auto_trigger_ms: self.auto_trigger_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_millivolts_is_zero_counts() {
        assert_eq!(mv_to_adc(0.0, VoltageRange::V20, 32767), 0);
    }

    #[test]
    fn conversion_is_linear_and_monotonic() {
        let max_adc = 32767;
        let a = mv_to_adc(250.0, VoltageRange::V20, max_adc);
        let b = mv_to_adc(500.0, VoltageRange::V20, max_adc);
        let c = mv_to_adc(1000.0, VoltageRange::V20, max_adc);
        assert!(a < b && b < c);
        // Doubling the threshold doubles the count, up to rounding.
        assert!((i32::from(b) - 2 * i32::from(a)).abs() <= 1);
        assert!((i32::from(c) - 2 * i32::from(b)).abs() <= 1);
    }

    #[test]
    fn documented_scaling_example() {
        // 500 mV on a ±20 V range with a 32767 full-scale code.
        let expected = (500.0_f64 / 20_000.0 * 32_767.0).round() as i16;
        assert_eq!(mv_to_adc(500.0, VoltageRange::V20, 32767), expected);
        assert_eq!(expected, 819);
    }

    #[test]
    fn adc_to_mv_inverts_mv_to_adc() {
        let counts = mv_to_adc(1500.0, VoltageRange::V5, 32767);
        let mv = adc_to_mv(counts, VoltageRange::V5, 32767);
        assert!((mv - 1500.0).abs() < 0.2);
    }

    #[test]
    fn builder_defaults_to_rising_edge() {
        let trigger = SimpleTrigger::start_capturing_when(ChannelId::A, 500.0).build();
        assert_eq!(trigger.direction, TriggerDirection::Rising);
        assert_eq!(trigger.delay_samples, 0);
        assert_eq!(trigger.auto_trigger_ms, 0);
    }

    #[test]
    fn threshold_outside_range_is_rejected() {
        let trigger = SimpleTrigger::start_capturing_when(ChannelId::A, 25_000.0)
            .falling_edge()
            .build();
        assert!(trigger.threshold_adc(VoltageRange::V20, 32767).is_err());
        assert!(trigger.threshold_adc(VoltageRange::V50, 32767).is_ok());
    }
}
