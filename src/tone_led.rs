//! Buzzer and status-LED hardware interfaces. LED blink pacing itself lives in [`crate::timebase`].

pub use crate::timebase::LedMode;

/// Programmable-period/duty tone generator, driven directly by the
/// continuity and auto-hold handlers.
pub trait ToneGen {
    fn set(&mut self, period_ms: u16, duty_percent: u8);
    fn off(&mut self);
}

/// The single front-panel status LED.
pub trait StatusLed {
    fn set(&mut self, mode: LedMode);
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    #[derive(Default)]
    pub struct RecordingTone {
        pub last: Option<(u16, u8)>,
    }

    impl ToneGen for RecordingTone {
        fn set(&mut self, period_ms: u16, duty_percent: u8) {
            self.last = Some((period_ms, duty_percent));
        }
        fn off(&mut self) {
            self.last = None;
        }
    }

    #[derive(Default)]
    pub struct RecordingLed {
        pub mode: Option<LedMode>,
    }

    impl StatusLed for RecordingLed {
        fn set(&mut self, mode: LedMode) {
            self.mode = Some(mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn tone_records_and_clears() {
        let mut tone = RecordingTone::default();
        tone.set(500, 50);
        assert_eq!(tone.last, Some((500, 50)));
        tone.off();
        assert_eq!(tone.last, None);
    }

    #[test]
    fn led_records_mode() {
        let mut led = RecordingLed::default();
        led.set(LedMode::FastBlink);
        assert_eq!(led.mode, Some(LedMode::FastBlink));
    }
}
