// src/encoder.rs
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

const ENCODER_FORMAT: &str = "%H:%M:%S %p";
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Source of the value stamped into each log row.
pub trait EncoderSource {
    /// Pure read of the current value; no side effects.
    fn current_value(&self) -> String;
}

/// Wall-clock stand-in until a physical rotary encoder is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockEncoder;

impl EncoderSource for ClockEncoder {
    fn current_value(&self) -> String {
        format_encoder_time(&Local::now())
    }
}

pub fn format_encoder_time(time: &DateTime<Local>) -> String {
    time.format(ENCODER_FORMAT).to_string()
}

/// Keeps the displayed encoder value fresh, re-reading the source once per
/// interval from the UI's repaint loop.
pub struct EncoderPoller {
    source: Box<dyn EncoderSource>,
    interval: Duration,
    displayed: String,
    last_poll: Instant,
}

impl EncoderPoller {
    pub fn new(source: Box<dyn EncoderSource>, now: Instant) -> Self {
        let displayed = source.current_value();
        Self {
            source,
            interval: POLL_INTERVAL,
            displayed,
            last_poll: now,
        }
    }

    /// Refreshes the displayed value if the interval has elapsed.
    /// Returns true when the value was re-read.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_poll) < self.interval {
            return false;
        }
        self.displayed = self.source.current_value();
        self.last_poll = now;
        true
    }

    /// Time until the next refresh is due, for scheduling the next repaint.
    pub fn until_next(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.duration_since(self.last_poll))
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    /// Fresh read for stamping a mark; also updates the display.
    pub fn read(&mut self, now: Instant) -> String {
        self.displayed = self.source.current_value();
        self.last_poll = now;
        self.displayed.clone()
    }
}
