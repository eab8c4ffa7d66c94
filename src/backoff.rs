use std::ops::RangeInclusive;

/// Doubling delay, in seconds, clamped to `range`.
pub struct Backoff {
    range: RangeInclusive<u8>,
    current: u8,
}

impl Backoff {
    pub fn new(range: RangeInclusive<u8>) -> Self {
        Self {
            current: *range.start(),
            range,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u8 {
        let seconds = self.current;
        self.current = self.current.saturating_mul(2).min(*self.range.end());
        seconds
    }

    pub fn reset(&mut self) {
        self.current = *self.range.start();
    }
}
