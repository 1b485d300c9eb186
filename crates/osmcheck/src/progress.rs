use log::info;
use std::time::{Duration, Instant};

/// Default number of entities between two progress lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000_000;

/// Progress throttle for long passes.
#[derive(Debug)]
pub struct Tick {
    start: Instant,
    last: Instant,
    every: u64,
}

impl Tick {
    /// A `Tick` that fires at most once per `every` items.
    #[inline]
    pub fn new(every: u64) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            every: every.max(1),
        }
    }

    /// `true` when `count` is a multiple of `every` **and** at least 200 ms
    /// have passed since the previous line.
    #[inline]
    pub fn should(&mut self, count: u64) -> bool {
        const MIN_INTERVAL: Duration = Duration::from_millis(200);
        count % self.every == 0 && self.last.elapsed() >= MIN_INTERVAL
    }

    #[inline]
    pub fn bump(&mut self) {
        self.last = Instant::now();
    }

    /// Processing rate in million items per second.
    #[inline]
    pub fn rate_mps(&self, count: u64) -> f64 {
        const ONE_MILLION: f64 = 1_000_000.0;

        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);

        (count as f64) / ONE_MILLION / elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Counts entities of one pass and logs a throttled progress line.
#[derive(Debug)]
pub struct PassProgress {
    label: &'static str,
    seen: u64,
    tick: Tick,
}

impl PassProgress {
    pub fn new(label: &'static str, every: u64) -> Self {
        Self {
            label,
            seen: 0,
            tick: Tick::new(every),
        }
    }

    #[inline]
    pub fn step(&mut self) {
        self.seen += 1;
        if self.tick.should(self.seen) {
            info!(
                "{}: entities seen {:>12}, rate {:5.2} M/s",
                self.label,
                self.seen,
                self.tick.rate_mps(self.seen)
            );
            self.tick.bump();
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Logs the closing line of the pass.
    pub fn done(&self) {
        info!(
            "{}: done, {} entities in {:.1}s",
            self.label,
            self.seen,
            self.tick.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_on_multiples() {
        let mut tick = Tick::new(4);
        tick.last = Instant::now() - Duration::from_secs(1);
        assert!(!tick.should(3));
        assert!(tick.should(8));
        tick.bump();
        assert!(!tick.should(12));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let mut progress = PassProgress::new("test", 0);
        progress.step();
        progress.step();
        assert_eq!(progress.seen(), 2);
    }
}
