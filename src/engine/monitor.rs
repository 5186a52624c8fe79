//! Prebuffer gate and buffer-health estimate
//!
//! While buffering the reported level is the larger of the real output-queue
//! fill and a linear ramp driven by tick count. The gate opens when either
//! reaches 100 %.

/// Tick-driven buffer monitor
#[derive(Debug, Clone)]
pub struct BufferMonitor {
    limit: u32,
    low_water: u8,
    ticks: u32,
    percent: u8,
}

impl BufferMonitor {
    pub fn new(limit: u32, low_water: u8) -> Self {
        Self {
            limit: limit.max(1),
            low_water,
            ticks: 0,
            percent: 0,
        }
    }

    /// Start of a new chain, or stop
    pub fn reset(&mut self) {
        self.ticks = 0;
        self.percent = 0;
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Advance one tick while buffering; true when output should start
    pub fn on_buffering_tick(&mut self, real: Option<u8>) -> bool {
        self.ticks = (self.ticks + 1).min(self.limit);
        let ramp = (self.ticks * 100 / self.limit) as u8;
        let real = real.unwrap_or(0).min(100);

        self.percent = self.percent.max(real.max(ramp)).min(100);
        let ready = self.ticks >= self.limit || real >= 100;
        if ready {
            self.percent = 100;
        }
        tracing::debug!(
            "Buffering: {}% (real: {}%, tick {}/{})",
            self.percent,
            real,
            self.ticks,
            self.limit
        );
        ready
    }

    /// Track the real fill level while playing; no corrective action
    pub fn on_playing_tick(&mut self, real: Option<u8>) -> u8 {
        self.ticks = self.limit;
        // Without a signal the last estimate stands
        if let Some(real) = real {
            self.percent = real.min(100);
            if self.percent > 0 && self.percent < self.low_water {
                tracing::warn!("Buffer low: {}%", self.percent);
            }
        }
        self.percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ramp_without_real_signal() {
        let mut monitor = BufferMonitor::new(30, 30);
        for tick in 1..30 {
            assert!(!monitor.on_buffering_tick(None));
            assert_eq!(monitor.percent() as u32, tick * 100 / 30);
        }
        assert!(monitor.on_buffering_tick(None));
        assert_eq!(monitor.percent(), 100);
    }

    #[test]
    fn test_real_fill_wins_early() {
        let mut monitor = BufferMonitor::new(30, 30);
        assert!(!monitor.on_buffering_tick(Some(60)));
        assert_eq!(monitor.percent(), 60);
        assert!(monitor.on_buffering_tick(Some(100)));
        assert_eq!(monitor.ticks(), 2);
        assert_eq!(monitor.percent(), 100);
    }

    #[test]
    fn test_playing_tracks_real_or_keeps_last() {
        let mut monitor = BufferMonitor::new(3, 30);
        while !monitor.on_buffering_tick(None) {}
        assert_eq!(monitor.on_playing_tick(None), 100);
        assert_eq!(monitor.on_playing_tick(Some(20)), 20);
        assert_eq!(monitor.on_playing_tick(None), 20);

        monitor.reset();
        assert_eq!(monitor.percent(), 0);
        assert_eq!(monitor.ticks(), 0);
    }

    proptest! {
        #[test]
        fn prop_monotonic_while_buffering(
            limit in 1u32..60,
            samples in proptest::collection::vec(proptest::option::of(0u8..=120), 1..80),
        ) {
            let mut monitor = BufferMonitor::new(limit, 30);
            let mut last = monitor.percent();
            prop_assert_eq!(last, 0);
            for real in samples {
                let ready = monitor.on_buffering_tick(real);
                prop_assert!(monitor.percent() >= last);
                prop_assert!(monitor.percent() <= 100);
                last = monitor.percent();
                if ready {
                    prop_assert_eq!(last, 100);
                    break;
                }
            }
        }
    }
}
