// ── Update interval policy ──

use std::time::Duration;

/// How long the connection service waits between updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPolicy {
    /// While starting up, or with nothing known or connected.
    pub low: Duration,
    /// While some advertised event-loops are still unconnected.
    pub mid: Duration,
    /// Once every advertised event-loop is connected.
    pub high: Duration,
    /// Stay at `low` for this long after the service starts.
    pub warmup: Duration,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            low: Duration::from_secs(1),
            mid: Duration::from_secs(5),
            high: Duration::from_secs(30),
            warmup: Duration::from_secs(30),
        }
    }
}

impl IntervalPolicy {
    /// Pick the next delay. `eventloops` is `None` until the region has
    /// advertised any.
    pub fn next(&self, uptime: Duration, eventloops: Option<usize>, connections: usize) -> Duration {
        let advertised = eventloops.unwrap_or(0);
        if uptime < self.warmup || advertised == 0 || connections == 0 {
            self.low
        } else if connections < advertised {
            self.mid
        } else {
            self.high
        }
    }
}
