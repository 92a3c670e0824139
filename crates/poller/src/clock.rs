//! Clock backed by tokio's timer, so paused-time tests see the same
//! "now" as `tokio::time::sleep`.

use chrono::Utc;
use common::Clock;
use tokio::time::Instant;

/// Wall-clock anchor plus tokio's monotonic elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor_ms: Utc::now().timestamp_millis(),
            anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = self.anchor.elapsed().as_millis().min(i64::MAX as u128) as i64;
        self.anchor_ms.saturating_add(elapsed)
    }
}
