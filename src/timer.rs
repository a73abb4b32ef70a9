// Shared timing primitive: "has `timeout` elapsed since this segment
// was last (re)sent". Both state machines use it instead of tracking
// raw `Instant`s inline, the way the teacher's `TCB::on_tick` compares
// `Instant::now()` against a stored send time.

use std::time::{Duration, Instant};

// Tracks the last time something was sent, so a retransmission sweep
// can check "has more than `timeout` elapsed since".
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    last_sent: Instant,
}

impl Deadline {
    pub fn now() -> Deadline {
        Deadline {
            last_sent: Instant::now(),
        }
    }

    pub fn refresh(&mut self) {
        self.last_sent = Instant::now();
    }

    pub fn elapsed_since(&self) -> Duration {
        self.last_sent.elapsed()
    }

    pub fn has_expired(&self, timeout: Duration) -> bool {
        self.elapsed_since() > timeout
    }
}
