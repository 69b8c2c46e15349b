use std::time::Duration;

use tokio::time::Instant;

/// Cooldown applied when the upstream API signals a rate limit without a
/// retry hint.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Minimum gap between consecutive upstream call starts.
pub const MIN_REQUEST_GAP: Duration = Duration::from_millis(1000);

/// Timing state guarding outgoing requests. Two independent controls:
/// a hard cooldown that rejects submissions while armed, and soft pacing
/// that only ever delays them.
///
/// Owned by the session behind one mutex together with the store, as it
/// is touched from the submit flow, the periodic tick, and conversation
/// switches.
#[derive(Debug, Default)]
pub struct CooldownController {
    cooldown_until: Option<Instant>,
    last_request_at: Option<Instant>,
}

impl CooldownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining whole seconds of an armed cooldown, rounded up. Expired
    /// cooldowns are cleared lazily here, so callers checking the gate
    /// never see a stale block.
    pub fn active_cooldown_secs(&mut self) -> Option<u64> {
        let until = self.cooldown_until?;
        let now = Instant::now();
        if now >= until {
            self.cooldown_until = None;
            return None;
        }
        let millis = until.duration_since(now).as_millis() as u64;
        Some(millis.div_ceil(1000))
    }

    /// Arm from an upstream rate-limit failure, honoring the server
    /// retry hint when given.
    pub fn arm(&mut self, retry_after_secs: Option<u64>) {
        let duration = retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COOLDOWN);
        self.cooldown_until = Some(Instant::now() + duration);
    }

    /// Cleared unconditionally on the next successful response.
    pub fn clear(&mut self) {
        self.cooldown_until = None;
    }

    pub fn is_armed(&self) -> bool {
        self.cooldown_until.is_some()
    }

    /// Periodic expiry check. Returns true when an armed cooldown just
    /// elapsed.
    pub fn tick(&mut self) -> bool {
        match self.cooldown_until {
            Some(until) if Instant::now() >= until => {
                self.cooldown_until = None;
                true
            }
            _ => false,
        }
    }

    /// How long the submit path must wait before starting the next
    /// upstream call. Zero when enough time has passed; never rejects.
    pub fn pacing_delay(&self) -> Duration {
        match self.last_request_at {
            Some(last) => MIN_REQUEST_GAP.saturating_sub(Instant::now().duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn mark_request_start(&mut self) {
        self.last_request_at = Some(Instant::now());
    }
}
