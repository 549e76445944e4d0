use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::source_config::RateLimitConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Sliding-window limiter owned by one source.
///
/// Callers over the ceiling are suspended until the window admits them;
/// requests are never dropped. A limit of zero means unlimited.
pub struct RateLimiter {
    per_minute: u32,
    per_hour: Option<u32>,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: Option<u32>) -> Self {
        Self {
            per_minute,
            per_hour,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.requests_per_hour)
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let now = Instant::now();
                while history
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= HOUR)
                {
                    history.pop_front();
                }

                match self.delay_needed(&history, now) {
                    None => {
                        history.push_back(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    fn delay_needed(&self, history: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        let minute = window_delay(history, now, MINUTE, self.per_minute);
        let hour = self
            .per_hour
            .and_then(|limit| window_delay(history, now, HOUR, limit));
        match (minute, hour) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Time until the oldest request inside `window` leaves it, if the window is full.
fn window_delay(
    history: &VecDeque<Instant>,
    now: Instant,
    window: Duration,
    limit: u32,
) -> Option<Duration> {
    if limit == 0 {
        return None;
    }
    let in_window: Vec<&Instant> = history
        .iter()
        .filter(|t| now.duration_since(**t) < window)
        .collect();
    if in_window.len() < limit as usize {
        return None;
    }
    // the request that must expire before another is admitted
    let blocking = in_window[in_window.len() - limit as usize];
    Some((*blocking + window).saturating_duration_since(now))
}
