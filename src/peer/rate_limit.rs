use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window counter: at most `max` admissions within any trailing `window`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max: usize,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            window,
            max,
            hits: VecDeque::with_capacity(max),
        }
    }

    /// Records a hit at `now` if the window has room. Stale entries are pruned first.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    pub fn reset(&mut self) {
        self.hits.clear();
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// One-shot warning latch: fires once per violation streak, re-arms on the next good message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoticeLatch {
    fired: bool,
}

impl NoticeLatch {
    /// True the first time it is called after construction or `rearm`.
    pub fn fire(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }

    pub fn rearm(&mut self) {
        self.fired = false;
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_within_window() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(3, Duration::from_millis(100));
        assert!(rl.try_acquire(start));
        assert!(rl.try_acquire(start));
        assert!(rl.try_acquire(start + Duration::from_millis(10)));
        assert!(!rl.try_acquire(start + Duration::from_millis(20)));
        assert_eq!(rl.len(), 3);
    }

    #[test]
    fn window_slides() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(2, Duration::from_millis(100));
        assert!(rl.try_acquire(start));
        assert!(rl.try_acquire(start + Duration::from_millis(50)));
        assert!(!rl.try_acquire(start + Duration::from_millis(99)));
        // first hit ages out, second is still inside
        assert!(rl.try_acquire(start + Duration::from_millis(100)));
        assert!(!rl.try_acquire(start + Duration::from_millis(120)));
        assert!(rl.try_acquire(start + Duration::from_millis(150)));
    }

    #[test]
    fn rejected_hits_do_not_extend_the_window() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(1, Duration::from_millis(100));
        assert!(rl.try_acquire(start));
        for ms in 1..100 {
            assert!(!rl.try_acquire(start + Duration::from_millis(ms)));
        }
        assert!(rl.try_acquire(start + Duration::from_millis(100)));
    }

    #[test]
    fn reset_clears_history() {
        let start = Instant::now();
        let mut rl = RateLimiter::new(1, Duration::from_secs(5));
        assert!(rl.try_acquire(start));
        rl.reset();
        assert!(rl.is_empty());
        assert!(rl.try_acquire(start));
    }

    #[test]
    fn latch_fires_once_per_streak() {
        let mut latch = NoticeLatch::default();
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
        latch.rearm();
        assert!(latch.fire());
    }
}
