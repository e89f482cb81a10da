use std::time::Duration;
use tokio::time::Instant;

/// Coalesces local pointer samples into at most one outbound move per frame.
///
/// Only the newest sample survives until its frame fires. At most one frame is
/// outstanding at a time.
#[derive(Debug)]
pub struct PointerScheduler {
    frame_interval: Duration,
    pending: Option<(f64, f64)>,
    frame_due: Option<Instant>,
    /// Pointer is over the controllable surface; cleared by `leave`.
    inside: bool,
}

impl PointerScheduler {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            pending: None,
            frame_due: None,
            inside: false,
        }
    }

    pub fn sample(&mut self, x: f64, y: f64, now: Instant) {
        self.pending = Some((x, y));
        self.inside = true;
        // keep the frame already scheduled, only the coordinate moves
        if self.frame_due.is_none() {
            // an unrepresentable interval means "next tick"
            self.frame_due = Some(now.checked_add(self.frame_interval).unwrap_or(now));
        }
    }

    /// Returns the coordinate to send when the scheduled frame is due.
    pub fn fire(&mut self, now: Instant) -> Option<(f64, f64)> {
        match self.frame_due {
            Some(due) if due <= now => {
                self.frame_due = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Pointer left the surface. True when a hide message should go out.
    pub fn leave(&mut self) -> bool {
        self.pending = None;
        self.frame_due = None;
        std::mem::replace(&mut self.inside, false)
    }

    /// Drops any pending frame without asking for a hide message.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.frame_due = None;
        self.inside = false;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.frame_due
    }

    pub fn has_pending_frame(&self) -> bool {
        self.frame_due.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn samples_within_a_frame_coalesce_to_the_latest() {
        let t0 = Instant::now();
        let mut s = PointerScheduler::new(FRAME);
        s.sample(1.0, 1.0, t0);
        s.sample(2.0, 2.0, t0 + Duration::from_millis(5));
        s.sample(3.0, 4.0, t0 + Duration::from_millis(10));
        assert_eq!(s.next_deadline(), Some(t0 + FRAME));
        assert_eq!(s.fire(t0 + Duration::from_millis(15)), None);
        assert_eq!(s.fire(t0 + FRAME), Some((3.0, 4.0)));
        assert_eq!(s.fire(t0 + FRAME * 2), None);
        assert!(!s.has_pending_frame());
    }

    #[test]
    fn a_new_sample_after_a_frame_schedules_the_next_one() {
        let t0 = Instant::now();
        let mut s = PointerScheduler::new(FRAME);
        s.sample(1.0, 1.0, t0);
        assert!(s.fire(t0 + FRAME).is_some());
        s.sample(5.0, 5.0, t0 + FRAME);
        assert_eq!(s.next_deadline(), Some(t0 + FRAME * 2));
    }

    #[test]
    fn leave_cancels_and_reports_once() {
        let t0 = Instant::now();
        let mut s = PointerScheduler::new(FRAME);
        assert!(!s.leave());
        s.sample(1.0, 1.0, t0);
        assert!(s.leave());
        assert!(!s.leave());
        assert_eq!(s.fire(t0 + FRAME), None);
    }

    #[test]
    fn oversized_frame_interval_fires_immediately() {
        let t0 = Instant::now();
        let mut s = PointerScheduler::new(Duration::MAX);
        s.sample(7.0, 8.0, t0);
        assert_eq!(s.fire(t0), Some((7.0, 8.0)));
    }

    #[test]
    fn cancel_is_silent() {
        let t0 = Instant::now();
        let mut s = PointerScheduler::new(FRAME);
        s.sample(1.0, 1.0, t0);
        s.cancel();
        assert!(!s.has_pending_frame());
        assert!(!s.leave());
    }
}
