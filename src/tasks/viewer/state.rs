use std::time::{Duration, Instant};

/// Lifecycle of one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStatus {
    /// Built, nothing drawn yet.
    Starting,
    Running,
    /// Permission was refused or no camera frame has arrived.
    Waiting,
    /// Setup failed; no further frames.
    Failed,
    /// Torn down.
    Closed,
}

impl ViewerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ViewerStatus::Failed | ViewerStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatusChange {
    pub from: ViewerStatus,
    pub to: ViewerStatus,
    /// Time spent in `from`.
    pub after: Duration,
}

pub struct StatusMachine {
    status: ViewerStatus,
    entered_at: Instant,
}

impl StatusMachine {
    pub fn new(now: Instant) -> Self {
        Self {
            status: ViewerStatus::Starting,
            entered_at: now,
        }
    }

    pub fn status(&self) -> ViewerStatus {
        self.status
    }

    /// Report a drawn frame.
    pub fn on_frame(&mut self, waiting: bool, now: Instant) -> Option<StatusChange> {
        let to = if waiting {
            ViewerStatus::Waiting
        } else {
            ViewerStatus::Running
        };
        self.goto(to, now)
    }

    pub fn on_waiting(&mut self, now: Instant) -> Option<StatusChange> {
        self.goto(ViewerStatus::Waiting, now)
    }

    pub fn on_failed(&mut self, now: Instant) -> Option<StatusChange> {
        self.goto(ViewerStatus::Failed, now)
    }

    /// A failed viewer stays failed.
    pub fn on_closed(&mut self, now: Instant) -> Option<StatusChange> {
        if self.status == ViewerStatus::Failed {
            return None;
        }
        self.goto(ViewerStatus::Closed, now)
    }

    fn goto(&mut self, to: ViewerStatus, now: Instant) -> Option<StatusChange> {
        if self.status == to || self.status.is_terminal() {
            return None;
        }
        let ch = StatusChange {
            from: self.status,
            to,
            after: now.saturating_duration_since(self.entered_at),
        };
        self.status = to;
        self.entered_at = now;
        Some(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_toggle_between_running_and_waiting() {
        let t0 = Instant::now();
        let mut sm = StatusMachine::new(t0);
        assert!(sm.on_frame(true, t0).is_some());
        assert_eq!(sm.status(), ViewerStatus::Waiting);
        assert!(sm.on_frame(true, t0).is_none());
        let ch = sm.on_frame(false, t0 + Duration::from_millis(5)).unwrap();
        assert_eq!(ch.from, ViewerStatus::Waiting);
        assert_eq!(ch.to, ViewerStatus::Running);
        assert_eq!(ch.after, Duration::from_millis(5));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let t0 = Instant::now();
        let mut sm = StatusMachine::new(t0);
        sm.on_failed(t0);
        assert!(sm.on_closed(t0).is_none());
        assert!(sm.on_frame(false, t0).is_none());
        assert_eq!(sm.status(), ViewerStatus::Failed);

        let mut sm = StatusMachine::new(t0);
        sm.on_closed(t0);
        assert!(sm.on_failed(t0).is_none());
        assert_eq!(sm.status(), ViewerStatus::Closed);
    }
}
