//! Bounded wait for page-flip completion
//!
//! `Waiting { attempt } → Completed | TimedOut | Cancelled`. Each attempt
//! blocks on the display fd for at most one per-cycle timeout, so the
//! worst-case stall is `cycles × timeout`. The keep-running flag is the
//! single cancellation hook and is checked before every attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{trace, warn};

use crate::error::PresentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipWaitState {
    Waiting { attempt: u32 },
    Completed,
    TimedOut,
    Cancelled,
}

impl FlipWaitState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FlipWaitState::Waiting { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FlipWait {
    state: FlipWaitState,
    cycles: u32,
    timeout: Duration,
}

impl FlipWait {
    pub fn new(cycles: u32, timeout: Duration) -> Self {
        Self {
            state: FlipWaitState::Waiting { attempt: 0 },
            cycles,
            timeout,
        }
    }

    pub fn state(&self) -> FlipWaitState {
        self.state
    }

    /// Upper bound on how long [`FlipWait::run`] can block.
    pub fn budget(&self) -> Duration {
        self.timeout * self.cycles
    }

    /// Advance by one attempt. `poll` blocks for at most the given timeout
    /// and reports whether a flip completion was observed.
    pub fn step<P>(&mut self, keep_running: &AtomicBool, poll: &mut P) -> Result<FlipWaitState, PresentError>
    where
        P: FnMut(Duration) -> Result<bool, PresentError>,
    {
        let FlipWaitState::Waiting { attempt } = self.state else {
            return Ok(self.state);
        };

        self.state = if !keep_running.load(Ordering::SeqCst) {
            FlipWaitState::Cancelled
        } else if attempt >= self.cycles {
            FlipWaitState::TimedOut
        } else if poll(self.timeout)? {
            FlipWaitState::Completed
        } else {
            warn!(
                "timed out waiting for page flip (attempt {}/{})",
                attempt + 1,
                self.cycles
            );
            FlipWaitState::Waiting {
                attempt: attempt + 1,
            }
        };
        trace!("flip wait -> {:?}", self.state);
        Ok(self.state)
    }

    /// Drive the wait until it reaches a terminal state.
    pub fn run<P>(&mut self, keep_running: &AtomicBool, mut poll: P) -> Result<FlipWaitState, PresentError>
    where
        P: FnMut(Duration) -> Result<bool, PresentError>,
    {
        loop {
            let state = self.step(keep_running, &mut poll)?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_when_event_arrives() {
        let running = AtomicBool::new(true);
        let mut calls = 0;
        let mut wait = FlipWait::new(10, Duration::from_millis(100));
        let state = wait
            .run(&running, |_| {
                calls += 1;
                Ok(calls == 3)
            })
            .unwrap();
        assert_eq!(state, FlipWaitState::Completed);
        assert_eq!(calls, 3);
    }

    #[test]
    fn times_out_after_budget() {
        let running = AtomicBool::new(true);
        let mut seen = Vec::new();
        let mut wait = FlipWait::new(4, Duration::from_millis(5));
        let state = wait
            .run(&running, |timeout| {
                seen.push(timeout);
                Ok(false)
            })
            .unwrap();
        assert_eq!(state, FlipWaitState::TimedOut);
        assert_eq!(seen, vec![Duration::from_millis(5); 4]);
        assert_eq!(wait.budget(), Duration::from_millis(20));
    }

    #[test]
    fn cancellation_is_checked_before_polling() {
        let running = AtomicBool::new(false);
        let mut wait = FlipWait::new(10, Duration::from_millis(100));
        let state = wait
            .run(&running, |_| -> Result<bool, PresentError> {
                panic!("must not poll once cancelled")
            })
            .unwrap();
        assert_eq!(state, FlipWaitState::Cancelled);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let running = AtomicBool::new(true);
        let mut wait = FlipWait::new(1, Duration::ZERO);
        wait.run(&running, |_| Ok(true)).unwrap();
        let mut never = |_: Duration| -> Result<bool, PresentError> { Ok(false) };
        assert_eq!(
            wait.step(&running, &mut never).unwrap(),
            FlipWaitState::Completed
        );
    }

    #[test]
    fn device_errors_propagate() {
        let running = AtomicBool::new(true);
        let mut wait = FlipWait::new(3, Duration::ZERO);
        let err = wait
            .run(&running, |_| {
                Err(PresentError::device(
                    "poll",
                    std::io::Error::from_raw_os_error(libc::EIO),
                ))
            })
            .unwrap_err();
        assert!(matches!(err, PresentError::Device { op: "poll", .. }));
        assert_eq!(wait.state(), FlipWaitState::Waiting { attempt: 0 });
    }
}
