//! Write-once reply slot for request deliveries.
//!
//! The waiting worker holds the [`ReplySlot`]; the delivery carries a
//! [`Completer`]. Completion happens exactly once: either explicitly, or with
//! `HostUnavailable` when the completer is dropped unused (delivery discarded,
//! queue torn down, host gone).

use crate::error::DeliveryError;
use crate::host::Reply;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome carried by a reply slot
pub type ReplyOutcome = Result<Reply, DeliveryError>;

#[derive(Debug)]
enum SlotState {
    Pending,
    Completed(ReplyOutcome),
    Taken,
    /// The waiter gave up; a late reply is discarded
    Detached,
}

/// Worker side of a one-shot reply
#[derive(Debug)]
pub struct ReplySlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl ReplySlot {
    /// Create a slot and its completer
    pub fn pair() -> (Arc<ReplySlot>, Completer) {
        let slot = Arc::new(ReplySlot {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        });
        let completer = Completer {
            slot: Some(Arc::clone(&slot)),
        };
        (slot, completer)
    }

    fn complete(&self, outcome: ReplyOutcome) -> bool {
        let mut state = self.state.lock();
        match *state {
            SlotState::Pending => {
                *state = SlotState::Completed(outcome);
                self.cond.notify_all();
                true
            }
            SlotState::Completed(_) | SlotState::Taken | SlotState::Detached => false,
        }
    }

    /// Block until completed, or until `timeout` expires.
    ///
    /// On expiry the slot is detached and `TimedOut` is returned; a reply
    /// arriving afterwards is discarded.
    pub fn wait(&self, timeout: Option<Duration>) -> ReplyOutcome {
        // a deadline past the clock's range waits like no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Completed(outcome) => return outcome,
                SlotState::Pending => *state = SlotState::Pending,
                // only one waiter per slot
                other @ (SlotState::Taken | SlotState::Detached) => {
                    *state = other;
                    return Err(DeliveryError::HostUnavailable);
                }
            }

            match deadline {
                None => self.cond.wait(&mut state),
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, SlotState::Pending)
                    {
                        *state = SlotState::Detached;
                        let waited = timeout
                            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
                            .unwrap_or(0);
                        return Err(DeliveryError::TimedOut(waited));
                    }
                }
            }
        }
    }

    /// Whether the waiter gave up
    pub fn is_detached(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Detached)
    }

    /// Whether an outcome was written (and not yet taken)
    pub fn is_completed(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Completed(_))
    }
}

/// Host side of a one-shot reply; completes with `HostUnavailable` if dropped unused.
#[derive(Debug)]
pub struct Completer {
    slot: Option<Arc<ReplySlot>>,
}

impl Completer {
    /// Complete the slot. Returns false if the waiter had already detached.
    pub fn complete(mut self, outcome: ReplyOutcome) -> bool {
        match self.slot.take() {
            Some(slot) => slot.complete(outcome),
            None => false,
        }
    }

    /// Whether the waiter gave up (the reply would be discarded)
    pub fn is_detached(&self) -> bool {
        self.slot.as_ref().map(|s| s.is_detached()).unwrap_or(true)
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.complete(Err(DeliveryError::HostUnavailable));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_then_wait() {
        let (slot, completer) = ReplySlot::pair();
        assert!(completer.complete(Ok(Reply::ActionResult(vec![]))));
        assert_eq!(slot.wait(None), Ok(Reply::ActionResult(vec![])));
    }

    #[test]
    fn test_wait_across_threads() {
        let (slot, completer) = ReplySlot::pair();
        let host = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(Reply::ActionResult(vec![("a".into(), "1".into())])))
        });
        let outcome = slot.wait(None);
        assert!(host.join().unwrap());
        assert_eq!(outcome, Ok(Reply::ActionResult(vec![("a".into(), "1".into())])));
    }

    #[test]
    fn test_dropped_completer_means_host_unavailable() {
        let (slot, completer) = ReplySlot::pair();
        drop(completer);
        assert_eq!(slot.wait(None), Err(DeliveryError::HostUnavailable));
    }

    #[test]
    fn test_timeout_detaches_and_discards_late_reply() {
        let (slot, completer) = ReplySlot::pair();
        let outcome = slot.wait(Some(Duration::from_millis(10)));
        assert_eq!(outcome, Err(DeliveryError::TimedOut(10)));
        assert!(slot.is_detached());
        assert!(completer.is_detached());
        assert!(!completer.complete(Ok(Reply::ActionResult(vec![]))));
        assert!(slot.is_detached());
    }

    #[test]
    fn test_unrepresentable_deadline_waits_for_completion() {
        let (slot, completer) = ReplySlot::pair();
        let host = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(Ok(Reply::ActionResult(vec![])))
        });
        assert_eq!(
            slot.wait(Some(Duration::MAX)),
            Ok(Reply::ActionResult(vec![]))
        );
        assert!(host.join().unwrap());
    }

    #[test]
    fn test_completion_before_deadline_wins() {
        let (slot, completer) = ReplySlot::pair();
        completer.complete(Err(DeliveryError::Reentrant));
        assert_eq!(
            slot.wait(Some(Duration::from_millis(1))),
            Err(DeliveryError::Reentrant)
        );
    }
}
