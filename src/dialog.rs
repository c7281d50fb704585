use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::scheduler::{JobKey, Scheduler};

/// Which multi-step flow a user is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Baseline,
    Reminder,
    Timezone,
    UserId,
}

/// Per-user waiting state. Absence from the table is the Idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInput {
    pub flow: Flow,
    /// The menu message whose keyboard was hidden when the flow started;
    /// restored when the flow exits.
    pub control: Option<(i64, i32)>,
}

/// Conversation state table. One state per user; starting a new flow
/// replaces whatever was pending.
#[derive(Clone, Default)]
pub struct Dialogs {
    inner: Arc<Mutex<HashMap<i64, PendingInput>>>,
}

impl Dialogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a waiting state, returning the state it displaced (whose
    /// timeout the caller must cancel or re-arm).
    pub fn begin(&self, user_id: i64, pending: PendingInput) -> Option<PendingInput> {
        self.inner
            .lock()
            .expect("dialog table")
            .insert(user_id, pending)
    }

    pub fn peek(&self, user_id: i64) -> Option<PendingInput> {
        self.inner.lock().expect("dialog table").get(&user_id).copied()
    }

    /// Leave the waiting state, returning what was pending.
    pub fn take(&self, user_id: i64) -> Option<PendingInput> {
        self.inner.lock().expect("dialog table").remove(&user_id)
    }

    /// Reset to Idle. Safe to call when nothing is pending.
    pub fn clear(&self, user_id: i64) {
        self.inner.lock().expect("dialog table").remove(&user_id);
    }
}

/// Arm (or restart) the silence window that drops `user_id` back to Idle.
/// Invalid flow input re-enters here, so every prompt gets the full window
/// again.
pub fn arm_silence_timeout(
    scheduler: &Scheduler,
    dialogs: &Dialogs,
    user_id: i64,
    window: Duration,
) {
    let dialogs = dialogs.clone();
    scheduler.schedule_once(JobKey::FlowTimeout { user_id }, window, async move {
        dialogs.clear(user_id)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_take_round_trip() {
        let dialogs = Dialogs::new();
        assert_eq!(dialogs.peek(1), None);

        let pending = PendingInput {
            flow: Flow::Reminder,
            control: Some((100, 7)),
        };
        assert_eq!(dialogs.begin(1, pending), None);
        assert_eq!(dialogs.peek(1), Some(pending));
        assert_eq!(dialogs.take(1), Some(pending));
        assert_eq!(dialogs.peek(1), None);
    }

    #[test]
    fn new_flow_displaces_the_old_one() {
        let dialogs = Dialogs::new();
        let first = PendingInput {
            flow: Flow::Baseline,
            control: Some((100, 7)),
        };
        let second = PendingInput {
            flow: Flow::Timezone,
            control: None,
        };
        dialogs.begin(1, first);
        assert_eq!(dialogs.begin(1, second), Some(first));
        assert_eq!(dialogs.peek(1), Some(second));
    }

    #[test]
    fn users_are_independent() {
        let dialogs = Dialogs::new();
        let pending = PendingInput {
            flow: Flow::UserId,
            control: None,
        };
        dialogs.begin(1, pending);
        assert_eq!(dialogs.peek(2), None);
        dialogs.clear(2);
        assert_eq!(dialogs.peek(1), Some(pending));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_timeout_returns_to_idle() {
        let dialogs = Dialogs::new();
        let sched = Scheduler::new();
        let user_id = 42;

        dialogs.begin(
            user_id,
            PendingInput {
                flow: Flow::Reminder,
                control: None,
            },
        );
        arm_silence_timeout(&sched, &dialogs, user_id, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        // Back to Idle: a reminder-time message arriving now is plain text.
        assert_eq!(dialogs.peek(user_id), None);
        assert!(!sched.pending(JobKey::FlowTimeout { user_id }));
    }

    #[tokio::test(start_paused = true)]
    async fn user_input_cancels_the_timeout_before_it_fires() {
        let dialogs = Dialogs::new();
        let sched = Scheduler::new();
        let user_id = 42;

        dialogs.begin(
            user_id,
            PendingInput {
                flow: Flow::Baseline,
                control: None,
            },
        );
        arm_silence_timeout(&sched, &dialogs, user_id, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        // Input arrived: the handler cancels the timeout, then consumes state.
        sched.cancel(JobKey::FlowTimeout { user_id });
        assert!(dialogs.take(user_id).is_some());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(dialogs.peek(user_id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_rearms_a_fresh_window() {
        let dialogs = Dialogs::new();
        let sched = Scheduler::new();
        let user_id = 42;
        let window = Duration::from_secs(60);

        let pending = PendingInput {
            flow: Flow::Baseline,
            control: None,
        };
        dialogs.begin(user_id, pending);
        arm_silence_timeout(&sched, &dialogs, user_id, window);

        // 59s in, input arrives but fails validation: the handler cancels
        // the running window and the re-prompt arms a fresh one.
        tokio::time::sleep(Duration::from_secs(59)).await;
        sched.cancel(JobKey::FlowTimeout { user_id });
        arm_silence_timeout(&sched, &dialogs, user_id, window);

        // The original deadline passes with the flow still waiting.
        tokio::time::sleep(Duration::from_secs(59)).await; // t = 118s
        assert_eq!(dialogs.peek(user_id), Some(pending));

        // The fresh window elapses at t = 119s.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dialogs.peek(user_id), None);
        assert!(!sched.pending(JobKey::FlowTimeout { user_id }));
    }
}
