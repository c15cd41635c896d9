//! Bounded reconnection policy.
//!
//! The manager only decides *when* to retry. Each attempt is handed back to
//! the owner as a [`RecoveryStep`]; the owner performs the actual reconnect
//! and reports the outcome through [`ErrorRecoveryManager::notify_reconnected`]
//! or [`ErrorRecoveryManager::notify_attempt_failed`]. Recovery is only
//! abandoned once the final attempt has been reported as failed.

use std::time::{Duration, Instant};

use murmur_events::{
    emit_event, event_names, EventBusRef, RecoveryAttemptEvent, RecoveryFailedEvent,
};

use crate::error::ErrorKind;
use crate::timer::TimerQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Attempt number, counted from 1.
    Attempt(u32),
    GaveUp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NextAttempt;

pub struct ErrorRecoveryManager {
    max_attempts: u32,
    delay: Duration,
    reconnecting: bool,
    attempts: u32,
    timers: TimerQueue<NextAttempt>,
    steps: Vec<RecoveryStep>,
    bus: EventBusRef,
}

impl ErrorRecoveryManager {
    pub fn new(max_attempts: u32, delay: Duration, bus: EventBusRef) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            reconnecting: false,
            attempts: 0,
            timers: TimerQueue::new(),
            steps: Vec::new(),
            bus,
        }
    }

    /// Route an error through the policy table. Returns whether a
    /// reconnection sequence is now handling it.
    pub fn attempt_recovery(&mut self, kind: ErrorKind, message: &str, now: Instant) -> bool {
        tracing::info!(%kind, detail = message, "Attempting recovery");
        if kind.is_auto_recoverable() {
            self.start_reconnection(now);
            true
        } else {
            tracing::warn!(%kind, "Error is not auto-recoverable, caller must reinitialize");
            false
        }
    }

    pub fn start_reconnection(&mut self, now: Instant) {
        if self.reconnecting {
            tracing::warn!("Reconnection already in progress");
            return;
        }
        self.reconnecting = true;
        self.attempts = 0;
        tracing::info!("Starting reconnection process");
        self.perform_attempt(now);
    }

    pub fn stop_reconnection(&mut self) {
        self.timers.clear();
        if self.reconnecting {
            tracing::info!("Reconnection process stopped");
        }
        self.reset();
    }

    /// The owner reconnected successfully; stop retrying.
    pub fn notify_reconnected(&mut self) {
        if self.reconnecting {
            tracing::info!(attempts = self.attempts, "Reconnected");
        }
        self.timers.clear();
        self.reset();
    }

    /// The owner's reconnect failed. Earlier attempts already have their
    /// successor scheduled; a failed final attempt ends the sequence.
    pub fn notify_attempt_failed(&mut self) {
        if !self.reconnecting {
            return;
        }
        tracing::debug!(attempt = self.attempts, "Reconnection attempt failed");
        if self.attempts >= self.max_attempts {
            self.give_up();
        }
    }

    /// Fire the next attempt if its delay has elapsed.
    pub fn tick(&mut self, now: Instant) {
        while self.timers.pop_due(now).is_some() {
            self.perform_attempt(now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn take_steps(&mut self) -> Vec<RecoveryStep> {
        std::mem::take(&mut self.steps)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn perform_attempt(&mut self, now: Instant) {
        if !self.reconnecting {
            return;
        }

        self.attempts += 1;
        tracing::info!(
            attempt = self.attempts,
            max = self.max_attempts,
            "Reconnection attempt"
        );
        self.steps.push(RecoveryStep::Attempt(self.attempts));
        emit_event(
            self.bus.as_ref(),
            event_names::RECOVERY_ATTEMPT,
            &RecoveryAttemptEvent {
                attempt: self.attempts,
                max_attempts: self.max_attempts,
            },
        );

        if self.attempts < self.max_attempts {
            self.timers.schedule_after(now, self.delay, NextAttempt);
        }
    }

    fn give_up(&mut self) {
        let reason = format!("Max reconnection attempts reached ({})", self.max_attempts);
        tracing::error!(reason = %reason, "Reconnection failed");
        emit_event(
            self.bus.as_ref(),
            event_names::RECOVERY_FAILED,
            &RecoveryFailedEvent {
                reason: reason.clone(),
            },
        );
        self.steps.push(RecoveryStep::GaveUp(reason));
        self.reset();
    }

    fn reset(&mut self) {
        self.reconnecting = false;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_events::InMemoryEventBus;
    use std::sync::Arc;

    fn manager(max: u32) -> (ErrorRecoveryManager, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        (
            ErrorRecoveryManager::new(max, Duration::from_secs(5), bus.clone()),
            bus,
        )
    }

    #[test]
    fn test_policy_table() {
        let t0 = Instant::now();
        for kind in [
            ErrorKind::NetworkError,
            ErrorKind::SdkError,
            ErrorKind::RecognitionTimeout,
        ] {
            let (mut m, _) = manager(3);
            assert!(m.attempt_recovery(kind, "x", t0), "{kind}");
            assert!(m.is_reconnecting());
        }
        for kind in [
            ErrorKind::AudioCaptureError,
            ErrorKind::InitializationFailed,
            ErrorKind::ConfigurationError,
        ] {
            let (mut m, bus) = manager(3);
            assert!(!m.attempt_recovery(kind, "x", t0), "{kind}");
            assert!(!m.is_reconnecting());
            assert!(bus.is_empty());
        }
    }

    #[test]
    fn test_three_attempts_then_one_failure() {
        let t0 = Instant::now();
        let (mut m, bus) = manager(3);
        m.start_reconnection(t0);
        assert_eq!(m.take_steps(), vec![RecoveryStep::Attempt(1)]);
        m.notify_attempt_failed();

        // Not due yet.
        m.tick(t0 + Duration::from_secs(4));
        assert!(m.take_steps().is_empty());

        m.tick(t0 + Duration::from_secs(5));
        assert_eq!(m.take_steps(), vec![RecoveryStep::Attempt(2)]);
        m.notify_attempt_failed();

        m.tick(t0 + Duration::from_secs(10));
        assert_eq!(m.take_steps(), vec![RecoveryStep::Attempt(3)]);
        // Still waiting on the outcome of the last attempt.
        assert!(m.is_reconnecting());
        assert!(bus.events_for(event_names::RECOVERY_FAILED).is_empty());
        assert_eq!(m.next_deadline(), None);

        m.notify_attempt_failed();
        // Nothing else is ever scheduled.
        m.tick(t0 + Duration::from_secs(60));

        assert_eq!(
            m.take_steps(),
            vec![RecoveryStep::GaveUp(
                "Max reconnection attempts reached (3)".into()
            )]
        );
        assert_eq!(bus.events_for(event_names::RECOVERY_ATTEMPT).len(), 3);
        let failed: Vec<RecoveryFailedEvent> = bus.decoded(event_names::RECOVERY_FAILED);
        assert_eq!(failed.len(), 1);
        assert!(!m.is_reconnecting());
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_final_attempt_success_does_not_give_up() {
        let t0 = Instant::now();
        let (mut m, bus) = manager(2);
        m.start_reconnection(t0);
        m.notify_attempt_failed();
        m.tick(t0 + Duration::from_secs(5));
        assert_eq!(
            m.take_steps(),
            vec![RecoveryStep::Attempt(1), RecoveryStep::Attempt(2)]
        );

        m.notify_reconnected();
        // A late failure report after success is ignored.
        m.notify_attempt_failed();
        assert!(m.take_steps().is_empty());
        assert!(bus.events_for(event_names::RECOVERY_FAILED).is_empty());
        assert!(!m.is_reconnecting());
    }

    #[test]
    fn test_single_attempt_gives_up_on_failure() {
        let t0 = Instant::now();
        let (mut m, bus) = manager(1);
        m.start_reconnection(t0);
        assert_eq!(m.next_deadline(), None);
        m.notify_attempt_failed();
        assert_eq!(
            m.take_steps(),
            vec![
                RecoveryStep::Attempt(1),
                RecoveryStep::GaveUp("Max reconnection attempts reached (1)".into()),
            ]
        );
        assert_eq!(bus.events_for(event_names::RECOVERY_FAILED).len(), 1);
    }

    #[test]
    fn test_second_start_is_noop() {
        let t0 = Instant::now();
        let (mut m, bus) = manager(3);
        m.start_reconnection(t0);
        m.start_reconnection(t0);
        assert_eq!(m.attempts(), 1);
        assert_eq!(bus.events_for(event_names::RECOVERY_ATTEMPT).len(), 1);
    }

    #[test]
    fn test_stop_cancels_pending_attempt() {
        let t0 = Instant::now();
        let (mut m, bus) = manager(3);
        m.start_reconnection(t0);
        m.stop_reconnection();
        assert_eq!(m.attempts(), 0);
        m.tick(t0 + Duration::from_secs(30));
        assert_eq!(bus.events_for(event_names::RECOVERY_ATTEMPT).len(), 1);
        assert!(bus.events_for(event_names::RECOVERY_FAILED).is_empty());
    }

    #[test]
    fn test_notify_reconnected_resets() {
        let t0 = Instant::now();
        let (mut m, _) = manager(3);
        m.start_reconnection(t0);
        m.notify_reconnected();
        assert!(!m.is_reconnecting());
        assert_eq!(m.next_deadline(), None);

        // A fresh sequence starts counting from 1 again.
        m.start_reconnection(t0);
        m.take_steps();
        assert_eq!(m.attempts(), 1);
    }
}
