use std::time::Duration;

pub const SAMPLE_RATE: u32 = 16000;

/// Pre-roll ring capacity in blocks (~600ms at 60ms blocks).
pub const PREBUFFER_BLOCKS: usize = 10;

/// Wait after voice ends before flushing, in case speech resumes.
pub const VOICE_END_GRACE: Duration = Duration::from_millis(1500);

/// Wait after the flush before closing, so the final result can arrive.
pub const CLOSE_AFTER_VOICE_END: Duration = Duration::from_millis(500);

/// Settle time between a forced segmentation and the next session.
pub const REOPEN_AFTER_SEGMENT: Duration = Duration::from_millis(300);

/// Settle time between a recognized result and closing the session.
pub const CLOSE_AFTER_RESULT: Duration = Duration::from_millis(200);

/// Restart delay in continuous mode without a detector.
pub const RESTART_AFTER_RESULT: Duration = Duration::from_millis(300);

/// Bounded length of the state history.
pub const STATE_HISTORY_LEN: usize = 20;

/// Runtime tick cadence for polling workers and draining the lip-sync tail.
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);
