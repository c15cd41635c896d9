//! Follows audio playback position and publishes the matching frame.

use std::collections::VecDeque;
use std::sync::Arc;

use murmur_events::{emit_event, event_names, EventBusRef, VisemeUpdateEvent};

use crate::frame::{FrameSequence, VisemeFrame, FRAME_RATE};
use crate::smoother::closing_tail;

pub struct PlaybackSynchronizer {
    bus: EventBusRef,
    sequence: Option<Arc<FrameSequence>>,
    index: usize,
    /// Playback reported completion (percent reached 1 or an explicit finish).
    audio_finished: bool,
    /// Index ran past the end of the sequence.
    sequence_finished: bool,
    tail: VecDeque<VisemeFrame>,
    tail_added: bool,
    current: VisemeFrame,
}

impl PlaybackSynchronizer {
    pub fn new(bus: EventBusRef) -> Self {
        Self {
            bus,
            sequence: None,
            index: 0,
            audio_finished: false,
            sequence_finished: false,
            tail: VecDeque::new(),
            tail_added: false,
            current: VisemeFrame::neutral(),
        }
    }

    /// Replace the active sequence and rewind.
    pub fn set_sequence(&mut self, sequence: Arc<FrameSequence>) {
        tracing::debug!(frames = sequence.len(), "Playback sequence set");
        self.sequence = Some(sequence);
        self.rewind();
    }

    /// Drop the sequence and return to the neutral pose.
    pub fn stop(&mut self) {
        self.sequence = None;
        self.rewind();
        self.go_neutral();
    }

    fn rewind(&mut self) {
        self.index = 0;
        self.audio_finished = false;
        self.sequence_finished = false;
        self.tail.clear();
        self.tail_added = false;
    }

    /// Playback progress callback. `percent` is in [0, 1] of a clip lasting
    /// `duration_secs`.
    pub fn on_playback_percent(&mut self, percent: f32, duration_secs: f32) {
        if self.audio_finished || self.sequence_finished {
            return;
        }
        let Some(sequence) = self.sequence.clone() else {
            tracing::warn!("Playback progress without a sequence");
            self.go_neutral();
            return;
        };

        let mut percent = percent.max(0.0);
        // A completion report before anything played is a stale notification.
        if self.index == 0 && percent.round() == 1.0 {
            percent = 0.0;
        }

        let target = (duration_secs.max(0.0) * percent * FRAME_RATE as f32).round() as usize;
        if target <= self.index && target != 0 {
            self.index += 1;
        } else {
            self.index = target;
        }

        if self.index >= sequence.len() {
            self.finish_sequence(&sequence);
            return;
        }

        let frame = sequence[self.index];
        self.publish(frame, Some(self.index));

        if percent >= 1.0 {
            self.audio_finished = true;
        }
    }

    /// Audio reported completion independently of the percent stream.
    pub fn on_playback_finished(&mut self) {
        self.audio_finished = true;
    }

    /// Per-tick update: after playback ends, drain the closing tail one frame
    /// per call.
    pub fn tick(&mut self) {
        if self.audio_finished && !self.tail_added {
            if let Some(sequence) = self.sequence.as_ref() {
                if let Some(frame) = sequence.get(self.index) {
                    if !frame.is_silent() {
                        let frame = *frame;
                        self.tail.extend(closing_tail(&frame));
                    }
                    self.tail_added = true;
                }
            }
        }

        if let Some(frame) = self.tail.pop_front() {
            self.publish(frame, None);
        }
    }

    fn finish_sequence(&mut self, sequence: &FrameSequence) {
        self.sequence_finished = true;
        match sequence.last() {
            Some(last) if !last.is_silent() && !self.tail_added => {
                let last = *last;
                self.tail.extend(closing_tail(&last));
                self.tail_added = true;
            }
            _ => self.go_neutral(),
        }
    }

    fn go_neutral(&mut self) {
        if self.current.is_neutral() {
            return;
        }
        self.publish(VisemeFrame::neutral(), None);
    }

    fn publish(&mut self, frame: VisemeFrame, frame_index: Option<usize>) {
        self.current = frame;
        emit_event(
            &*self.bus,
            event_names::VISEMES,
            &VisemeUpdateEvent {
                frame_index,
                visemes: frame.scores.to_vec(),
                laughter: frame.laughter,
            },
        );
    }

    pub fn current_frame(&self) -> &VisemeFrame {
        &self.current
    }

    pub fn current_visemes(&self) -> &[f32] {
        &self.current.scores
    }

    pub fn laughter(&self) -> f32 {
        self.current.laughter
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True once the sequence is exhausted or playback ended and the tail is drained.
    pub fn is_finished(&self) -> bool {
        (self.sequence_finished || self.audio_finished) && self.tail.is_empty()
    }

    pub fn has_sequence(&self) -> bool {
        self.sequence.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_events::InMemoryEventBus;

    fn voiced(aa: f32) -> VisemeFrame {
        let mut f = VisemeFrame::neutral();
        f.scores[0] = 1.0 - aa;
        f.scores[10] = aa;
        f
    }

    fn setup(frames: Vec<VisemeFrame>) -> (PlaybackSynchronizer, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sync = PlaybackSynchronizer::new(bus.clone());
        sync.set_sequence(Arc::new(frames.into()));
        (sync, bus)
    }

    fn updates(bus: &InMemoryEventBus) -> Vec<VisemeUpdateEvent> {
        bus.decoded(event_names::VISEMES)
    }

    #[test]
    fn test_percent_maps_to_index() {
        let frames: Vec<_> = (0..100).map(|i| voiced(i as f32 / 100.0)).collect();
        let (mut sync, bus) = setup(frames);

        sync.on_playback_percent(0.25, 1.0);
        assert_eq!(sync.index(), 25);
        assert!((sync.current_visemes()[10] - 0.25).abs() < 1e-6);

        sync.on_playback_percent(0.5, 1.0);
        assert_eq!(sync.index(), 50);
        assert_eq!(updates(&bus).len(), 2);
        assert_eq!(updates(&bus)[1].frame_index, Some(50));
    }

    #[test]
    fn test_stale_completion_at_start_ignored() {
        let (mut sync, bus) = setup(vec![voiced(0.5); 100]);
        sync.on_playback_percent(1.0, 1.0);

        assert_eq!(sync.index(), 0);
        assert!(!sync.is_finished());
        assert_eq!(updates(&bus)[0].frame_index, Some(0));
    }

    #[test]
    fn test_index_never_stalls_or_goes_back() {
        let (mut sync, _) = setup(vec![voiced(0.5); 100]);
        sync.on_playback_percent(0.10, 1.0);
        assert_eq!(sync.index(), 10);

        sync.on_playback_percent(0.10, 1.0);
        assert_eq!(sync.index(), 11);

        sync.on_playback_percent(0.05, 1.0);
        assert_eq!(sync.index(), 12);
    }

    #[test]
    fn test_end_of_silent_sequence_goes_neutral() {
        let mut frames = vec![voiced(0.5); 9];
        frames.push(VisemeFrame::neutral());
        let (mut sync, bus) = setup(frames);

        sync.on_playback_percent(0.5, 0.1);
        assert!(!sync.current_frame().is_neutral());
        sync.on_playback_percent(0.99, 0.2);

        assert!(sync.is_finished());
        assert!(sync.current_frame().is_neutral());
        let last = updates(&bus).pop().unwrap();
        assert_eq!(last.frame_index, None);
        assert_eq!(last.visemes[0], 1.0);

        // Further progress is ignored and neutral is not re-sent.
        let count = bus.len();
        sync.on_playback_percent(1.0, 0.2);
        sync.tick();
        assert_eq!(bus.len(), count);
    }

    #[test]
    fn test_end_of_voiced_sequence_closes_gracefully() {
        let (mut sync, bus) = setup(vec![voiced(0.8); 10]);
        sync.on_playback_percent(0.25, 0.2);
        assert!(!sync.is_finished());

        let before = bus.len();
        sync.on_playback_percent(0.9, 0.2);
        // Tail queued, nothing published yet.
        assert_eq!(bus.len(), before);
        assert!(!sync.is_finished());

        for _ in 0..10 {
            sync.tick();
        }
        let published = updates(&bus);
        assert_eq!(published.len(), before + 10);
        assert!((published[before].visemes[10] - 0.8).abs() < 1e-6);
        assert!(sync.current_frame().is_neutral());
        assert!(sync.is_finished());

        sync.tick();
        assert_eq!(bus.len(), before + 10);
    }

    #[test]
    fn test_audio_finished_mid_sequence_drains_tail_from_current() {
        let (mut sync, bus) = setup(vec![voiced(0.6); 300]);
        sync.on_playback_percent(0.3, 1.0);
        sync.on_playback_finished();

        sync.tick();
        let first = updates(&bus).pop().unwrap();
        assert_eq!(first.frame_index, None);
        assert!((first.visemes[10] - 0.6).abs() < 1e-6);

        for _ in 0..9 {
            sync.tick();
        }
        assert!(sync.current_frame().is_neutral());
        assert!(sync.is_finished());
    }

    #[test]
    fn test_no_sequence_goes_neutral() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sync = PlaybackSynchronizer::new(bus.clone());
        sync.on_playback_percent(0.5, 1.0);
        // Already neutral, so nothing is emitted.
        assert!(bus.is_empty());
        assert!(sync.current_frame().is_neutral());
    }

    #[test]
    fn test_stop_resets_to_neutral() {
        let (mut sync, _) = setup(vec![voiced(0.7); 50]);
        sync.on_playback_percent(0.2, 0.5);
        assert!(!sync.current_frame().is_neutral());

        sync.stop();
        assert!(sync.current_frame().is_neutral());
        assert_eq!(sync.laughter(), 0.0);
        assert!(!sync.has_sequence());
    }
}
