//! Time-travel log of a single thread.
//!
//! While recording, every traced line appends a full frame snapshot. The
//! replay cursor `index` counts steps back from the live end: 0 means live,
//! N means "N logged steps in the past".

use crate::debugger::engine::Frame;

#[derive(Default)]
pub struct Recorder {
    enabled: bool,
    log: Vec<Vec<Frame>>,
    index: usize,
    /// One-shot snapshot of the live frames taken when replay begins.
    /// Consumed by the first step forward back to 0, so the thread resumes
    /// with the frames it had when replay was entered.
    backup: Option<Vec<Frame>>,
}

impl Recorder {
    pub fn enable(&mut self) {
        if !self.enabled {
            self.log.clear();
            self.enabled = true;
        }
    }

    pub fn disable(&mut self) {
        if self.enabled {
            self.log.clear();
            self.enabled = false;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn append(&mut self, frames: Vec<Frame>) {
        if self.enabled {
            self.log.push(frames);
        }
    }

    pub fn log_size(&self) -> usize {
        self.log.len()
    }

    pub fn replaying(&self) -> bool {
        self.index > 0
    }

    pub fn can_step_back(&self) -> bool {
        self.log.len() > self.index
    }

    pub fn keep_backup(&mut self, frames: Vec<Frame>) {
        if self.backup.is_none() {
            self.backup = Some(frames);
        }
    }

    pub fn step_back(&mut self) {
        self.index += 1;
    }

    pub fn step_forward(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    pub fn step_reset(&mut self) {
        self.index = 0;
        self.backup = None;
    }

    /// Frames under the replay cursor. At index 0 this consumes the backup,
    /// if one is still pending.
    pub fn current_frames(&mut self) -> Option<Vec<Frame>> {
        if self.index == 0 {
            self.backup.take()
        } else {
            self.log.get(self.log.len() - self.index).cloned()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debugger::engine::{Location, PlainValue, Value};

    fn frames(line: u32) -> Vec<Frame> {
        vec![Frame::new(
            Location::new("rec.src", line),
            "main",
            PlainValue::new("Object", "main").into_value(),
            1,
        )]
    }

    fn recorder_with(n: u32) -> Recorder {
        let mut rec = Recorder::default();
        rec.enable();
        for line in 1..=n {
            rec.append(frames(line));
        }
        rec
    }

    #[test]
    fn test_round_trip() {
        let mut rec = recorder_with(3);
        rec.keep_backup(frames(99));

        for _ in 0..3 {
            assert!(rec.can_step_back());
            rec.step_back();
        }
        assert!(!rec.can_step_back());
        assert_eq!(rec.current_frames().unwrap()[0].location.line, 1);

        rec.step_reset();
        assert_eq!(rec.index_for_test(), 0);
        // backup was discarded by reset, never replayed twice
        assert!(rec.current_frames().is_none());
    }

    #[test]
    fn test_backup_consumed_once() {
        let mut rec = recorder_with(2);
        rec.keep_backup(frames(42));
        rec.step_back();
        assert_eq!(rec.current_frames().unwrap()[0].location.line, 2);

        rec.step_forward();
        let live = rec.current_frames().unwrap();
        assert_eq!(live[0].location.line, 42);
        // a second read at index 0 yields nothing - the backup is one-shot
        assert!(rec.current_frames().is_none());
    }

    #[test]
    fn test_disable_clears_log() {
        let mut rec = recorder_with(5);
        assert_eq!(rec.log_size(), 5);
        rec.disable();
        assert_eq!(rec.log_size(), 0);
        assert!(!rec.can_step_back());
    }

    impl Recorder {
        fn index_for_test(&self) -> usize {
            self.index
        }
    }
}
