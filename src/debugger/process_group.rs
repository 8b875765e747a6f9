//! Cross-process coordination lock.
//!
//! A sub-session must hold this lock so that, after a fork, only one process
//! at a time interacts with the shared frontend. In single-process mode the
//! lock is a re-entrant counter with no backing file.

use std::sync::Mutex;

#[derive(Default)]
pub struct ProcessGroup {
    multi: bool,
    level: Mutex<u32>,
}

impl ProcessGroup {
    pub fn multi(&self) -> bool {
        self.multi
    }

    /// Switch into multi-process mode. Must be called before forking.
    pub fn multi_process(&mut self) {
        self.multi = true;
    }

    pub fn locked(&self) -> bool {
        *self.level.lock().unwrap() > 0
    }

    pub fn lock(&self) {
        let mut level = self.level.lock().unwrap();
        *level += 1;
        log::debug!(target: "session", "process group lock ({level})");
    }

    pub fn unlock(&self) {
        let mut level = self.level.lock().unwrap();
        debug_assert!(*level > 0, "process group lock level underflow");
        *level = level.saturating_sub(1);
        log::debug!(target: "session", "process group unlock ({level})");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reentrant_levels() {
        let pg = ProcessGroup::default();
        assert!(!pg.locked());
        pg.lock();
        pg.lock();
        assert!(pg.locked());
        pg.unlock();
        assert!(pg.locked());
        pg.unlock();
        assert!(!pg.locked());
    }
}
