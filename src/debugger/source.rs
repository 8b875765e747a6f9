//! Repository of debuggee source texts.
//!
//! Fed by `load` events; falls back to the filesystem for paths the runtime
//! never reported.

use std::collections::HashMap;
use std::fs;

#[derive(Default)]
pub struct SourceRepository {
    files: HashMap<String, Vec<String>>,
}

impl SourceRepository {
    pub fn add(&mut self, path: &str, source: &str) {
        self.files
            .insert(path.to_string(), source.lines().map(str::to_string).collect());
    }

    /// Source lines for `path`, loading from disk on first miss.
    pub fn lines(&mut self, path: &str) -> Option<&[String]> {
        if !self.files.contains_key(path) {
            let text = fs::read_to_string(path).ok()?;
            self.add(path, &text);
        }
        self.files.get(path).map(|l| l.as_slice())
    }

    pub fn text(&mut self, path: &str) -> Option<String> {
        self.lines(path).map(|l| {
            let mut text = l.join("\n");
            text.push('\n');
            text
        })
    }

    pub fn known(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_loaded_source_wins_over_fs() {
        let mut sr = SourceRepository::default();
        sr.add("/virtual/eval.src", "a = 1\nb = 2");
        assert_eq!(
            sr.lines("/virtual/eval.src").unwrap(),
            ["a = 1".to_string(), "b = 2".to_string()]
        );
        assert!(sr.lines("/definitely/not/here.src").is_none());
    }
}
