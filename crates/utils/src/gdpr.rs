//! Dedicated append-only GDPR log: one line per membership change, kept
//! separate from the structured `trc` event stream per spec §7 — this file
//! is a compliance record, not a diagnostic trace, and must not be dropped
//! by a subscriber's level filter.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use parking_lot::Mutex;

pub struct GdprLog {
    path: PathBuf,
    file: Mutex<File>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Joined,
    Left,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Joined => "joined",
            Direction::Left => "left",
        }
    }
}

impl GdprLog {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(GdprLog {
            path,
            file: Mutex::new(file),
        })
    }

    /// Writes "<addr> joined|left the list <list>, reason: <reason>".
    /// Retries once by reopening the file if the first write fails, per
    /// spec §7.
    pub fn record(&self, addr: &str, direction: Direction, list: &str, reason: &str) -> io::Result<()> {
        let line = format!(
            "{} {} {} the list {}, reason: {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            addr,
            direction.as_str(),
            list,
            reason,
        );
        let mut guard = self.file.lock();
        if guard.write_all(line.as_bytes()).is_ok() {
            return Ok(());
        }
        *guard = open_append(&self.path)?;
        guard.write_all(line.as_bytes())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_expected_line_shape() {
        let dir = std::env::temp_dir().join(format!("listmgr-gdpr-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gdpr.log");
        let log = GdprLog::open(&path).unwrap();
        log.record("cleo@example.com", Direction::Joined, "a@example.com", "join checkback confirmed")
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("cleo@example.com joined the list a@example.com, reason: join checkback confirmed"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
