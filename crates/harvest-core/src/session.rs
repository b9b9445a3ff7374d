//! Coding sessions and the file intervals recorded inside them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::FileMetadata;

/// One open interval of a file inside a session.
///
/// The same path can be opened many times in a session; each visit gets its own
/// `File` until the session is finished and the visits are merged by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub repository: String,
    pub filetype: String,
    pub path: String,
    pub opened_at: DateTime<Utc>,
    /// `None` while the file is still the current buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Time spent in this file. Only meaningful once merged.
    #[serde(default)]
    pub duration_ms: i64,
}

impl File {
    pub fn open(path: impl Into<String>, metadata: FileMetadata, opened_at: DateTime<Utc>) -> Self {
        Self {
            name: metadata.name,
            repository: metadata.repository,
            filetype: metadata.filetype,
            path: path.into(),
            opened_at,
            closed_at: None,
            duration_ms: 0,
        }
    }

    /// Length of this interval, zero while it is still open.
    pub fn interval_ms(&self) -> i64 {
        self.closed_at
            .map_or(0, |closed| (closed - self.opened_at).num_milliseconds())
    }
}

/// A continuous stretch of coding in one editor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub started_at: DateTime<Utc>,
    /// Set when the session is finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    pub os: String,
    pub editor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<File>,
    /// Archived intervals in the order they were closed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_files: Vec<File>,
    /// Intervals merged by path. Populated by [`Session::finish`].
    #[serde(default)]
    pub files: BTreeMap<String, File>,
}

impl Session {
    pub fn start(
        os: impl Into<String>,
        editor: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            started_at,
            ended_at: None,
            duration_ms: 0,
            os: os.into(),
            editor: editor.into(),
            current_file: None,
            open_files: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    /// Closes the current file (if any) and moves it to `open_files`.
    pub fn archive_current_file(&mut self, closed_at: DateTime<Utc>) {
        if let Some(mut file) = self.current_file.take() {
            file.closed_at = Some(closed_at);
            self.open_files.push(file);
        }
    }

    /// Archives the previous current file and makes `file` current.
    pub fn switch_to(&mut self, file: File) {
        self.archive_current_file(file.opened_at);
        self.current_file = Some(file);
    }

    /// Ends the session at `ended_at` and merges every archived interval by path.
    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        self.archive_current_file(ended_at);
        self.ended_at = Some(ended_at);
        self.duration_ms = (ended_at - self.started_at).num_milliseconds();

        for file in &self.open_files {
            let interval = file.interval_ms();
            self.files
                .entry(file.path.clone())
                .and_modify(|merged| merged.duration_ms += interval)
                .or_insert_with(|| File {
                    duration_ms: interval,
                    ..file.clone()
                });
        }
    }

    /// Total time per repository across the merged files.
    pub fn repository_times(&self) -> BTreeMap<String, i64> {
        let mut totals = BTreeMap::new();
        for file in self.files.values() {
            *totals.entry(file.repository.clone()).or_insert(0) += file.duration_ms;
        }
        totals
    }
}
