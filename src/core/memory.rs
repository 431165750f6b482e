#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::McError;

const EXCERPT_LINES: usize = 5;

static DAILY_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}\.md$").expect("static regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub date: String,
    pub filename: String,
    pub excerpt: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryLog {
    dir: PathBuf,
}

impl MemoryLog {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Daily memory files, newest first.
    pub fn list(&self) -> Result<Vec<MemoryEntry>, McError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(McError::io(&self.dir, e)),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| DAILY_FILE_RE.is_match(name))
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let path = self.dir.join(&name);
            let (content, size) = match std::fs::read_to_string(&path)
                .and_then(|c| std::fs::metadata(&path).map(|m| (c, m.len())))
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable memory file");
                    continue;
                }
            };
            out.push(MemoryEntry {
                date: name.trim_end_matches(".md").to_owned(),
                excerpt: content
                    .split('\n')
                    .take(EXCERPT_LINES)
                    .collect::<Vec<_>>()
                    .join("\n"),
                filename: name,
                size_bytes: size,
            });
        }
        Ok(out)
    }
}
