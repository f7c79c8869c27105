use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::traits::SourceEnumerator;
use crate::types::{EngineError, Result, WorkItem};

/// A fixed list of work items, handed out unchanged on every call.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    items: Vec<WorkItem>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// `count` distinct made-up domains, handy for crawl demos and load tests.
    pub fn synthetic(count: usize) -> Self {
        let items = (0..count)
            .filter_map(|i| WorkItem::parse(&format!("http://site{i:04}.example.org")).ok())
            .collect();
        Self::new("synthetic", items)
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }
}

#[async_trait]
impl SourceEnumerator for StaticSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn produce(&self) -> Result<Vec<WorkItem>> {
        Ok(self.items.clone())
    }
}

/// Subscription list kept in a file, one URL per line.
///
/// The file is re-read on every call so edits are picked up by the next
/// polling cycle.
#[derive(Debug, Clone)]
pub struct ListFileSource {
    path: PathBuf,
}

impl ListFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceEnumerator for ListFileSource {
    fn name(&self) -> String {
        format!("list file {}", self.path.display())
    }

    async fn produce(&self) -> Result<Vec<WorkItem>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::SourceUnavailable(format!("{}: {}", self.path.display(), e)))?;
        let items = parse_source_list(&text);
        debug!("Read {} sources from {}", items.len(), self.path.display());
        Ok(items)
    }
}

/// Parses a newline-delimited URL list. Blank lines and `#` comments are
/// ignored, unparseable lines are skipped with a warning, and repeated URLs
/// are only kept once.
pub fn parse_source_list(text: &str) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match WorkItem::parse(line) {
            Ok(item) if items.contains(&item) => debug!("Duplicate source on line {}: {}", n + 1, line),
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping line {}: {} ({})", n + 1, line, e),
        }
    }
    items
}
