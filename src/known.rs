use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::semantics::CheckIdiom;

/// Framework members whose results are known to never be null, plus the
/// members recognized as null-check idioms. Keyed by qualified
/// `Type.Member` name. An optional allowlist file contributes additional
/// non-null entries, one per line.
#[derive(Clone, Debug)]
pub struct KnownMembers {
    non_null: BTreeSet<&'static str>,
    emptiness: BTreeSet<&'static str>,
    try_parse: BTreeSet<&'static str>,
    extra: BTreeSet<String>,
    allowlist: Option<PathBuf>,
    loaded_len: Option<u64>,
}

const NON_NULL_MEMBERS: &[&str] = &[
    "String.Substring",
    "String.Replace",
    "Uri.ToString",
    "Guid.ToString",
    "Int64.ToString",
    "Enumerable.ToList",
    "Enumerable.ToArray",
    "Enumerable.Where",
    "Enumerable.Select",
    "Dictionary.Keys",
    "Dictionary.Values",
    "Path.GetTempPath",
    "Task.FromResult",
    "Marshal.GetObjectForIUnknown",
];

const EMPTINESS_MEMBERS: &[&str] = &["String.IsNullOrEmpty", "String.IsNullOrWhiteSpace"];

const TRY_PARSE_MEMBERS: &[&str] = &["Uri.TryCreate"];

impl Default for KnownMembers {
    fn default() -> Self {
        Self {
            non_null: NON_NULL_MEMBERS.iter().copied().collect(),
            emptiness: EMPTINESS_MEMBERS.iter().copied().collect(),
            try_parse: TRY_PARSE_MEMBERS.iter().copied().collect(),
            extra: BTreeSet::new(),
            allowlist: None,
            loaded_len: None,
        }
    }
}

impl KnownMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an allowlist file and load it.
    pub fn with_allowlist(path: impl Into<PathBuf>) -> Result<Self> {
        let mut members = Self::new();
        members.allowlist = Some(path.into());
        members.reload_allowlist()?;
        Ok(members)
    }

    pub fn is_non_null(&self, qualified: &str) -> bool {
        self.non_null.contains(qualified) || self.extra.contains(qualified)
    }

    pub fn idiom_of(&self, qualified: &str) -> Option<CheckIdiom> {
        if self.emptiness.contains(qualified) {
            return Some(CheckIdiom::Emptiness);
        }
        if self.try_parse.contains(qualified) {
            return Some(CheckIdiom::TryParse);
        }
        None
    }

    /// Re-reads the allowlist file. The file is only parsed again when its
    /// byte length differs from the last load; editors that rewrite the
    /// same content in place are not worth re-parsing for.
    pub fn reload_allowlist(&mut self) -> Result<()> {
        let Some(path) = self.allowlist.clone() else {
            return Ok(());
        };
        let metadata = fs::metadata(&path)
            .with_context(|| format!("stat allowlist {}", path.display()))?;
        if self.loaded_len == Some(metadata.len()) {
            return Ok(());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read allowlist {}", path.display()))?;
        self.extra.clear();
        self.loaded_len = Some(metadata.len());
        for line in text.lines() {
            let entry = line.trim();
            if entry.is_empty() || !entry.contains('.') {
                continue;
            }
            self.extra.insert(entry.to_string());
        }
        debug!(
            entries = self.extra.len(),
            path = %path.display(),
            "loaded not-null allowlist"
        );
        Ok(())
    }
}
