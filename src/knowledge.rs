//! Process-wide cache of domain grounding text.
//!
//! Entries are loaded on first use and kept until explicitly invalidated.
//! There is no load lock: two requests racing on the same cold domain may
//! both read the source file, and the first insert wins. Reads of the same
//! immutable file are idempotent, so the duplicate work is accepted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::GroundingLoadError;
use crate::events::Domain;

pub struct KnowledgeBaseCache {
    sources: BTreeMap<Domain, PathBuf>,
    entries: RwLock<HashMap<Domain, Arc<str>>>,
}

impl KnowledgeBaseCache {
    pub fn new(sources: BTreeMap<Domain, PathBuf>) -> Self {
        Self {
            sources,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Grounding text for `domain`, loading it from its source on first use.
    ///
    /// Never fails: a missing or unreadable source is logged and yields an
    /// empty string, and nothing is cached so a later fix is picked up.
    pub fn load(&self, domain: Domain) -> Arc<str> {
        if let Some(text) = self.cached(domain) {
            return text;
        }

        match self.read_source(domain) {
            Ok(text) => {
                let mut entries = self
                    .entries
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let entry = entries.entry(domain).or_insert_with(|| Arc::from(text));
                debug!(%domain, bytes = entry.len(), "knowledge base loaded");
                Arc::clone(entry)
            }
            Err(err) => {
                warn!(%domain, error = %err, "knowledge base unavailable, continuing without grounding");
                Arc::from("")
            }
        }
    }

    /// Drop the cached entry for `domain`; the next `load` rereads its source.
    pub fn invalidate(&self, domain: Domain) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&domain)
            .is_some();
        debug!(%domain, removed, "knowledge base invalidated");
    }

    pub fn invalidate_all(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Domains currently held in the cache, sorted.
    pub fn cached_domains(&self) -> Vec<Domain> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut domains: Vec<Domain> = entries.keys().copied().collect();
        domains.sort();
        domains
    }

    pub fn source_for(&self, domain: Domain) -> Option<&Path> {
        self.sources.get(&domain).map(PathBuf::as_path)
    }

    fn cached(&self, domain: Domain) -> Option<Arc<str>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&domain)
            .cloned()
    }

    fn read_source(&self, domain: Domain) -> Result<String, GroundingLoadError> {
        let path = self
            .sources
            .get(&domain)
            .ok_or(GroundingLoadError::NoSource(domain))?;

        let raw = fs::read_to_string(path).map_err(|source| GroundingLoadError::Read {
            path: path.clone(),
            source,
        })?;

        Ok(normalize_source(path, raw))
    }
}

/// JSON sources (scraped listings) are re-rendered pretty-printed so the
/// injected text does not depend on how the file was formatted. Anything
/// else is used verbatim.
fn normalize_source(path: &Path, raw: String) -> String {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return raw;
    }

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(raw),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "knowledge base is not valid JSON, using raw text");
            raw
        }
    }
}
