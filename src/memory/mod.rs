//! Episodic memory: an append-only journal of timestamped entries.
//!
//! Entries are immutable after creation and owned exclusively by the store;
//! the outside world only sees read-only query results. The heartbeat drives
//! `consolidate` (importance decay + merge of near-identical stale entries)
//! and `flush` (persist to the JSONL journal). Persistence failures degrade
//! health and retry on the next tick: acknowledged in-memory entries are
//! never lost, and queries keep answering from the last known-good state.

pub mod journal;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::emotion::MoodVector;
use crate::error::CoreError;
use crate::health::HealthMonitor;
use journal::JsonlJournal;

/// Health component name reported by flush failures.
pub const PERSISTENCE_COMPONENT: &str = "memory.persistence";

/// Entries carrying this tag are exempt from importance decay and merging.
pub const PINNED_TAG: &str = "pinned";

/// Tag added to the surviving entry of a merge.
pub const CONSOLIDATED_TAG: &str = "consolidated";

/// A single episodic memory. The emotional context is a copy of the mood
/// vector at write time, deliberately decoupled from later decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub emotional_context: MoodVector,
    pub importance: f32,
}

impl MemoryEntry {
    pub fn is_pinned(&self) -> bool {
        self.tags.contains(PINNED_TAG)
    }
}

/// Query filter. All present conditions must hold.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Entry must carry at least one of these tags.
    pub any_tag: Option<BTreeSet<String>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_importance: Option<f32>,
    /// Case-insensitive substring match on content.
    pub text: Option<String>,
    /// Oldest-first instead of the default newest-first.
    pub ascending: bool,
    pub limit: Option<usize>,
}

/// Consolidation and decay policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPolicy {
    /// Entries younger than this are left untouched by consolidation.
    #[serde(default = "default_consolidation_age_secs")]
    pub consolidation_age_secs: u64,
    /// Linear importance decay per elapsed second, applied to stale entries.
    #[serde(default = "default_importance_decay_per_sec")]
    pub importance_decay_per_sec: f32,
    /// Importance never decays below this floor.
    #[serde(default = "default_importance_floor")]
    pub importance_floor: f32,
    /// Only entries at or below this importance are merge candidates.
    #[serde(default = "default_merge_max_importance")]
    pub merge_max_importance: f32,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            consolidation_age_secs: default_consolidation_age_secs(),
            importance_decay_per_sec: default_importance_decay_per_sec(),
            importance_floor: default_importance_floor(),
            merge_max_importance: default_merge_max_importance(),
        }
    }
}

fn default_consolidation_age_secs() -> u64 {
    3600
}

fn default_importance_decay_per_sec() -> f32 {
    0.00002
}

fn default_importance_floor() -> f32 {
    0.05
}

fn default_merge_max_importance() -> f32 {
    0.3
}

struct JournalState {
    entries: Vec<MemoryEntry>,
    next_id: u64,
    /// Everything before this index has been persisted.
    flushed: usize,
    /// Consolidation changed persisted entries; the next flush rewrites the
    /// whole file instead of appending.
    needs_rewrite: bool,
}

enum FlushWork {
    Append(Vec<MemoryEntry>),
    Rewrite(Vec<MemoryEntry>),
    Clean,
}

/// The episodic memory store.
pub struct EpisodicMemoryStore {
    state: Mutex<JournalState>,
    /// Serializes file I/O; never held together with `state`.
    io_gate: Mutex<()>,
    journal: JsonlJournal,
    policy: MemoryPolicy,
    health: Arc<HealthMonitor>,
}

impl EpisodicMemoryStore {
    /// Open the store, loading any existing journal. An unreadable existing
    /// journal file is fatal; corrupt individual lines are skipped inside
    /// [`JsonlJournal::load`].
    pub fn open(
        path: impl AsRef<Path>,
        policy: MemoryPolicy,
        health: Arc<HealthMonitor>,
    ) -> Result<Self, CoreError> {
        let journal = JsonlJournal::new(path.as_ref());
        let entries = journal.load()?;
        let next_id = entries.iter().map(|e| e.id + 1).max().unwrap_or(1);
        let flushed = entries.len();
        Ok(Self {
            state: Mutex::new(JournalState {
                entries,
                next_id,
                flushed,
                needs_rewrite: false,
            }),
            io_gate: Mutex::new(()),
            journal,
            policy,
            health,
        })
    }

    /// Append a new immutable entry and return it. Fails only on validation;
    /// a failing persistence sink never rejects a record.
    pub fn record(
        &self,
        content: impl Into<String>,
        tags: BTreeSet<String>,
        emotional_context: MoodVector,
        importance: f32,
    ) -> Result<MemoryEntry, CoreError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CoreError::Validation("memory content must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&importance) {
            return Err(CoreError::Validation(format!(
                "importance {importance} outside [0, 1]"
            )));
        }

        let mut state = self.lock();
        let entry = MemoryEntry {
            id: state.next_id,
            timestamp: Utc::now(),
            content,
            tags,
            emotional_context,
            importance,
        };
        state.next_id += 1;
        state.entries.push(entry.clone());
        debug!(id = entry.id, importance = entry.importance, "Memory entry recorded");
        Ok(entry)
    }

    /// Scan the journal against the filter. Results are timestamp-ordered
    /// (newest first unless `ascending`), with ids breaking timestamp ties so
    /// the order is deterministic. Re-querying re-scans.
    pub fn query(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        let state = self.lock();
        let needle = query.text.as_ref().map(|t| t.to_lowercase());
        let mut hits: Vec<MemoryEntry> = state
            .entries
            .iter()
            .filter(|e| {
                if let Some(tags) = &query.any_tag {
                    if e.tags.is_disjoint(tags) {
                        return false;
                    }
                }
                if let Some(since) = query.since {
                    if e.timestamp < since {
                        return false;
                    }
                }
                if let Some(until) = query.until {
                    if e.timestamp > until {
                        return false;
                    }
                }
                if let Some(min) = query.min_importance {
                    if e.importance < min {
                        return false;
                    }
                }
                if let Some(needle) = &needle {
                    if !e.content.to_lowercase().contains(needle) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        drop(state);

        if query.ascending {
            hits.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        } else {
            hits.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        hits
    }

    /// The newest `n` entries.
    pub fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        self.query(&MemoryQuery {
            limit: Some(n),
            ..MemoryQuery::default()
        })
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Heartbeat-driven maintenance: linear importance decay toward the floor
    /// for stale unpinned entries, and a merge of near-identical stale
    /// low-importance entries (same content and tags). The merge keeps the
    /// entry with the lowest id, gives it the group's maximum importance and
    /// the `consolidated` tag. Any change schedules a journal rewrite.
    pub fn consolidate(&self, elapsed: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.policy.consolidation_age_secs as i64);
        let decay = self.policy.importance_decay_per_sec * elapsed.as_secs_f32();

        let mut state = self.lock();
        let mut changed = false;

        if decay > 0.0 {
            for entry in state.entries.iter_mut() {
                if entry.is_pinned() || entry.timestamp > cutoff {
                    continue;
                }
                let next = (entry.importance - decay).max(self.policy.importance_floor);
                if next < entry.importance {
                    entry.importance = next;
                    changed = true;
                }
            }
        }

        // Merge pass: first (lowest-id) occurrence of each (content, tags)
        // group survives; Vec order is insertion order, so one forward scan
        // suffices.
        let mut survivors: Vec<MemoryEntry> = Vec::with_capacity(state.entries.len());
        let mut merged = 0usize;
        for entry in state.entries.drain(..) {
            let mergeable = !entry.is_pinned()
                && entry.timestamp <= cutoff
                && entry.importance <= self.policy.merge_max_importance;
            if mergeable {
                if let Some(survivor) = survivors.iter_mut().find(|s| {
                    s.content == entry.content
                        && tags_match_ignoring_consolidated(&s.tags, &entry.tags)
                        && !s.is_pinned()
                        && s.timestamp <= cutoff
                }) {
                    survivor.importance = survivor.importance.max(entry.importance);
                    survivor.tags.insert(CONSOLIDATED_TAG.to_string());
                    merged += 1;
                    continue;
                }
            }
            survivors.push(entry);
        }
        state.entries = survivors;

        if merged > 0 {
            changed = true;
            info!(merged = merged, "Consolidated near-identical memory entries");
        }
        if changed {
            state.needs_rewrite = true;
            state.flushed = state.flushed.min(state.entries.len());
        }
    }

    /// Persist everything not yet on disk. The journal write happens outside
    /// the state lock (snapshot-then-write), and the loop re-checks for
    /// entries recorded while the write was in flight, so every entry
    /// recorded before or during this call is persisted exactly once.
    /// Idempotent when there is nothing new.
    pub fn flush(&self) -> Result<usize, CoreError> {
        let _io = self.io_gate.lock().expect("memory io gate poisoned");
        let mut written = 0usize;
        loop {
            let work = {
                let mut state = self.lock();
                if state.needs_rewrite {
                    state.needs_rewrite = false;
                    FlushWork::Rewrite(state.entries.clone())
                } else if state.flushed < state.entries.len() {
                    FlushWork::Append(state.entries[state.flushed..].to_vec())
                } else {
                    FlushWork::Clean
                }
            };

            let result = match &work {
                FlushWork::Rewrite(all) => self.journal.rewrite(all),
                FlushWork::Append(new) => self.journal.append(new),
                FlushWork::Clean => break,
            };

            match (work, result) {
                (FlushWork::Rewrite(all), Ok(())) => {
                    written += all.len();
                    self.lock().flushed = all.len();
                }
                (FlushWork::Append(new), Ok(())) => {
                    written += new.len();
                    self.lock().flushed += new.len();
                }
                (FlushWork::Rewrite(_), Err(e)) => {
                    self.lock().needs_rewrite = true;
                    self.report_flush_failure(&e);
                    return Err(e);
                }
                (FlushWork::Append(_), Err(e)) => {
                    self.report_flush_failure(&e);
                    return Err(e);
                }
                (FlushWork::Clean, _) => unreachable!("clean work breaks the loop"),
            }
        }
        self.health.report_ok(PERSISTENCE_COMPONENT);
        Ok(written)
    }

    pub fn journal_path(&self) -> &Path {
        self.journal.path()
    }

    fn report_flush_failure(&self, error: &CoreError) {
        warn!(error = %error, "Memory flush failed, entries retained in memory for retry");
        self.health
            .report_degraded(PERSISTENCE_COMPONENT, error.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().expect("memory state lock poisoned")
    }
}

/// Tag-set equality for merging, ignoring the `consolidated` marker a
/// survivor may have gained in an earlier pass.
fn tags_match_ignoring_consolidated(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    let strip = |set: &BTreeSet<String>| -> BTreeSet<String> {
        set.iter().filter(|t| *t != CONSOLIDATED_TAG).cloned().collect()
    };
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mood() -> MoodVector {
        MoodVector::neutral(["joy", "calm"])
    }

    fn open_temp(policy: MemoryPolicy) -> (tempfile::TempDir, EpisodicMemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicMemoryStore::open(
            dir.path().join("episodic_memory.jsonl"),
            policy,
            Arc::new(HealthMonitor::new()),
        )
        .unwrap();
        (dir, store)
    }

    #[test]
    fn test_record_validation() {
        let (_dir, store) = open_temp(MemoryPolicy::default());
        assert!(store.record("", tags(&[]), mood(), 0.5).is_err());
        assert!(store.record("x", tags(&[]), mood(), 1.5).is_err());
        assert!(store.record("x", tags(&[]), mood(), -0.1).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_ids_strictly_increasing_and_query_order() {
        let (_dir, store) = open_temp(MemoryPolicy::default());
        for i in 0..5 {
            store.record(format!("entry {i}"), tags(&[]), mood(), 0.5).unwrap();
        }
        let all = store.query(&MemoryQuery::default());
        assert_eq!(all.len(), 5);
        // Newest first; ids strictly decreasing in that view.
        for pair in all.windows(2) {
            assert!(pair[0].id > pair[1].id);
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
        let asc = store.query(&MemoryQuery {
            ascending: true,
            ..MemoryQuery::default()
        });
        assert_eq!(asc[0].id, 1);
        assert_eq!(asc[4].id, 5);
    }

    #[test]
    fn test_query_filters() {
        let (_dir, store) = open_temp(MemoryPolicy::default());
        store.record("walk in the park", tags(&["outdoor"]), mood(), 0.9).unwrap();
        store.record("quiet evening", tags(&["home"]), mood(), 0.2).unwrap();
        store.record("Park bench talk", tags(&["outdoor", "talk"]), mood(), 0.6).unwrap();

        let by_tag = store.query(&MemoryQuery {
            any_tag: Some(tags(&["outdoor"])),
            ..MemoryQuery::default()
        });
        assert_eq!(by_tag.len(), 2);

        let by_importance = store.query(&MemoryQuery {
            min_importance: Some(0.5),
            ..MemoryQuery::default()
        });
        assert_eq!(by_importance.len(), 2);

        let by_text = store.query(&MemoryQuery {
            text: Some("PARK".into()),
            ..MemoryQuery::default()
        });
        assert_eq!(by_text.len(), 2);

        let combined = store.query(&MemoryQuery {
            any_tag: Some(tags(&["outdoor"])),
            min_importance: Some(0.8),
            ..MemoryQuery::default()
        });
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].content, "walk in the park");
    }

    #[test]
    fn test_flush_round_trip_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic_memory.jsonl");
        let health = Arc::new(HealthMonitor::new());
        let store =
            EpisodicMemoryStore::open(&path, MemoryPolicy::default(), Arc::clone(&health)).unwrap();
        for i in 0..4 {
            store
                .record(format!("moment {i}"), tags(&["conversation"]), mood(), 0.25 * i as f32)
                .unwrap();
        }
        store.flush().unwrap();
        // Idempotent with nothing new.
        assert_eq!(store.flush().unwrap(), 0);

        let reloaded =
            EpisodicMemoryStore::open(&path, MemoryPolicy::default(), health).unwrap();
        let a = store.query(&MemoryQuery { ascending: true, ..Default::default() });
        let b = reloaded.query(&MemoryQuery { ascending: true, ..Default::default() });
        assert_eq!(a, b);
        assert_eq!(reloaded.len(), 4);

        // New ids continue after the reloaded maximum.
        let next = reloaded.record("later", tags(&[]), mood(), 0.5).unwrap();
        assert_eq!(next.id, 5);
    }

    #[test]
    fn test_corrupt_trailing_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic_memory.jsonl");
        let health = Arc::new(HealthMonitor::new());
        {
            let store =
                EpisodicMemoryStore::open(&path, MemoryPolicy::default(), Arc::clone(&health))
                    .unwrap();
            store.record("kept", tags(&[]), mood(), 0.5).unwrap();
            store.flush().unwrap();
        }
        // Simulate a truncated write.
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{\"id\":2,\"timestamp\":\"2026-");
        std::fs::write(&path, raw).unwrap();

        let store = EpisodicMemoryStore::open(&path, MemoryPolicy::default(), health).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.recent(1)[0].content, "kept");
    }

    #[test]
    fn test_records_during_flush_never_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic_memory.jsonl");
        let store = Arc::new(
            EpisodicMemoryStore::open(&path, MemoryPolicy::default(), Arc::new(HealthMonitor::new()))
                .unwrap(),
        );

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    store
                        .record(format!("concurrent {i}"), tags(&[]), mood(), 0.5)
                        .unwrap();
                }
            })
        };
        for _ in 0..20 {
            store.flush().unwrap();
        }
        writer.join().unwrap();
        store.flush().unwrap();

        let reloaded = EpisodicMemoryStore::open(
            &path,
            MemoryPolicy::default(),
            Arc::new(HealthMonitor::new()),
        )
        .unwrap();
        assert_eq!(reloaded.len(), 200);
        let mut ids: Vec<u64> = reloaded
            .query(&MemoryQuery { ascending: true, ..Default::default() })
            .iter()
            .map(|e| e.id)
            .collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before, "entry persisted more than once");
    }

    #[test]
    fn test_consolidate_decays_stale_unpinned_entries() {
        let policy = MemoryPolicy {
            consolidation_age_secs: 0,
            importance_decay_per_sec: 0.01,
            importance_floor: 0.1,
            merge_max_importance: 0.0,
        };
        let (_dir, store) = open_temp(policy);
        store.record("old thought", tags(&[]), mood(), 0.5).unwrap();
        store.record("precious", tags(&[PINNED_TAG]), mood(), 0.5).unwrap();

        store.consolidate(Duration::from_secs(10));
        let all = store.query(&MemoryQuery { ascending: true, ..Default::default() });
        assert!((all[0].importance - 0.4).abs() < 1e-6);
        assert_eq!(all[1].importance, 0.5, "pinned entry must not decay");

        // Floor is never crossed.
        store.consolidate(Duration::from_secs(100_000));
        let all = store.query(&MemoryQuery { ascending: true, ..Default::default() });
        assert_eq!(all[0].importance, 0.1);
    }

    #[test]
    fn test_consolidate_merges_lowest_id_wins() {
        let policy = MemoryPolicy {
            consolidation_age_secs: 0,
            importance_decay_per_sec: 0.0,
            importance_floor: 0.05,
            merge_max_importance: 0.3,
        };
        let (_dir, store) = open_temp(policy);
        store.record("same moment", tags(&["loop"]), mood(), 0.1).unwrap();
        store.record("same moment", tags(&["loop"]), mood(), 0.25).unwrap();
        store.record("same moment", tags(&["loop"]), mood(), 0.2).unwrap();
        store.record("different", tags(&["loop"]), mood(), 0.1).unwrap();
        store.record("same moment", tags(&["loop"]), mood(), 0.9).unwrap(); // above merge cap

        store.consolidate(Duration::from_secs(1));
        let all = store.query(&MemoryQuery { ascending: true, ..Default::default() });
        assert_eq!(all.len(), 3);
        let survivor = &all[0];
        assert_eq!(survivor.id, 1, "lowest id wins");
        assert!((survivor.importance - 0.25).abs() < 1e-6, "max importance of the group");
        assert!(survivor.tags.contains(CONSOLIDATED_TAG));
        assert_eq!(all[1].content, "different");
        assert_eq!(all[2].importance, 0.9);
    }

    #[test]
    fn test_consolidation_persists_via_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic_memory.jsonl");
        let policy = MemoryPolicy {
            consolidation_age_secs: 0,
            importance_decay_per_sec: 0.0,
            importance_floor: 0.05,
            merge_max_importance: 0.3,
        };
        let store =
            EpisodicMemoryStore::open(&path, policy.clone(), Arc::new(HealthMonitor::new()))
                .unwrap();
        store.record("dup", tags(&[]), mood(), 0.1).unwrap();
        store.record("dup", tags(&[]), mood(), 0.1).unwrap();
        store.flush().unwrap();
        store.consolidate(Duration::from_secs(1));
        store.flush().unwrap();

        let reloaded =
            EpisodicMemoryStore::open(&path, policy, Arc::new(HealthMonitor::new())).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_flush_failure_degrades_health_and_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic_memory.jsonl");
        let health = Arc::new(HealthMonitor::new());
        let store =
            EpisodicMemoryStore::open(&path, MemoryPolicy::default(), Arc::clone(&health)).unwrap();
        store.record("held in memory", tags(&[]), mood(), 0.5).unwrap();

        // Turn the journal path into a directory so the append must fail.
        std::fs::create_dir_all(&path).unwrap();
        assert!(store.flush().is_err());
        assert_eq!(store.len(), 1, "in-memory journal untouched by flush failure");
        assert!(!health.is_healthy());
        assert!(!store.recent(1).is_empty(), "queries keep answering while degraded");

        // Sink recovers: the retried flush persists the retained entry.
        std::fs::remove_dir(&path).unwrap();
        assert_eq!(store.flush().unwrap(), 1);
        assert!(health.is_healthy());
    }
}
