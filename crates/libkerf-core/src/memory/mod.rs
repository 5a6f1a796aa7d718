//! Agent memory backed by sled
//!
//! Trees:
//! - `records`: agent \0 seq -> JSON `MemoryRecord`
//! - `by_task`: agent \0 task fingerprint \0 seq -> empty, for per-task lookups
//! - `counts`: agent -> number of stored records
//! - `metadata`: schema version
//!
//! A record lands in all three data trees in one transaction. Whole-history
//! reads go through an in-memory view per agent that expires after
//! `cache_ttl_secs`. The handle holds an exclusive lock file for its whole
//! life; another process opening the same store waits up to `LOCK_TIMEOUT`.

pub mod keys;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::Transactional;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::KerfError;
use crate::index::keys::u64_value;
use crate::index::similarity::{jaccard, query_terms};
use crate::index::tx_error;
use crate::types::MemoryRecord;

/// Bumped whenever the on-disk layout changes; a mismatch clears the store
pub const SCHEMA_VERSION: u64 = 1;

/// How long `open` waits for another process to release the store
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra records tolerated past `keep_last` before an automatic prune
const PRUNE_SLACK: usize = 64;

/// A learning that recurs across an agent's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub learning: String,
    pub occurrences: usize,
    pub last_seen_ms: u64,
}

struct CachedLog {
    records: Arc<Vec<MemoryRecord>>,
    loaded_at: Instant,
}

pub struct AgentMemory {
    dir: PathBuf,
    config: MemoryConfig,
    db: sled::Db,
    by_seq: sled::Tree,
    by_task: sled::Tree,
    counts: sled::Tree,
    metadata: sled::Tree,
    writer: Mutex<()>,
    cache: Mutex<HashMap<String, CachedLog>>,
    // Released after the db is closed
    _lock_file: File,
}

impl AgentMemory {
    /// Open (creating if needed) the store at `dir`
    pub fn open(dir: &Path, config: MemoryConfig) -> Result<Self, KerfError> {
        Self::open_with_timeout(dir, config, LOCK_TIMEOUT)
    }

    /// Open the store, waiting at most `timeout` for its lock file.
    ///
    /// A corrupt store or a schema mismatch is not an error; the store
    /// starts over empty.
    pub fn open_with_timeout(dir: &Path, config: MemoryConfig, timeout: Duration) -> Result<Self, KerfError> {
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = lock_store(dir, timeout)?;
        let db = open_db(dir)?;
        let by_seq = db.open_tree("records")?;
        let by_task = db.open_tree("by_task")?;
        let counts = db.open_tree("counts")?;
        let metadata = db.open_tree("metadata")?;

        let memory = Self {
            dir: dir.to_path_buf(),
            config,
            db,
            by_seq,
            by_task,
            counts,
            metadata,
            writer: Mutex::new(()),
            cache: Mutex::new(HashMap::new()),
            _lock_file: lock_file,
        };
        memory.check_schema()?;
        Ok(memory)
    }

    fn check_schema(&self) -> Result<(), KerfError> {
        let stored = self.metadata.get("schema_version")?.map(|b| u64_value(&b));
        if let Some(v) = stored {
            if v != SCHEMA_VERSION {
                warn!(
                    path = %self.dir.display(),
                    found = v,
                    expected = SCHEMA_VERSION,
                    "memory schema mismatch, clearing"
                );
                for tree in [&self.by_seq, &self.by_task, &self.counts] {
                    tree.clear()?;
                }
            }
        }
        self.metadata
            .insert("schema_version", &SCHEMA_VERSION.to_le_bytes())?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Store a record and prune its agent if it has grown well past `keep_last`
    pub fn record(&self, record: &MemoryRecord) -> Result<(), KerfError> {
        let agent = record.agent_id.as_str();
        let count = self.store(record)?;
        self.invalidate(agent);
        debug!(agent = %agent, record_id = %record.record_id, count, "memory record stored");

        let keep = self.config.keep_last;
        if keep > 0 && count as usize > keep + PRUNE_SLACK {
            self.prune(agent, keep)?;
        }
        Ok(())
    }

    /// Write one record to every tree without touching the view cache.
    /// Returns the agent's new record count.
    fn store(&self, record: &MemoryRecord) -> Result<u64, KerfError> {
        let agent = record.agent_id.as_str();
        if agent.trim().is_empty() {
            return Err(KerfError::Validation("memory record needs an agent id".to_string()));
        }
        if !keys::is_valid_segment(agent) || !keys::is_valid_segment(&record.task_fingerprint) {
            return Err(KerfError::Validation(
                "agent id and task fingerprint must not contain NUL".to_string(),
            ));
        }

        let value = serde_json::to_vec(record)?;
        let _guard = self.writer.lock();
        let seq = self.db.generate_id()?;
        let record_key = keys::record_key(agent, seq);
        let task_key = keys::task_key(agent, &record.task_fingerprint, seq);

        (&self.by_seq, &self.by_task, &self.counts)
            .transaction(|(records, by_task, counts)| {
                records.insert(record_key.as_slice(), value.as_slice())?;
                by_task.insert(task_key.as_slice(), Vec::<u8>::new())?;
                let count = counts.get(agent.as_bytes())?.map(|b| u64_value(&b)).unwrap_or(0) + 1;
                counts.insert(agent.as_bytes(), &count.to_le_bytes())?;
                Ok(count)
            })
            .map_err(tx_error)
    }

    /// All records for an agent, oldest first
    pub fn records(&self, agent_id: &str) -> Result<Arc<Vec<MemoryRecord>>, KerfError> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Some(cached) = self.cache.lock().get(agent_id) {
            if cached.loaded_at.elapsed() < ttl {
                return Ok(cached.records.clone());
            }
        }

        let records = Arc::new(self.load(agent_id)?);
        self.cache.lock().insert(
            agent_id.to_string(),
            CachedLog {
                records: records.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(records)
    }

    fn load(&self, agent_id: &str) -> Result<Vec<MemoryRecord>, KerfError> {
        let mut records = Vec::new();
        if !keys::is_valid_segment(agent_id) {
            return Ok(records);
        }
        for item in self.by_seq.scan_prefix(keys::agent_prefix(agent_id)) {
            let (key, value) = item?;
            if let Some(record) = decode(&key, &value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Most recent record for an agent
    pub fn latest(&self, agent_id: &str) -> Result<Option<MemoryRecord>, KerfError> {
        if !keys::is_valid_segment(agent_id) {
            return Ok(None);
        }
        for item in self.by_seq.scan_prefix(keys::agent_prefix(agent_id)).rev() {
            let (key, value) = item?;
            if let Some(record) = decode(&key, &value) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Decisions recorded for a task, oldest first
    pub fn decisions_for(&self, agent_id: &str, task_fingerprint: &str) -> Result<Vec<String>, KerfError> {
        let mut decisions = Vec::new();
        if !keys::is_valid_segment(agent_id) || !keys::is_valid_segment(task_fingerprint) {
            return Ok(decisions);
        }
        for item in self.by_task.scan_prefix(keys::task_prefix(agent_id, task_fingerprint)) {
            let (key, _) = item?;
            let Some(seq) = keys::key_seq(&key) else {
                continue;
            };
            let record_key = keys::record_key(agent_id, seq);
            // Pruned records leave no task entry, but a corrupt one might
            if let Some(value) = self.by_seq.get(&record_key)? {
                if let Some(record) = decode(&record_key, &value) {
                    decisions.extend(record.decisions);
                }
            }
        }
        Ok(decisions)
    }

    /// Learnings by how often they recur, most frequent first
    pub fn patterns_for(&self, agent_id: &str) -> Result<Vec<LearnedPattern>, KerfError> {
        let mut by_text: BTreeMap<String, LearnedPattern> = BTreeMap::new();
        for record in self.records(agent_id)?.iter() {
            for learning in &record.learnings {
                let entry = by_text.entry(learning.clone()).or_insert_with(|| LearnedPattern {
                    learning: learning.clone(),
                    occurrences: 0,
                    last_seen_ms: 0,
                });
                entry.occurrences += 1;
                entry.last_seen_ms = entry.last_seen_ms.max(record.recorded_at_ms);
            }
        }
        let mut patterns: Vec<LearnedPattern> = by_text.into_values().collect();
        patterns.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then(b.last_seen_ms.cmp(&a.last_seen_ms))
                .then(a.learning.cmp(&b.learning))
        });
        Ok(patterns)
    }

    /// Follow-ups not closed by a later record, in the order they were raised
    pub fn pending_follow_ups(&self, agent_id: &str) -> Result<Vec<String>, KerfError> {
        let mut pending: Vec<String> = Vec::new();
        for record in self.records(agent_id)?.iter() {
            pending.retain(|f| !record.resolved_follow_ups.contains(f));
            for follow_up in &record.follow_ups {
                if !pending.contains(follow_up) {
                    pending.push(follow_up.clone());
                }
            }
        }
        Ok(pending)
    }

    /// Historical relevance per file.
    ///
    /// Each of the last `affinity_window` records contributes the similarity
    /// of its task summary to `description` to every file it linked; a file
    /// keeps its best score. Only the window is read from the store.
    pub fn file_affinity(&self, agent_id: &str, description: &str) -> Result<BTreeMap<String, f64>, KerfError> {
        let query = query_terms(description);
        let mut affinity: BTreeMap<String, f64> = BTreeMap::new();
        if query.is_empty() || !keys::is_valid_segment(agent_id) {
            return Ok(affinity);
        }

        let window = self.config.affinity_window.max(1);
        let newest = self.by_seq.scan_prefix(keys::agent_prefix(agent_id)).rev().take(window);
        for item in newest {
            let (key, value) = item?;
            let Some(record) = decode(&key, &value) else {
                continue;
            };
            let terms: BTreeSet<String> = query_terms(&record.task_summary);
            let score = jaccard(&query, &terms);
            if score <= 0.0 {
                continue;
            }
            for file in record.linked_files {
                let slot = affinity.entry(file).or_insert(0.0);
                if score > *slot {
                    *slot = score;
                }
            }
        }
        Ok(affinity)
    }

    /// Plain-text digest of recent decisions, learnings and open follow-ups
    pub fn summary(&self, agent_id: &str, max_records: usize) -> Result<Option<String>, KerfError> {
        let records = self.records(agent_id)?;
        if records.is_empty() {
            return Ok(None);
        }

        let recent: Vec<&MemoryRecord> = records.iter().rev().take(max_records.max(1)).collect();
        let mut out = vec![format!("# Memory for {}", agent_id)];
        let decisions: Vec<&String> = recent.iter().rev().flat_map(|r| r.decisions.iter()).collect();
        if !decisions.is_empty() {
            out.push("## Decisions".to_string());
            out.extend(decisions.iter().map(|d| format!("- {}", d)));
        }
        let learnings: Vec<&String> = recent.iter().rev().flat_map(|r| r.learnings.iter()).collect();
        if !learnings.is_empty() {
            out.push("## Learnings".to_string());
            out.extend(learnings.iter().map(|l| format!("- {}", l)));
        }
        let pending = self.pending_follow_ups(agent_id)?;
        if !pending.is_empty() {
            out.push("## Open follow-ups".to_string());
            out.extend(pending.iter().map(|f| format!("- {}", f)));
        }
        if out.len() == 1 {
            return Ok(None);
        }
        Ok(Some(out.join("\n")))
    }

    /// Keep only the newest `keep_last` records. Returns how many were dropped.
    pub fn prune(&self, agent_id: &str, keep_last: usize) -> Result<usize, KerfError> {
        if !keys::is_valid_segment(agent_id) {
            return Ok(0);
        }
        let _guard = self.writer.lock();
        let prefix = keys::agent_prefix(agent_id);
        let total = self.by_seq.scan_prefix(&prefix).keys().count();
        if total <= keep_last {
            return Ok(0);
        }
        let dropped = total - keep_last;

        // (record key, task key if the record is readable)
        let mut doomed: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::with_capacity(dropped);
        for item in self.by_seq.scan_prefix(&prefix).take(dropped) {
            let (key, value) = item?;
            let task_key = match (keys::key_seq(&key), decode(&key, &value)) {
                (Some(seq), Some(record)) => Some(keys::task_key(agent_id, &record.task_fingerprint, seq)),
                _ => None,
            };
            doomed.push((key.to_vec(), task_key));
        }
        let kept = keep_last as u64;

        (&self.by_seq, &self.by_task, &self.counts)
            .transaction(|(records, by_task, counts)| {
                for (record_key, task_key) in &doomed {
                    records.remove(record_key.as_slice())?;
                    if let Some(task_key) = task_key {
                        by_task.remove(task_key.as_slice())?;
                    }
                }
                counts.insert(agent_id.as_bytes(), &kept.to_le_bytes())?;
                Ok(())
            })
            .map_err(tx_error)?;
        self.invalidate(agent_id);
        info!(agent = %agent_id, dropped, kept = keep_last, "memory pruned");
        Ok(dropped)
    }

    /// Agents with at least one stored record
    pub fn agents(&self) -> Result<Vec<String>, KerfError> {
        let mut agents = Vec::new();
        for item in self.counts.iter() {
            let (key, value) = item?;
            if u64_value(&value) == 0 {
                continue;
            }
            if let Ok(agent) = std::str::from_utf8(&key) {
                agents.push(agent.to_string());
            }
        }
        Ok(agents)
    }

    /// Drop the in-memory view so the next read goes to the store
    pub fn invalidate(&self, agent_id: &str) {
        self.cache.lock().remove(agent_id);
    }

    pub fn flush(&self) -> Result<(), KerfError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(key: &[u8], value: &[u8]) -> Option<MemoryRecord> {
    match serde_json::from_slice::<MemoryRecord>(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(seq = ?keys::key_seq(key), error = %e, "corrupt memory record skipped");
            None
        }
    }
}

/// Take `<dir>.lock`, retrying with backoff until `timeout`
fn lock_store(dir: &Path, timeout: Duration) -> Result<File, KerfError> {
    let lock_path = dir.with_extension("lock");
    let file = File::create(&lock_path)?;

    let start = Instant::now();
    let mut delay = Duration::from_millis(10);
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) if start.elapsed() < timeout => {
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_millis(200));
            }
            Err(e) => {
                return Err(KerfError::Timeout(format!(
                    "memory store at {} is locked: {}",
                    dir.display(),
                    e
                )))
            }
        }
    }
}

fn open_db(path: &Path) -> Result<sled::Db, KerfError> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(e @ (sled::Error::Corruption { .. } | sled::Error::Unsupported(_))) => {
            warn!(path = %path.display(), error = %e, "memory store unreadable, recreating");
            std::fs::remove_dir_all(path)?;
            Ok(sled::open(path)?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory(dir: &Path) -> AgentMemory {
        AgentMemory::open(&dir.join("memory"), MemoryConfig::default()).unwrap()
    }

    #[test]
    fn test_record_and_decisions() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(&MemoryRecord::new("coder", "fp1").decision("hash passwords with argon2"))
            .unwrap();
        mem.record(&MemoryRecord::new("coder", "fp2").decision("unrelated")).unwrap();
        mem.record(&MemoryRecord::new("coder", "fp1").decision("add rate limit")).unwrap();

        assert_eq!(
            mem.decisions_for("coder", "fp1").unwrap(),
            vec!["hash passwords with argon2".to_string(), "add rate limit".to_string()]
        );
        assert!(mem.decisions_for("reviewer", "fp1").unwrap().is_empty());
        // "fp" is a prefix of both fingerprints but matches neither
        assert!(mem.decisions_for("coder", "fp").unwrap().is_empty());
        assert_eq!(mem.latest("coder").unwrap().unwrap().decisions, vec!["add rate limit".to_string()]);
    }

    #[test]
    fn test_agents_with_similar_ids_stay_apart() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(
            &MemoryRecord::new("team/a", "fp")
                .with_summary("rotate signing keys")
                .with_linked_files(vec!["keys.py".into()])
                .decision("secret of team/a"),
        )
        .unwrap();
        mem.record(&MemoryRecord::new("team", "fp").decision("team only")).unwrap();

        assert!(mem.decisions_for("team_a", "fp").unwrap().is_empty());
        assert!(mem.records("team_a").unwrap().is_empty());
        assert!(mem.file_affinity("team_a", "rotate signing keys").unwrap().is_empty());
        assert_eq!(mem.decisions_for("team", "fp").unwrap(), vec!["team only".to_string()]);
        assert_eq!(
            mem.decisions_for("team/a", "fp").unwrap(),
            vec!["secret of team/a".to_string()]
        );
        assert_eq!(mem.agents().unwrap(), vec!["team".to_string(), "team/a".to_string()]);
    }

    #[test]
    fn test_nul_in_ids_rejected() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        assert!(mem.record(&MemoryRecord::new("a\0b", "fp")).unwrap_err().is_hard());
        assert!(mem.record(&MemoryRecord::new("a", "f\0p")).unwrap_err().is_hard());
        assert!(mem.records("a\0").unwrap().is_empty());
        assert!(mem.agents().unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mem = memory(dir.path());
            mem.record(&MemoryRecord::new("coder", "fp1").learning("tests use tempdir"))
                .unwrap();
            mem.flush().unwrap();
        }
        let reopened = memory(dir.path());
        assert_eq!(reopened.records("coder").unwrap().len(), 1);
        assert_eq!(reopened.agents().unwrap(), vec!["coder".to_string()]);
    }

    #[test]
    fn test_second_open_waits_for_lock() {
        let dir = tempdir().unwrap();
        let held = memory(dir.path());
        let err = AgentMemory::open_with_timeout(
            &dir.path().join("memory"),
            MemoryConfig::default(),
            Duration::from_millis(30),
        );
        assert!(matches!(err, Err(KerfError::Timeout(_))));
        drop(held);
        assert!(AgentMemory::open_with_timeout(
            &dir.path().join("memory"),
            MemoryConfig::default(),
            Duration::from_millis(500)
        )
        .is_ok());
    }

    #[test]
    fn test_schema_mismatch_clears_store() {
        let dir = tempdir().unwrap();
        {
            let mem = memory(dir.path());
            mem.record(&MemoryRecord::new("a", "fp")).unwrap();
            mem.metadata.insert("schema_version", &99u64.to_le_bytes()).unwrap();
            mem.flush().unwrap();
        }
        let mem = memory(dir.path());
        assert!(mem.records("a").unwrap().is_empty());
        assert!(mem.agents().unwrap().is_empty());
        mem.record(&MemoryRecord::new("a", "fp")).unwrap();
        assert_eq!(mem.records("a").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_record_skipped() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(&MemoryRecord::new("a", "fp1").decision("use sled")).unwrap();
        mem.by_seq.insert(keys::record_key("a", u64::MAX - 1), b"{not json".to_vec()).unwrap();
        mem.record(&MemoryRecord::new("a", "fp2")).unwrap();

        let records = mem.records("a").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decisions, vec!["use sled".to_string()]);
        assert_eq!(mem.latest("a").unwrap().unwrap().task_fingerprint, "fp2");
    }

    #[test]
    fn test_expired_view_reloads_from_store() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            cache_ttl_secs: 0,
            ..MemoryConfig::default()
        };
        let mem = AgentMemory::open(&dir.path().join("memory"), config).unwrap();
        assert!(mem.records("coder").unwrap().is_empty());
        // Written behind the view's back
        mem.store(&MemoryRecord::new("coder", "fp")).unwrap();
        assert_eq!(mem.records("coder").unwrap().len(), 1);
    }

    #[test]
    fn test_fresh_view_is_reused() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        assert!(mem.records("coder").unwrap().is_empty());
        mem.store(&MemoryRecord::new("coder", "fp")).unwrap();
        assert!(mem.records("coder").unwrap().is_empty());
        mem.invalidate("coder");
        assert_eq!(mem.records("coder").unwrap().len(), 1);
    }

    #[test]
    fn test_patterns_ranked_by_occurrence() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(&MemoryRecord::new("a", "1").learning("db is slow").learning("css is generated"))
            .unwrap();
        mem.record(&MemoryRecord::new("a", "2").learning("db is slow")).unwrap();
        let patterns = mem.patterns_for("a").unwrap();
        assert_eq!(patterns[0].learning, "db is slow");
        assert_eq!(patterns[0].occurrences, 2);
        assert_eq!(patterns[1].occurrences, 1);
    }

    #[test]
    fn test_pending_follow_ups() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(&MemoryRecord::new("a", "1").follow_up("write tests").follow_up("update docs"))
            .unwrap();
        mem.record(&MemoryRecord::new("a", "2").resolves("write tests").follow_up("benchmark"))
            .unwrap();
        assert_eq!(
            mem.pending_follow_ups("a").unwrap(),
            vec!["update docs".to_string(), "benchmark".to_string()]
        );
    }

    #[test]
    fn test_file_affinity_uses_similar_tasks() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        mem.record(
            &MemoryRecord::new("a", "1")
                .with_summary("fix login session expiry")
                .with_linked_files(vec!["auth.py".into(), "db.py".into()]),
        )
        .unwrap();
        mem.record(
            &MemoryRecord::new("a", "2")
                .with_summary("restyle landing page")
                .with_linked_files(vec!["static/styles.css".into()]),
        )
        .unwrap();

        let affinity = mem.file_affinity("a", "login bug").unwrap();
        assert!(affinity.get("auth.py").copied().unwrap_or(0.0) > 0.0);
        assert!(!affinity.contains_key("static/styles.css"));
        assert!(mem.file_affinity("nobody", "login").unwrap().is_empty());
    }

    #[test]
    fn test_file_affinity_reads_only_the_window() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            affinity_window: 1,
            ..MemoryConfig::default()
        };
        let mem = AgentMemory::open(&dir.path().join("memory"), config).unwrap();
        mem.record(
            &MemoryRecord::new("a", "1")
                .with_summary("fix login session expiry")
                .with_linked_files(vec!["auth.py".into()]),
        )
        .unwrap();
        mem.record(&MemoryRecord::new("a", "2").with_summary("restyle landing page"))
            .unwrap();
        assert!(mem.file_affinity("a", "login bug").unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        for i in 0..5 {
            mem.record(&MemoryRecord::new("a", format!("fp{}", i)).decision(format!("d{}", i)))
                .unwrap();
        }
        assert_eq!(mem.prune("a", 2).unwrap(), 3);
        let records = mem.records("a").unwrap();
        let fps: Vec<&str> = records.iter().map(|r| r.task_fingerprint.as_str()).collect();
        assert_eq!(fps, vec!["fp3", "fp4"]);
        assert!(mem.decisions_for("a", "fp0").unwrap().is_empty());
        assert_eq!(mem.by_task.len(), 2);
        assert_eq!(mem.prune("a", 2).unwrap(), 0);
    }

    #[test]
    fn test_record_prunes_past_slack() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            keep_last: 1,
            ..MemoryConfig::default()
        };
        let mem = AgentMemory::open(&dir.path().join("memory"), config).unwrap();
        for i in 0..(PRUNE_SLACK + 1) {
            mem.record(&MemoryRecord::new("a", format!("fp{}", i))).unwrap();
        }
        assert_eq!(mem.records("a").unwrap().len(), PRUNE_SLACK + 1);
        mem.record(&MemoryRecord::new("a", "last")).unwrap();
        let records = mem.records("a").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_fingerprint, "last");
    }

    #[test]
    fn test_summary() {
        let dir = tempdir().unwrap();
        let mem = memory(dir.path());
        assert!(mem.summary("a", 5).unwrap().is_none());
        mem.record(&MemoryRecord::new("a", "1").decision("use sled").follow_up("add index"))
            .unwrap();
        let summary = mem.summary("a", 5).unwrap().unwrap();
        assert!(summary.contains("- use sled"));
        assert!(summary.contains("## Open follow-ups\n- add index"));
    }

    #[test]
    fn test_empty_agent_rejected() {
        let dir = tempdir().unwrap();
        let err = memory(dir.path()).record(&MemoryRecord::new(" ", "fp")).unwrap_err();
        assert!(err.is_hard());
    }
}
