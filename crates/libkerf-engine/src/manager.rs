//! Context manager: the collect pipeline and its lifecycle
//!
//! `collect_context` validates the request, consults the cache, and on a
//! miss runs filter -> budget -> compress -> assemble once for every
//! concurrent caller with the same fingerprint. Failures local to one file,
//! the memory store or the semantic scorer are logged and absorbed; only a
//! malformed request is an error.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libkerf_core::compress::ContentCompressor;
use libkerf_core::config::{load_config, memory_dir, state_dir, KerfConfig};
use libkerf_core::error::KerfError;
use libkerf_core::hash::{compute_request_fingerprint, compute_task_key};
use libkerf_core::index::{CodeIndex, IndexSnapshot, UpdateSummary};
use libkerf_core::lease::{file_resource, LeaseRegistry, DEFAULT_LEASE_TTL_MS};
use libkerf_core::memory::AgentMemory;
use libkerf_core::relevance::{RankedCandidate, RankingSignals, RelevanceFilter};
use libkerf_core::tokens::{Component, TokenBudget, TokenCalculator};
use libkerf_core::types::{
    ContentType, ContextCollection, ContextRequest, FileContext, FileNode, Fingerprint, MemoryRecord,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{Computed, ContextCache};
use crate::scorer::{SemanticScorer, TokenOverlapScorer};
use crate::workers::WorkerSet;

/// Records summarized into the history entry
const HISTORY_RECORDS: usize = 5;

/// Extra time a caller waits past its deadline for the leader's partial result
const DEADLINE_GRACE: Duration = Duration::from_millis(100);

/// Everything a computation needs, shared with spawned tasks
pub(crate) struct Pipeline {
    pub(crate) config: KerfConfig,
    pub(crate) index: Arc<CodeIndex>,
    pub(crate) memory: Option<Arc<AgentMemory>>,
    filter: RelevanceFilter,
    calculator: TokenCalculator,
    compressor: ContentCompressor,
    leases: LeaseRegistry,
    scorer: Arc<dyn SemanticScorer>,
}

/// Index view and ranking signals gathered before assembly
struct Gathered {
    generation: u64,
    snapshot: IndexSnapshot,
    signals: RankingSignals,
}

pub struct ContextManager {
    root: PathBuf,
    pipeline: Arc<Pipeline>,
    cache: Arc<ContextCache>,
    workers: Mutex<Option<WorkerSet>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("root", &self.root)
            .field("cache", &self.cache)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ContextManager {
    /// Open the engine for `root`, reading `<root>/.kerf/config.toml` when
    /// present
    pub fn open(root: &Path) -> Result<Self, KerfError> {
        let config = load_config(&state_dir(root))?.unwrap_or_default();
        Self::open_with(root, config, Arc::new(TokenOverlapScorer))
    }

    /// Open with an explicit config and semantic scorer.
    ///
    /// The index is scanned in full when it is new or was rebuilt, and
    /// refreshed otherwise. Memory that cannot be opened disables the
    /// historical signal instead of failing.
    pub fn open_with(root: &Path, config: KerfConfig, scorer: Arc<dyn SemanticScorer>) -> Result<Self, KerfError> {
        if !root.is_dir() {
            return Err(KerfError::Validation(format!(
                "project root is not a directory: {}",
                root.display()
            )));
        }
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let index = CodeIndex::open(&root, &config.index)?;
        let summary = index.refresh()?;
        info!(
            root = %root.display(),
            files = index.file_count(),
            indexed = summary.indexed,
            generation = summary.generation,
            "index ready"
        );

        let memory = match AgentMemory::open(&memory_dir(&root), config.memory.clone()) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                warn!(error = %e, "agent memory unavailable, historical relevance disabled");
                None
            }
        };

        let calculator = TokenCalculator::new(&config.tokens, &config.budget);
        let pipeline = Pipeline {
            filter: RelevanceFilter::new(config.relevance.clone()),
            compressor: ContentCompressor::new(config.compression.clone(), calculator.estimator()),
            calculator,
            leases: LeaseRegistry::new(),
            index: Arc::new(index),
            memory,
            scorer,
            config,
        };
        let cache = Arc::new(ContextCache::new(pipeline.config.cache.clone()));

        Ok(Self {
            root,
            pipeline: Arc::new(pipeline),
            cache,
            workers: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &KerfConfig {
        &self.pipeline.config
    }

    pub fn index(&self) -> &Arc<CodeIndex> {
        &self.pipeline.index
    }

    pub fn memory(&self) -> Option<&Arc<AgentMemory>> {
        self.pipeline.memory.as_ref()
    }

    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.pipeline.leases
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start warming, prediction and re-index loops. Must be called from
    /// within a tokio runtime. A no-op when workers are disabled or running.
    pub fn start_workers(&self) {
        if !self.pipeline.config.workers.enabled || self.is_closed() {
            return;
        }
        let mut slot = self.workers.lock();
        if slot.is_none() {
            *slot = Some(WorkerSet::start(Arc::clone(&self.pipeline), Arc::clone(&self.cache)));
        }
    }

    /// Stop background workers and flush the index. Further collects fail.
    pub async fn close(&self) -> Result<(), KerfError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.shutdown().await;
        }
        self.pipeline.index.flush()?;
        info!(root = %self.root.display(), "context manager closed");
        Ok(())
    }

    /// Re-index changed files and drop bundles built on older generations
    pub fn refresh_index(&self) -> Result<UpdateSummary, KerfError> {
        refresh_index(&self.pipeline, &self.cache)
    }

    /// Prepare a bundle for `request`.
    ///
    /// With a `deadline`, a computation that runs out of time returns what
    /// it has so far with `truncated` set; partial bundles are not cached.
    /// The deadline is this caller's alone: joining a computation that
    /// another caller's deadline cut short does not cut this result short.
    pub async fn collect_context(
        &self,
        request: ContextRequest,
        deadline: Option<Duration>,
    ) -> Result<Arc<ContextCollection>, KerfError> {
        if self.is_closed() {
            return Err(KerfError::Internal("context manager is closed".to_string()));
        }
        request.validate()?;
        let request_root = request
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| request.project_root.clone());
        if request_root != self.root {
            return Err(KerfError::Validation(format!(
                "request root {} does not match engine root {}",
                request.project_root.display(),
                self.root.display()
            )));
        }

        let started = Instant::now();
        let deadline_at = deadline.map(|d| started + d);
        let generation = self.pipeline.index.generation();
        let fingerprint = compute_request_fingerprint(&request, generation);
        let task_key = compute_task_key(&request);
        let agent = request.agent_id();
        self.cache.observe(&agent, task_key, &request);

        // Lease state is not part of the fingerprint
        if request.exclusive {
            let computed = self.pipeline.prepare(request, fingerprint, deadline_at, true).await?;
            return Ok(Arc::new(computed.collection));
        }

        let shared = collect_shared(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.cache),
            request.clone(),
            fingerprint,
            task_key,
            deadline_at,
        );
        let result = match deadline {
            Some(d) => match tokio::time::timeout(d + DEADLINE_GRACE, shared).await {
                Ok(result) => result,
                Err(_) => {
                    let err = KerfError::Timeout(format!("no result within {:?}", d));
                    warn!(fingerprint = %fingerprint.short(), error = %err, "returning empty partial bundle");
                    let mut empty = ContextCollection::new(fingerprint.to_hex(), request.budget(), generation);
                    empty.truncated = true;
                    return Ok(Arc::new(empty));
                }
            },
            None => shared.await,
        };

        match result {
            Err(KerfError::Cache(message)) => {
                warn!(fingerprint = %fingerprint.short(), error = %message, "cache unavailable, computing directly");
                let computed = self.pipeline.prepare(request, fingerprint, deadline_at, true).await?;
                Ok(Arc::new(computed.collection))
            }
            other => {
                debug!(
                    fingerprint = %fingerprint.short(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "context collected"
                );
                other
            }
        }
    }

    /// Append an agent's decisions or learnings to its memory
    pub fn record(&self, record: &MemoryRecord) -> Result<(), KerfError> {
        match &self.pipeline.memory {
            Some(memory) => memory.record(record),
            None => Err(KerfError::Internal("agent memory is unavailable".to_string())),
        }
    }

    /// Drop every lease held by `owner`
    pub fn release(&self, owner: &str) -> usize {
        self.pipeline.leases.release(owner)
    }

    /// Compute bundles for the requests the pattern model expects next
    pub async fn warm(&self, limit: usize) -> usize {
        warm(&self.pipeline, &self.cache, self.cache.predict(limit)).await
    }
}

/// Cache lookup with coalesced computation on a miss.
///
/// A caller that joined a computation which stopped at another caller's
/// deadline, while its own deadline has not passed, computes again under
/// its own deadline.
async fn collect_shared(
    pipeline: Arc<Pipeline>,
    cache: Arc<ContextCache>,
    request: ContextRequest,
    fingerprint: Fingerprint,
    task_key: Fingerprint,
    deadline: Option<Instant>,
) -> Result<Arc<ContextCollection>, KerfError> {
    loop {
        let (p, r) = (Arc::clone(&pipeline), request.clone());
        let shared = cache
            .get_or_compute_shared(fingerprint, task_key, move || async move {
                p.prepare(r, fingerprint, deadline, true).await
            })
            .await?;
        if shared.complete || deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(shared.collection);
        }
        debug!(fingerprint = %fingerprint.short(), "shared result was cut short by another deadline, recomputing");
    }
}

pub(crate) fn refresh_index(pipeline: &Pipeline, cache: &ContextCache) -> Result<UpdateSummary, KerfError> {
    let summary = pipeline.index.refresh()?;
    if summary.changed() {
        let dropped = cache.retain_generation(summary.generation);
        debug!(generation = summary.generation, dropped, "index moved, stale bundles dropped");
    }
    Ok(summary)
}

/// Compute and cache `requests` that are not cached yet. Returns how many
/// were computed.
pub(crate) async fn warm(pipeline: &Arc<Pipeline>, cache: &Arc<ContextCache>, requests: Vec<ContextRequest>) -> usize {
    let mut warmed = 0;
    for request in requests.into_iter().filter(|r| !r.exclusive) {
        let fingerprint = compute_request_fingerprint(&request, pipeline.index.generation());
        if cache.contains(&fingerprint) {
            continue;
        }
        let task_key = compute_task_key(&request);
        let p = Arc::clone(pipeline);
        let result = cache
            .get_or_compute(fingerprint, task_key, move || async move {
                // Warming is speculative: no memory record, no leases
                p.prepare(request, fingerprint, None, false).await
            })
            .await;
        match result {
            Ok(_) => warmed += 1,
            Err(e) => warn!(fingerprint = %fingerprint.short(), error = %e, "warming failed"),
        }
    }
    if warmed > 0 {
        debug!(warmed, "cache warmed");
    }
    warmed
}

impl Pipeline {
    /// filter -> budget -> compress -> assemble.
    ///
    /// Index, file and memory I/O run on the blocking pool; only the
    /// semantic scorer is awaited on the runtime.
    pub(crate) async fn prepare(
        self: &Arc<Self>,
        request: ContextRequest,
        fingerprint: Fingerprint,
        deadline: Option<Instant>,
        record: bool,
    ) -> Result<Computed, KerfError> {
        let p = Arc::clone(self);
        let (agent, description) = (request.agent_id(), request.task_description.clone());
        let (generation, snapshot, historical) = tokio::task::spawn_blocking(move || {
            // Read before the snapshot so the bundle never claims a newer index
            let generation = p.index.generation();
            let snapshot = p.index.snapshot()?;
            let historical = p.historical(&agent, &description);
            Ok::<_, KerfError>((generation, snapshot, historical))
        })
        .await
        .map_err(join_error)??;

        let semantic = self.semantic(&request.task_description, &snapshot.files, deadline).await;
        let gathered = Gathered {
            generation,
            snapshot,
            signals: RankingSignals { historical, semantic },
        };

        let p = Arc::clone(self);
        tokio::task::spawn_blocking(move || p.assemble(&request, fingerprint, &gathered, deadline, record))
            .await
            .map_err(join_error)
    }

    fn assemble(
        &self,
        request: &ContextRequest,
        fingerprint: Fingerprint,
        gathered: &Gathered,
        deadline: Option<Instant>,
        record: bool,
    ) -> Computed {
        let agent = request.agent_id();
        let agent = agent.as_str();
        let snapshot = &gathered.snapshot;
        let mut collection = ContextCollection::new(fingerprint.to_hex(), request.budget(), gathered.generation);
        let ranked = self.filter.rank(request, snapshot, &gathered.signals);
        let mut budget = self
            .calculator
            .allocate(request.budget(), request.role(), request.workflow_phase());

        let mut complete = true;
        let mut hard_truncated = false;
        let mut entries: Vec<FileContext> = Vec::new();
        if self.config.memory.include_history {
            if let Some(entry) = self.history_entry(agent, &mut budget) {
                entries.push(entry);
            }
        }
        budget.finish(Component::History);

        let by_component = group_candidates(&ranked, &self.filter);
        let nodes: HashMap<&str, &FileNode> = snapshot.files.iter().map(|f| (f.path.as_str(), f)).collect();
        let priority = budget.priority.clone();
        'components: for component in priority {
            for candidate in by_component.get(&component).into_iter().flatten() {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    let err = KerfError::Timeout(format!("deadline reached after {} entries", entries.len()));
                    warn!(fingerprint = %fingerprint.short(), error = %err, "returning partial bundle");
                    complete = false;
                    break 'components;
                }
                let available = budget.available(component);
                if available == 0 {
                    break;
                }
                if let Some((entry, cut)) =
                    self.build_entry(request, agent, candidate, &nodes, available, entries.is_empty())
                {
                    if request.exclusive
                        && self
                            .leases
                            .acquire(agent, &file_resource(&entry.path), DEFAULT_LEASE_TTL_MS)
                            .is_err()
                    {
                        continue;
                    }
                    if budget.consume(component, entry.tokens).is_err() {
                        continue;
                    }
                    hard_truncated |= cut;
                    entries.push(entry);
                }
            }
            budget.finish(component);
        }

        // History first, then files by relevance
        entries.sort_by(|a, b| {
            (b.component == Component::History)
                .cmp(&(a.component == Component::History))
                .then(b.relevance.total_cmp(&a.relevance))
                .then_with(|| a.path.cmp(&b.path))
        });
        for entry in entries {
            collection.push(entry);
        }
        collection.truncated = hard_truncated || !complete;

        if record {
            self.after_collect(request, agent, &collection);
        }
        if complete {
            Computed::complete(collection)
        } else {
            Computed::partial(collection)
        }
    }

    fn historical(&self, agent: &str, description: &str) -> BTreeMap<String, f64> {
        let Some(memory) = &self.memory else {
            return BTreeMap::new();
        };
        memory.file_affinity(agent, description).unwrap_or_else(|e| {
            warn!(agent = %agent, error = %e, "memory unavailable, historical relevance is zero");
            BTreeMap::new()
        })
    }

    async fn semantic(&self, description: &str, files: &[FileNode], deadline: Option<Instant>) -> BTreeMap<String, f64> {
        let scoring = self.scorer.score(description, files);
        let result = match deadline {
            Some(d) => match tokio::time::timeout_at(tokio::time::Instant::from_std(d), scoring).await {
                Ok(result) => result,
                Err(_) => Err(KerfError::Timeout(format!("{} scorer ran out of time", self.scorer.name()))),
            },
            None => scoring.await,
        };
        result.unwrap_or_else(|e| {
            warn!(scorer = self.scorer.name(), error = %e, "semantic scorer failed, using token overlap");
            TokenOverlapScorer.score_now(description, files)
        })
    }

    /// Synthetic `memory:<agent>` entry charged to the history component
    fn history_entry(&self, agent: &str, budget: &mut TokenBudget) -> Option<FileContext> {
        let memory = self.memory.as_ref()?;
        let summary = match memory.summary(agent, HISTORY_RECORDS) {
            Ok(summary) => summary?,
            Err(e) => {
                warn!(agent = %agent, error = %e, "memory unavailable, no history entry");
                return None;
            }
        };
        let available = budget.available(Component::History);
        if available == 0 {
            return None;
        }
        let path = format!("memory:{}", agent);
        let compressed = self
            .compressor
            .compress(&path, &summary, ContentType::Markdown, "markdown", available);
        if compressed.tokens == 0 || compressed.truncated {
            return None;
        }
        budget.consume(Component::History, compressed.tokens).ok()?;
        Some(FileContext {
            path,
            content: compressed.content,
            content_type: ContentType::Markdown,
            level: compressed.level,
            tokens: compressed.tokens,
            relevance: 1.0,
            component: Component::History,
        })
    }

    /// Compress one candidate into what is left of its component.
    ///
    /// A file that only fits hard-truncated is dropped unless it would be
    /// the first entry of the bundle.
    fn build_entry(
        &self,
        request: &ContextRequest,
        agent: &str,
        candidate: &RankedCandidate,
        nodes: &HashMap<&str, &FileNode>,
        available: usize,
        first: bool,
    ) -> Option<(FileContext, bool)> {
        let path = candidate.path.as_str();
        if request.exclusive {
            let check = self.leases.check(agent, &file_resource(path));
            if !check.is_clear() {
                debug!(path = %path, "leased by another agent, skipped");
                return None;
            }
        }
        let content = match self.index.read_content(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path, error = %e, "unreadable file skipped");
                return None;
            }
        };
        let language = nodes.get(path).map(|n| n.language.as_str()).unwrap_or("");
        let start = self.compressor.start_level(candidate.score);
        let compressed = self
            .compressor
            .compress_from(path, &content, candidate.content_type, language, available, start);
        if compressed.tokens == 0 || (compressed.truncated && !first) {
            return None;
        }
        if compressed.truncated {
            let err = KerfError::BudgetExceeded(format!("{} does not fit in {} tokens", path, available));
            warn!(path = %path, error = %err, "entry hard-truncated");
        }
        let entry = FileContext {
            path: candidate.path.clone(),
            content: compressed.content,
            content_type: candidate.content_type,
            level: compressed.level,
            tokens: compressed.tokens,
            relevance: candidate.score,
            component: Component::for_content_type(candidate.content_type),
        };
        Some((entry, compressed.truncated))
    }

    /// Record the bundle in agent memory and bump access counts
    fn after_collect(&self, request: &ContextRequest, agent: &str, collection: &ContextCollection) {
        let files: Vec<String> = collection
            .entries
            .iter()
            .filter(|e| e.component != Component::History)
            .map(|e| e.path.clone())
            .collect();
        if let Some(memory) = &self.memory {
            let record = MemoryRecord::new(agent, compute_task_key(request).to_hex())
                .with_summary(request.task_description.clone())
                .with_phase(request.workflow_phase().as_str())
                .with_linked_files(files.clone());
            if let Err(e) = memory.record(&record) {
                warn!(agent = %agent, error = %e, "memory record not written");
            }
        }
        if let Err(e) = self.index.touch(&files) {
            warn!(error = %e, "access counts not updated");
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> KerfError {
    KerfError::Internal(format!("collect task failed: {}", e))
}

/// Admitted candidates per budget component, in rank order
fn group_candidates<'a>(
    ranked: &'a [RankedCandidate],
    filter: &RelevanceFilter,
) -> BTreeMap<Component, Vec<&'a RankedCandidate>> {
    let mut out: BTreeMap<Component, Vec<&RankedCandidate>> = BTreeMap::new();
    for candidate in ranked.iter().filter(|c| filter.admits(c)) {
        out.entry(Component::for_content_type(candidate.content_type))
            .or_default()
            .push(candidate);
    }
    out
}
