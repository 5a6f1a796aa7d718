//! Durable code index backed by sled
//!
//! Trees:
//! - `files`: path -> JSON `FileNode`
//! - `dep_fwd` / `dep_rev`: dependency edges in both directions, value is
//!   the edge strength
//! - `terms` / `file_terms`: inverted index of content words and the
//!   per-file list needed to retract them
//! - `symbols`: lowercase name -> JSON `SymbolInfo`, one key per definition
//! - `access`: path -> access count (does not bump the generation)
//! - `metadata`: schema version, generation, scan bookkeeping
//!
//! Writers are serialized by a mutex and each file is written in one
//! multi-tree transaction. Readers go straight to sled and are never blocked.

pub mod keys;
pub mod similarity;
pub mod walk;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, Transactional};
use tracing::{debug, info, warn};

use crate::config::{index_path, IndexConfig};
use crate::error::KerfError;
use crate::extractor::imports::{normalize_rel, resolve_import};
use crate::extractor::ExtractorRegistry;
use crate::hash::content_hash;
use crate::types::file::{detect_language, ContentType, DependencyEdge, EdgeKind, FileFingerprint, FileNode, SymbolInfo};
use crate::types::now_ms;

use keys::*;
use similarity::{jaccard, query_terms, similarity, term_frequencies};
use walk::{mtime_ms, IgnoreRules};

/// Bumped whenever the on-disk layout changes; a mismatch forces a rescan
pub const SCHEMA_VERSION: u64 = 1;

/// Search results below this similarity are dropped
const MIN_SEARCH_SCORE: f64 = 0.3;

/// Shortest symbol name that produces reference edges
const MIN_REFERENCE_NAME_LEN: usize = 4;

const REVERSE_FACTOR: f64 = 0.9;
const STRUCTURAL_FACTOR: f64 = 0.6;
const IMPORT_OVERLAP_FACTOR: f64 = 0.5;

/// What `search` looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Function,
    Class,
    Import,
    Content,
    Combined,
}

impl SearchKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "function" | "fn" | "method" => Some(SearchKind::Function),
            "class" | "type" | "struct" => Some(SearchKind::Class),
            "import" | "imports" => Some(SearchKind::Import),
            "content" | "text" => Some(SearchKind::Content),
            "combined" | "all" => Some(SearchKind::Combined),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Function => "function",
            SearchKind::Class => "class",
            SearchKind::Import => "import",
            SearchKind::Content => "content",
            SearchKind::Combined => "combined",
        }
    }

    fn matches_symbol(&self, kind: &str) -> bool {
        match self {
            SearchKind::Function => matches!(kind, "function" | "method"),
            SearchKind::Class => matches!(
                kind,
                "class" | "struct" | "interface" | "trait" | "enum" | "type"
            ),
            SearchKind::Import => kind == "import",
            SearchKind::Content => false,
            SearchKind::Combined => true,
        }
    }
}

/// One search match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    /// Matched symbol, or `None` for content matches
    pub name: Option<String>,
    /// Symbol kind, or `content`
    pub kind: String,
    pub line: Option<u32>,
    pub score: f64,
}

/// Why a file is related to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Dependency,
    Dependent,
    Structural,
    ImportOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedFile {
    pub path: String,
    pub strength: f64,
    pub relation: Relation,
}

/// Result of a scan, refresh or update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Files indexed with metadata only
    pub parse_failures: usize,
    pub generation: u64,
}

impl UpdateSummary {
    pub fn changed(&self) -> bool {
        self.indexed > 0 || self.removed > 0
    }
}

/// Statistics about the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub path: String,
    pub size_bytes: u64,
    pub file_count: usize,
    pub edge_count: usize,
    pub term_count: usize,
    pub symbol_count: usize,
    pub parse_failures: usize,
    pub generation: u64,
    pub last_scan_ms: Option<u64>,
    pub needs_rescan: bool,
}

/// Consistent-enough view of the index used by ranking
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub files: Vec<FileNode>,
    pub edges: Vec<DependencyEdge>,
}

/// Code index for one project root
pub struct CodeIndex {
    root: PathBuf,
    path: PathBuf,
    db: sled::Db,
    files: sled::Tree,
    dep_fwd: sled::Tree,
    dep_rev: sled::Tree,
    terms: sled::Tree,
    file_terms: sled::Tree,
    symbols: sled::Tree,
    access: sled::Tree,
    metadata: sled::Tree,
    registry: ExtractorRegistry,
    rules: IgnoreRules,
    max_terms: usize,
    writer: Mutex<()>,
    generation: AtomicU64,
    needs_rescan: AtomicBool,
}

impl std::fmt::Debug for CodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeIndex")
            .field("root", &self.root)
            .field("path", &self.path)
            .field("generation", &self.generation())
            .finish()
    }
}

impl CodeIndex {
    /// Open or create the index for `root` at `<root>/.kerf/index`
    pub fn open(root: &Path, config: &IndexConfig) -> Result<Self, KerfError> {
        Self::open_at(root, &index_path(root), config)
    }

    /// Open or create the index for `root` stored at `db_path`.
    ///
    /// A corrupt store or a schema mismatch is not an error: the store is
    /// recreated and `needs_rescan()` reports that a full scan is due.
    pub fn open_at(root: &Path, db_path: &Path, config: &IndexConfig) -> Result<Self, KerfError> {
        Self::open_with(root, db_path, config, ExtractorRegistry::with_defaults())
    }

    pub fn open_with(
        root: &Path,
        db_path: &Path,
        config: &IndexConfig,
        registry: ExtractorRegistry,
    ) -> Result<Self, KerfError> {
        let (db, recreated) = open_db(db_path)?;
        let files = db.open_tree("files")?;
        let dep_fwd = db.open_tree("dep_fwd")?;
        let dep_rev = db.open_tree("dep_rev")?;
        let terms = db.open_tree("terms")?;
        let file_terms = db.open_tree("file_terms")?;
        let symbols = db.open_tree("symbols")?;
        let access = db.open_tree("access")?;
        let metadata = db.open_tree("metadata")?;

        let index = Self {
            root: root.to_path_buf(),
            path: db_path.to_path_buf(),
            db,
            files,
            dep_fwd,
            dep_rev,
            terms,
            file_terms,
            symbols,
            access,
            metadata,
            registry,
            rules: IgnoreRules::from_config(config),
            max_terms: config.max_terms_per_file.max(1),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            needs_rescan: AtomicBool::new(recreated),
        };
        index.check_schema()?;
        Ok(index)
    }

    fn check_schema(&self) -> Result<(), KerfError> {
        let stored = self.metadata.get("schema_version")?.map(|b| u64_value(&b));
        let generation = self.metadata.get("generation")?.map(|b| u64_value(&b)).unwrap_or(0);
        self.generation.store(generation, Ordering::SeqCst);

        match stored {
            Some(v) if v == SCHEMA_VERSION => {
                if self.metadata.get("needs_rescan")?.is_some() {
                    self.needs_rescan.store(true, Ordering::SeqCst);
                }
            }
            Some(v) => {
                warn!(
                    path = %self.path.display(),
                    found = v,
                    expected = SCHEMA_VERSION,
                    "index schema mismatch, clearing for rescan"
                );
                self.clear_data()?;
                self.mark_needs_rescan()?;
            }
            None => {
                if !self.files.is_empty() {
                    warn!(path = %self.path.display(), "index has no schema version, clearing for rescan");
                    self.clear_data()?;
                }
                self.mark_needs_rescan()?;
            }
        }
        self.metadata
            .insert("schema_version", &SCHEMA_VERSION.to_le_bytes())?;
        Ok(())
    }

    fn clear_data(&self) -> Result<(), KerfError> {
        for tree in [
            &self.files,
            &self.dep_fwd,
            &self.dep_rev,
            &self.terms,
            &self.file_terms,
            &self.symbols,
            &self.access,
        ] {
            tree.clear()?;
        }
        Ok(())
    }

    fn mark_needs_rescan(&self) -> Result<(), KerfError> {
        self.needs_rescan.store(true, Ordering::SeqCst);
        self.metadata.insert("needs_rescan", &[1u8])?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot marker mixed into request fingerprints
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The store was recreated (or never scanned) and needs a full scan
    pub fn needs_rescan(&self) -> bool {
        self.needs_rescan.load(Ordering::SeqCst)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // --- Maintenance ---

    /// Full walk of the project root.
    ///
    /// Files whose content hash is unchanged are left alone, so a repeated
    /// scan is idempotent.
    pub fn scan(&self) -> Result<UpdateSummary, KerfError> {
        let _guard = self.writer.lock();
        let walked = walk::walk(&self.root, &self.rules);
        let mut paths: BTreeSet<String> = walked.into_iter().map(|f| f.rel_path).collect();
        paths.extend(self.paths()?);
        let summary = self.update_locked(paths.into_iter().collect())?;

        self.metadata.insert("last_scan_ms", &now_ms().to_le_bytes())?;
        self.metadata.remove("needs_rescan")?;
        self.needs_rescan.store(false, Ordering::SeqCst);
        info!(
            root = %self.root.display(),
            indexed = summary.indexed,
            unchanged = summary.unchanged,
            removed = summary.removed,
            parse_failures = summary.parse_failures,
            generation = summary.generation,
            "scan complete"
        );
        Ok(summary)
    }

    /// Walk the tree and re-index only files whose size or mtime changed,
    /// plus additions and removals. Falls back to `scan` when a rescan is due.
    pub fn refresh(&self) -> Result<UpdateSummary, KerfError> {
        if self.needs_rescan() {
            return self.scan();
        }
        let _guard = self.writer.lock();
        let walked = walk::walk(&self.root, &self.rules);
        let mut seen = BTreeSet::new();
        let mut changed = Vec::new();
        for file in walked {
            let stale = match self.get_file(&file.rel_path)? {
                Some(node) => !node.fingerprint.metadata_matches(file.size, file.mtime_ms),
                None => true,
            };
            if stale {
                changed.push(file.rel_path.clone());
            }
            seen.insert(file.rel_path);
        }
        for path in self.paths()? {
            if !seen.contains(&path) {
                changed.push(path);
            }
        }
        if changed.is_empty() {
            return Ok(UpdateSummary {
                generation: self.generation(),
                ..Default::default()
            });
        }
        debug!(count = changed.len(), "refreshing changed files");
        self.update_locked(changed)
    }

    /// Re-index the given root-relative paths.
    ///
    /// Paths that no longer exist (or are now ignored) are removed. Edges
    /// touching the changed files are repaired.
    pub fn update<S: AsRef<str>>(&self, changed: &[S]) -> Result<UpdateSummary, KerfError> {
        let paths: Vec<String> = changed
            .iter()
            .filter_map(|p| {
                let p = p.as_ref();
                if Path::new(p).is_absolute() {
                    walk::relative_path(&self.root, Path::new(p))
                } else {
                    normalize_rel(&p.replace('\\', "/"))
                }
            })
            .filter(|p| !p.is_empty())
            .collect();
        let _guard = self.writer.lock();
        self.update_locked(paths)
    }

    fn update_locked(&self, paths: Vec<String>) -> Result<UpdateSummary, KerfError> {
        let mut summary = UpdateSummary::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut affected_names: BTreeSet<String> = BTreeSet::new();
        let mut path_set_changed = false;

        for path in paths {
            let existing = self.get_file(&path)?;
            match self.read_indexable(&path) {
                Some((content, size, mtime)) => {
                    let hash = content_hash(content.as_bytes());
                    if let Some(old) = &existing {
                        if old.fingerprint.content_hash == hash {
                            if !old.fingerprint.metadata_matches(size, mtime) {
                                let mut node = old.clone();
                                node.fingerprint.mtime_ms = mtime;
                                node.size = size;
                                self.files.insert(file_key(&path), serde_json::to_vec(&node)?)?;
                            }
                            summary.unchanged += 1;
                            continue;
                        }
                    }

                    let (node, tf) = self.build_node(&path, &content, hash, size, mtime);
                    if node.parse_failed {
                        summary.parse_failures += 1;
                    }
                    if let Some(old) = &existing {
                        affected_names.extend(reference_names(old));
                    } else {
                        path_set_changed = true;
                    }
                    affected_names.extend(reference_names(&node));
                    self.write_file(&node, existing.as_ref(), &tf)?;
                    summary.indexed += 1;
                    touched.insert(path);
                }
                None => {
                    if let Some(old) = existing {
                        affected_names.extend(reference_names(&old));
                        self.remove_file(&old)?;
                        path_set_changed = true;
                        summary.removed += 1;
                        touched.insert(path);
                    }
                }
            }
        }

        if touched.is_empty() {
            summary.generation = self.generation();
            return Ok(summary);
        }

        self.relink(&touched, &affected_names, path_set_changed)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.metadata.insert("generation", &generation.to_le_bytes())?;
        summary.generation = generation;
        debug!(
            indexed = summary.indexed,
            removed = summary.removed,
            generation,
            "index updated"
        );
        Ok(summary)
    }

    /// Content of an indexable file, or `None` if it is gone, ignored,
    /// oversized or not UTF-8
    fn read_indexable(&self, path: &str) -> Option<(String, u64, u64)> {
        if !self.rules.admits(path) {
            return None;
        }
        let abs = self.root.join(path);
        let meta = std::fs::metadata(&abs).ok().filter(|m| m.is_file())?;
        if self.rules.too_large(meta.len()) {
            return None;
        }
        let bytes = match std::fs::read(&abs) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path, error = %e, "cannot read file");
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(content) => Some((content, meta.len(), mtime_ms(&meta))),
            Err(_) => {
                debug!(path = %path, "skipping non-UTF-8 file");
                None
            }
        }
    }

    fn build_node(
        &self,
        path: &str,
        content: &str,
        hash: String,
        size: u64,
        mtime: u64,
    ) -> (FileNode, BTreeMap<String, u32>) {
        let content_type = ContentType::detect(path);
        let language = detect_language(path);
        let extraction = self.registry.extract(path, content_type, language, content);
        let node = FileNode {
            path: path.to_string(),
            content_type,
            language: language.to_string(),
            size,
            fingerprint: FileFingerprint {
                content_hash: hash,
                mtime_ms: mtime,
                size,
            },
            symbols: extraction.symbols,
            imports: extraction.imports,
            indexed_at_ms: now_ms(),
            access_count: 0,
            parse_failed: extraction.parse_failed,
        };
        let mut tf = term_frequencies(content, self.max_terms);
        // Path words are searchable too
        for word in similarity::tokenize(path) {
            tf.entry(word).or_insert(1);
        }
        (node, tf)
    }

    /// Write one file's node, terms and symbols in a single transaction
    fn write_file(
        &self,
        node: &FileNode,
        old: Option<&FileNode>,
        tf: &BTreeMap<String, u32>,
    ) -> Result<(), KerfError> {
        let path = node.path.as_str();
        let old_terms = self.file_terms_of(path)?;
        let old_symbol_keys: Vec<Vec<u8>> = old
            .map(|o| {
                o.symbols
                    .iter()
                    .map(|s| symbol_key(&s.name, path, s.line_start))
                    .collect()
            })
            .unwrap_or_default();

        let node_json = serde_json::to_vec(node)?;
        let term_list: Vec<&String> = tf.keys().collect();
        let term_list_json = serde_json::to_vec(&term_list)?;
        let mut new_symbols = Vec::with_capacity(node.symbols.len());
        for sym in &node.symbols {
            new_symbols.push((symbol_key(&sym.name, path, sym.line_start), serde_json::to_vec(sym)?));
        }

        (&self.files, &self.terms, &self.file_terms, &self.symbols)
            .transaction(|(files, terms, file_terms, symbols)| {
                for term in &old_terms {
                    terms.remove(term_key(term, path))?;
                }
                for key in &old_symbol_keys {
                    symbols.remove(key.as_slice())?;
                }
                for (term, count) in tf {
                    terms.insert(term_key(term, path), &count.to_le_bytes())?;
                }
                for (key, value) in &new_symbols {
                    symbols.insert(key.as_slice(), value.as_slice())?;
                }
                file_terms.insert(file_key(path), term_list_json.as_slice())?;
                files.insert(file_key(path), node_json.as_slice())?;
                Ok(())
            })
            .map_err(tx_error)
    }

    fn remove_file(&self, node: &FileNode) -> Result<(), KerfError> {
        let path = node.path.as_str();
        let old_terms = self.file_terms_of(path)?;
        let symbol_keys: Vec<Vec<u8>> = node
            .symbols
            .iter()
            .map(|s| symbol_key(&s.name, path, s.line_start))
            .collect();

        (&self.files, &self.terms, &self.file_terms, &self.symbols)
            .transaction(|(files, terms, file_terms, symbols)| {
                for term in &old_terms {
                    terms.remove(term_key(term, path))?;
                }
                for key in &symbol_keys {
                    symbols.remove(key.as_slice())?;
                }
                file_terms.remove(file_key(path))?;
                files.remove(file_key(path))?;
                Ok(())
            })
            .map_err(tx_error)?;
        self.access.remove(file_key(path))?;

        // Drop every edge touching the file, in both directions
        self.replace_edges(path, &[EdgeKind::Imports, EdgeKind::References, EdgeKind::Contains], Vec::new())?;
        let prefix = dep_prefix(path);
        let mut incoming = Vec::new();
        for result in self.dep_rev.scan_prefix(&prefix) {
            let (key, _) = result?;
            if let Some((source, kind)) = parse_dep_key_suffix(&key, prefix.len()) {
                incoming.push((source, kind));
            }
        }
        (&self.dep_fwd, &self.dep_rev)
            .transaction(|(fwd, rev)| {
                for (source, kind) in &incoming {
                    fwd.remove(dep_key(source, path, *kind))?;
                    rev.remove(dep_key(path, source, *kind))?;
                }
                Ok(())
            })
            .map_err(tx_error)
    }

    fn file_terms_of(&self, path: &str) -> Result<Vec<String>, KerfError> {
        match self.file_terms.get(file_key(path))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the outgoing edges of `source` whose kind is in `kinds`
    fn replace_edges(
        &self,
        source: &str,
        kinds: &[EdgeKind],
        edges: Vec<DependencyEdge>,
    ) -> Result<(), KerfError> {
        let prefix = dep_prefix(source);
        let mut stale = Vec::new();
        for result in self.dep_fwd.scan_prefix(&prefix) {
            let (key, _) = result?;
            if let Some((target, kind)) = parse_dep_key_suffix(&key, prefix.len()) {
                if kinds.contains(&kind) {
                    stale.push((target, kind));
                }
            }
        }
        if stale.is_empty() && edges.is_empty() {
            return Ok(());
        }

        (&self.dep_fwd, &self.dep_rev)
            .transaction(|(fwd, rev)| {
                for (target, kind) in &stale {
                    fwd.remove(dep_key(source, target, *kind))?;
                    rev.remove(dep_key(target, source, *kind))?;
                }
                for edge in &edges {
                    let strength = edge.strength.to_le_bytes();
                    fwd.insert(dep_key(source, &edge.target, edge.kind), &strength)?;
                    rev.insert(dep_key(&edge.target, source, edge.kind), &strength)?;
                }
                Ok(())
            })
            .map_err(tx_error)
    }

    /// Repair dependency edges after a batch of file writes.
    ///
    /// Import edges are re-resolved for the touched files, or for every
    /// file when the set of paths changed. Reference edges are recomputed
    /// for the touched files and for files mentioning any symbol name the
    /// batch defined or retracted.
    fn relink(
        &self,
        touched: &BTreeSet<String>,
        affected_names: &BTreeSet<String>,
        path_set_changed: bool,
    ) -> Result<(), KerfError> {
        let known: BTreeSet<String> = self.paths()?.into_iter().collect();

        let import_sources: Vec<&String> = if path_set_changed {
            known.iter().collect()
        } else {
            touched.iter().filter(|p| known.contains(*p)).collect()
        };
        for source in import_sources {
            let Some(node) = self.get_file(source)? else {
                continue;
            };
            let mut edges: BTreeMap<(String, EdgeKind), DependencyEdge> = BTreeMap::new();
            for spec in &node.imports {
                for (target, kind) in resolve_import(source, spec, &node.language, &known) {
                    edges
                        .entry((target.clone(), kind))
                        .or_insert_with(|| DependencyEdge::new(source.as_str(), target, kind, kind.default_strength()));
                }
            }
            self.replace_edges(source, &[EdgeKind::Imports, EdgeKind::Contains], edges.into_values().collect())?;
        }

        let mut reference_sources: BTreeSet<String> =
            touched.iter().filter(|p| known.contains(*p)).cloned().collect();
        for name in affected_names {
            let prefix = term_prefix(name);
            for result in self.terms.scan_prefix(&prefix) {
                let (key, _) = result?;
                if let Some(path) = parse_term_key_path(&key, prefix.len()) {
                    reference_sources.insert(path);
                }
            }
        }

        let mut definers_cache: HashMap<String, Option<String>> = HashMap::new();
        for source in &reference_sources {
            let mut targets = BTreeSet::new();
            for term in self.file_terms_of(source)? {
                if term.len() < MIN_REFERENCE_NAME_LEN {
                    continue;
                }
                let definer = match definers_cache.get(&term) {
                    Some(d) => d.clone(),
                    None => {
                        let d = self.unique_definer(&term)?;
                        definers_cache.insert(term.clone(), d.clone());
                        d
                    }
                };
                if let Some(target) = definer {
                    if &target != source {
                        targets.insert(target);
                    }
                }
            }
            let edges = targets
                .into_iter()
                .map(|t| DependencyEdge::new(source.as_str(), t, EdgeKind::References, EdgeKind::References.default_strength()))
                .collect();
            self.replace_edges(source, &[EdgeKind::References], edges)?;
        }
        Ok(())
    }

    /// The single file defining a referencable symbol with this
    /// (lowercase) name, if exactly one does
    fn unique_definer(&self, name: &str) -> Result<Option<String>, KerfError> {
        let mut definer: Option<String> = None;
        for result in self.symbols.scan_prefix(symbol_prefix(name)) {
            let (key, value) = result?;
            let Ok(sym) = serde_json::from_slice::<SymbolInfo>(&value) else {
                continue;
            };
            if !is_referencable(&sym.kind) {
                continue;
            }
            let Some(path) = parse_symbol_key_path(&key) else {
                continue;
            };
            match &definer {
                Some(existing) if *existing != path => return Ok(None),
                Some(_) => {}
                None => definer = Some(path),
            }
        }
        Ok(definer)
    }

    /// Increment access counts; does not change the generation
    pub fn touch<S: AsRef<str>>(&self, paths: &[S]) -> Result<(), KerfError> {
        for path in paths {
            let key = file_key(path.as_ref());
            if !self.files.contains_key(&key)? {
                continue;
            }
            self.access.update_and_fetch(key, |old| {
                let count = old.map(u64_value).unwrap_or(0) + 1;
                Some(count.to_le_bytes().to_vec())
            })?;
        }
        Ok(())
    }

    // --- Queries ---

    /// Indexed node for a path, with its current access count.
    ///
    /// An unreadable record is reported as absent so the next refresh
    /// re-indexes it.
    pub fn get_file(&self, path: &str) -> Result<Option<FileNode>, KerfError> {
        let Some(bytes) = self.files.get(file_key(path))? else {
            return Ok(None);
        };
        match serde_json::from_slice::<FileNode>(&bytes) {
            Ok(mut node) => {
                node.access_count = self.access_count(path)?;
                Ok(Some(node))
            }
            Err(e) => {
                warn!(path = %path, error = %e, "unreadable index record");
                Ok(None)
            }
        }
    }

    fn access_count(&self, path: &str) -> Result<u64, KerfError> {
        Ok(self
            .access
            .get(file_key(path))?
            .map(|b| u64_value(&b))
            .unwrap_or(0))
    }

    /// All indexed paths, sorted
    pub fn paths(&self) -> Result<Vec<String>, KerfError> {
        let mut paths = Vec::new();
        for result in self.files.iter() {
            let (key, _) = result?;
            if let Ok(path) = std::str::from_utf8(&key) {
                paths.push(path.to_string());
            }
        }
        Ok(paths)
    }

    /// All readable file nodes, sorted by path
    pub fn all_files(&self) -> Result<Vec<FileNode>, KerfError> {
        let mut nodes = Vec::new();
        for path in self.paths()? {
            if let Some(node) = self.get_file(&path)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Read the current content of an indexed file
    pub fn read_content(&self, path: &str) -> Result<String, KerfError> {
        if !self.files.contains_key(file_key(path))? {
            return Err(KerfError::file_not_found(path));
        }
        Ok(std::fs::read_to_string(self.root.join(path))?)
    }

    /// Outgoing edges of `path`
    pub fn dependencies(&self, path: &str) -> Result<Vec<DependencyEdge>, KerfError> {
        let prefix = dep_prefix(path);
        let mut edges = Vec::new();
        for result in self.dep_fwd.scan_prefix(&prefix) {
            let (key, value) = result?;
            if let Some((target, kind)) = parse_dep_key_suffix(&key, prefix.len()) {
                edges.push(DependencyEdge::new(path, target, kind, f32_value(&value)));
            }
        }
        Ok(edges)
    }

    /// Incoming edges of `path` (files that depend on it)
    pub fn dependents(&self, path: &str) -> Result<Vec<DependencyEdge>, KerfError> {
        let prefix = dep_prefix(path);
        let mut edges = Vec::new();
        for result in self.dep_rev.scan_prefix(&prefix) {
            let (key, value) = result?;
            if let Some((source, kind)) = parse_dep_key_suffix(&key, prefix.len()) {
                edges.push(DependencyEdge::new(source, path, kind, f32_value(&value)));
            }
        }
        Ok(edges)
    }

    /// Every forward edge in the graph
    pub fn all_edges(&self) -> Result<Vec<DependencyEdge>, KerfError> {
        let mut edges = Vec::new();
        for result in self.dep_fwd.iter() {
            let (key, value) = result?;
            let Some(split) = key.iter().position(|b| *b == 0) else {
                continue;
            };
            let Ok(source) = std::str::from_utf8(&key[..split]) else {
                continue;
            };
            if let Some((target, kind)) = parse_dep_key_suffix(&key, split + 1) {
                edges.push(DependencyEdge::new(source, target, kind, f32_value(&value)));
            }
        }
        Ok(edges)
    }

    /// Files and edges for ranking
    pub fn snapshot(&self) -> Result<IndexSnapshot, KerfError> {
        Ok(IndexSnapshot {
            generation: self.generation(),
            files: self.all_files()?,
            edges: self.all_edges()?,
        })
    }

    /// Search symbols and/or content.
    ///
    /// Results are sorted by score, then path, then name.
    pub fn search(&self, query: &str, kind: SearchKind, limit: usize) -> Result<Vec<SearchHit>, KerfError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut best: BTreeMap<(String, Option<String>), SearchHit> = BTreeMap::new();
        let mut keep = |hit: SearchHit| {
            let key = (hit.path.clone(), hit.name.clone());
            match best.get(&key) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(key, hit);
                }
            }
        };

        if kind != SearchKind::Content {
            for result in self.symbols.iter() {
                let (key, value) = result?;
                let Ok(sym) = serde_json::from_slice::<SymbolInfo>(&value) else {
                    continue;
                };
                if !kind.matches_symbol(&sym.kind) {
                    continue;
                }
                let score = similarity(query, &sym.name);
                if score < MIN_SEARCH_SCORE {
                    continue;
                }
                if let Some(path) = parse_symbol_key_path(&key) {
                    keep(SearchHit {
                        path,
                        name: Some(sym.name),
                        kind: sym.kind,
                        line: Some(sym.line_start),
                        score,
                    });
                }
            }
        }

        if matches!(kind, SearchKind::Content | SearchKind::Combined) {
            for (path, score) in self.content_scores(query)? {
                if score >= MIN_SEARCH_SCORE {
                    keep(SearchHit {
                        path,
                        name: None,
                        kind: "content".to_string(),
                        line: None,
                        score,
                    });
                }
            }
        }

        let mut hits: Vec<SearchHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.name.cmp(&b.name))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Per-file content score: share of query words present, plus a small
    /// frequency bonus
    fn content_scores(&self, query: &str) -> Result<BTreeMap<String, f64>, KerfError> {
        let words = query_terms(query);
        if words.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut matched: BTreeMap<String, (usize, u32)> = BTreeMap::new();
        for word in &words {
            let prefix = term_prefix(word);
            for result in self.terms.scan_prefix(&prefix) {
                let (key, value) = result?;
                if let Some(path) = parse_term_key_path(&key, prefix.len()) {
                    let entry = matched.entry(path).or_insert((0, 0));
                    entry.0 += 1;
                    entry.1 += u32_value(&value);
                }
            }
        }
        Ok(matched
            .into_iter()
            .map(|(path, (hits, freq))| {
                let coverage = hits as f64 / words.len() as f64;
                let frequency = (freq as f64 / 10.0).min(1.0);
                (path, 0.8 * coverage + 0.2 * frequency)
            })
            .collect())
    }

    /// Files connected to `path`, strongest first.
    ///
    /// Connections: forward dependencies, reverse dependencies, shared
    /// symbol shapes and overlapping imports. Each path appears once with
    /// its strongest connection.
    pub fn related_files(&self, path: &str, max_results: usize) -> Result<Vec<RelatedFile>, KerfError> {
        let node = self
            .get_file(path)?
            .ok_or_else(|| KerfError::file_not_found(path))?;

        let mut best: BTreeMap<String, (f64, Relation)> = BTreeMap::new();
        let mut offer = |other: String, strength: f64, relation: Relation| {
            if other == path || strength <= 0.0 {
                return;
            }
            let entry = best.entry(other).or_insert((strength, relation));
            if strength > entry.0 {
                *entry = (strength, relation);
            }
        };

        for edge in self.dependencies(path)? {
            offer(edge.target, edge.strength as f64, Relation::Dependency);
        }
        for edge in self.dependents(path)? {
            offer(edge.source, edge.strength as f64 * REVERSE_FACTOR, Relation::Dependent);
        }

        let shapes = symbol_shapes(&node);
        let imports: BTreeSet<String> = node.imports.iter().cloned().collect();
        if !shapes.is_empty() || !imports.is_empty() {
            for other in self.all_files()? {
                if other.path == path {
                    continue;
                }
                if !shapes.is_empty() {
                    let other_shapes = symbol_shapes(&other);
                    let structural = jaccard(&shapes, &other_shapes) * STRUCTURAL_FACTOR;
                    offer(other.path.clone(), structural, Relation::Structural);
                }
                if !imports.is_empty() {
                    let other_imports: BTreeSet<String> = other.imports.iter().cloned().collect();
                    let overlap = jaccard(&imports, &other_imports) * IMPORT_OVERLAP_FACTOR;
                    offer(other.path.clone(), overlap, Relation::ImportOverlap);
                }
            }
        }

        let mut related: Vec<RelatedFile> = best
            .into_iter()
            .map(|(path, (strength, relation))| RelatedFile {
                path,
                strength: strength.clamp(0.0, 1.0),
                relation,
            })
            .collect();
        related.sort_by(|a, b| b.strength.total_cmp(&a.strength).then_with(|| a.path.cmp(&b.path)));
        related.truncate(max_results);
        Ok(related)
    }

    pub fn stats(&self) -> Result<IndexStats, KerfError> {
        let mut parse_failures = 0;
        for result in self.files.iter() {
            let (_, value) = result?;
            if let Ok(node) = serde_json::from_slice::<FileNode>(&value) {
                if node.parse_failed {
                    parse_failures += 1;
                }
            }
        }
        let last_scan_ms = self.metadata.get("last_scan_ms")?.map(|b| u64_value(&b));

        Ok(IndexStats {
            path: self.path.to_string_lossy().to_string(),
            size_bytes: dir_size(&self.path).unwrap_or(0),
            file_count: self.files.len(),
            edge_count: self.dep_fwd.len(),
            term_count: self.terms.len(),
            symbol_count: self.symbols.len(),
            parse_failures,
            generation: self.generation(),
            last_scan_ms,
            needs_rescan: self.needs_rescan(),
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), KerfError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Open sled, recreating the store if it is corrupt
fn open_db(path: &Path) -> Result<(sled::Db, bool), KerfError> {
    match sled::open(path) {
        Ok(db) => Ok((db, false)),
        Err(e @ (sled::Error::Corruption { .. } | sled::Error::Unsupported(_))) => {
            warn!(path = %path.display(), error = %e, "index store unreadable, recreating");
            std::fs::remove_dir_all(path)?;
            let db = sled::open(path)?;
            Ok((db, true))
        }
        Err(e) => Err(KerfError::Index(format!(
            "cannot open index at {}: {}",
            path.display(),
            e
        ))),
    }
}

pub(crate) fn tx_error(e: TransactionError<KerfError>) -> KerfError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => KerfError::Sled(e),
    }
}

fn is_referencable(kind: &str) -> bool {
    matches!(
        kind,
        "function" | "method" | "class" | "struct" | "interface" | "trait" | "enum" | "type" | "const"
    )
}

/// Lowercase names whose definers decide reference edges
fn reference_names(node: &FileNode) -> impl Iterator<Item = String> + '_ {
    node.symbols
        .iter()
        .filter(|s| is_referencable(&s.kind) && s.name.len() >= MIN_REFERENCE_NAME_LEN)
        .map(|s| s.name.to_lowercase())
}

fn symbol_shapes(node: &FileNode) -> BTreeSet<String> {
    node.symbols
        .iter()
        .filter(|s| is_referencable(&s.kind))
        .map(|s| s.shape())
        .collect()
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                size += dir_size(&entry.path())?;
            } else {
                size += meta.len();
            }
        }
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("static")).unwrap();
        fs::write(
            root.join("auth.py"),
            "import db\n\n\ndef login(user, password):\n    session = db.connect()\n    return session.check(user, password)\n",
        )
        .unwrap();
        fs::write(
            root.join("db.py"),
            "def connect():\n    return Session()\n\n\nclass Session:\n    def check(self, user, password):\n        return True\n",
        )
        .unwrap();
        fs::write(root.join("static/styles.css"), "body { color: red; }\n").unwrap();
        dir
    }

    fn open(root: &Path) -> CodeIndex {
        CodeIndex::open(root, &IndexConfig::default()).unwrap()
    }

    #[test]
    fn test_scan_indexes_files_and_edges() {
        let dir = project();
        let index = open(dir.path());
        assert!(index.needs_rescan());

        let summary = index.scan().unwrap();
        assert_eq!(summary.indexed, 3);
        assert!(!index.needs_rescan());
        assert_eq!(index.paths().unwrap(), vec!["auth.py", "db.py", "static/styles.css"]);

        let deps = index.dependencies("auth.py").unwrap();
        assert!(deps
            .iter()
            .any(|e| e.target == "db.py" && e.kind == EdgeKind::Imports));
        let dependents = index.dependents("db.py").unwrap();
        assert!(dependents.iter().any(|e| e.source == "auth.py"));
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();
        let edges_before = index.all_edges().unwrap();
        let generation = index.generation();

        let summary = index.scan().unwrap();
        assert_eq!(summary.indexed, 0);
        assert_eq!(summary.unchanged, 3);
        assert_eq!(index.generation(), generation);
        assert_eq!(index.all_edges().unwrap(), edges_before);
    }

    #[test]
    fn test_update_removes_deleted_file_and_edges() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();

        fs::remove_file(dir.path().join("db.py")).unwrap();
        let summary = index.update(&["db.py"]).unwrap();
        assert_eq!(summary.removed, 1);
        assert!(index.get_file("db.py").unwrap().is_none());
        assert!(index.dependencies("auth.py").unwrap().is_empty());
        assert!(index.dependents("db.py").unwrap().is_empty());
    }

    #[test]
    fn test_refresh_picks_up_changes() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();
        let generation = index.generation();

        fs::write(dir.path().join("utils.py"), "def slugify(text):\n    return text\n").unwrap();
        let summary = index.refresh().unwrap();
        assert_eq!(summary.indexed, 1);
        assert!(index.generation() > generation);
        assert!(index.get_file("utils.py").unwrap().is_some());

        let quiet = index.refresh().unwrap();
        assert!(!quiet.changed());
    }

    #[test]
    fn test_reference_edges() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();
        // auth.py mentions `connect`, defined only in db.py
        let deps = index.dependencies("auth.py").unwrap();
        assert!(deps
            .iter()
            .any(|e| e.target == "db.py" && e.kind == EdgeKind::References));
    }

    #[test]
    fn test_malformed_file_keeps_metadata() {
        let dir = project();
        fs::write(dir.path().join("broken.json"), "{\"a\": ").unwrap();
        let index = open(dir.path());
        let summary = index.scan().unwrap();
        assert_eq!(summary.parse_failures, 1);

        let node = index.get_file("broken.json").unwrap().unwrap();
        assert!(node.parse_failed);
        assert!(node.symbols.is_empty());
        assert_eq!(node.size, 6);
        assert!(index.get_file("auth.py").unwrap().is_some());
    }

    #[test]
    fn test_search_modes() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();

        let hits = index.search("login", SearchKind::Function, 10).unwrap();
        assert_eq!(hits[0].path, "auth.py");
        assert_eq!(hits[0].name.as_deref(), Some("login"));

        let classes = index.search("Session", SearchKind::Class, 10).unwrap();
        assert_eq!(classes[0].path, "db.py");

        let imports = index.search("db", SearchKind::Import, 10).unwrap();
        assert!(imports.iter().any(|h| h.path == "auth.py"));

        let content = index.search("password", SearchKind::Content, 10).unwrap();
        let paths: Vec<&str> = content.iter().map(|h| h.path.as_str()).collect();
        assert!(paths.contains(&"auth.py"));
        assert!(paths.contains(&"db.py"));

        assert!(index.search("", SearchKind::Combined, 10).unwrap().is_empty());
    }

    #[test]
    fn test_related_files() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();

        let related = index.related_files("db.py", 5).unwrap();
        assert_eq!(related[0].path, "auth.py");
        assert_eq!(related[0].relation, Relation::Dependent);
        assert!(related.iter().all(|r| r.path != "db.py"));

        let capped = index.related_files("auth.py", 1).unwrap();
        assert_eq!(capped.len(), 1);

        assert!(matches!(
            index.related_files("missing.py", 5),
            Err(KerfError::NotFound(_))
        ));
    }

    #[test]
    fn test_touch_does_not_bump_generation() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();
        let generation = index.generation();

        index.touch(&["auth.py", "auth.py", "nope.py"]).unwrap();
        assert_eq!(index.get_file("auth.py").unwrap().unwrap().access_count, 2);
        assert_eq!(index.generation(), generation);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = project();
        {
            let index = open(dir.path());
            index.scan().unwrap();
            index.flush().unwrap();
        }
        let index = open(dir.path());
        assert!(!index.needs_rescan());
        assert_eq!(index.file_count(), 3);
        assert!(index.generation() >= 1);
    }

    #[test]
    fn test_schema_mismatch_forces_rescan() {
        let dir = project();
        {
            let index = open(dir.path());
            index.scan().unwrap();
            index.metadata.insert("schema_version", &99u64.to_le_bytes()).unwrap();
            index.flush().unwrap();
        }
        let index = open(dir.path());
        assert!(index.needs_rescan());
        assert_eq!(index.file_count(), 0);
        index.refresh().unwrap();
        assert_eq!(index.file_count(), 3);
    }

    #[test]
    fn test_stats() {
        let dir = project();
        let index = open(dir.path());
        index.scan().unwrap();
        let stats = index.stats().unwrap();
        assert_eq!(stats.file_count, 3);
        assert!(stats.edge_count >= 1);
        assert!(stats.symbol_count >= 3);
        assert_eq!(stats.generation, 1);
    }
}
