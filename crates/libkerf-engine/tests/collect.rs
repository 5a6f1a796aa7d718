//! End-to-end collect tests against small on-disk projects

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libkerf_core::config::KerfConfig;
use libkerf_core::error::KerfError;
use libkerf_core::types::{ContextCollection, ContextRequest, FileNode, Fingerprint};
use libkerf_engine::{Computed, ContextCache, ContextManager, SemanticScorer, TokenOverlapScorer};
use tempfile::tempdir;

fn write_project(root: &Path) {
    fs::create_dir_all(root.join("static")).unwrap();
    fs::create_dir_all(root.join("tests")).unwrap();
    fs::write(
        root.join("auth.py"),
        "import db\n\n\ndef login(user, password):\n    \"\"\"Check credentials.\"\"\"\n    session = db.connect()\n    return session.check(user, password)\n\n\ndef logout(session):\n    session.close()\n",
    )
    .unwrap();
    fs::write(
        root.join("db.py"),
        "def connect():\n    return Session()\n\n\nclass Session:\n    def check(self, user, password):\n        return True\n\n    def close(self):\n        pass\n",
    )
    .unwrap();
    fs::write(
        root.join("tests/test_auth.py"),
        "from auth import login\n\n\ndef test_login():\n    assert login('a', 'b')\n",
    )
    .unwrap();
    fs::write(root.join("static/styles.css"), "body { color: #333; }\n.button { padding: 4px; }\n").unwrap();
    fs::write(root.join("README.md"), "# Shop\n\nA small web shop.\n").unwrap();
}

fn quiet_config() -> KerfConfig {
    let mut config = KerfConfig::default();
    config.workers.enabled = false;
    config
}

fn open(root: &Path) -> ContextManager {
    ContextManager::open_with(root, quiet_config(), Arc::new(TokenOverlapScorer)).expect("Failed to open manager")
}

/// Token overlap after a fixed delay, like a remote scorer would answer
struct SlowScorer(Duration);

#[async_trait]
impl SemanticScorer for SlowScorer {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn score(&self, description: &str, files: &[FileNode]) -> Result<BTreeMap<String, f64>, KerfError> {
        tokio::time::sleep(self.0).await;
        Ok(TokenOverlapScorer.score_now(description, files))
    }
}

fn login_request(root: &Path, budget: i64) -> ContextRequest {
    ContextRequest::new("fix the login bug in auth", "developer", "implementation", budget, root)
}

#[tokio::test]
async fn test_relevant_file_outranks_unrelated_within_budget() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    let bundle = manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    assert!(bundle.contains("auth.py"), "bundle: {:?}", bundle.paths().collect::<Vec<_>>());
    assert!(bundle.total_tokens <= 2000);
    assert!(bundle.is_within_budget());

    let score = |path: &str| bundle.entries.iter().find(|e| e.path == path).map(|e| e.relevance);
    if let Some(css) = score("static/styles.css") {
        assert!(score("auth.py").unwrap() > css);
    }
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    let first = manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    let second = manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    assert_eq!(*first, *second);

    let stats = manager.cache().stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_tiny_budget_never_overshoots() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    for budget in [1, 5, 20, 60] {
        let bundle = manager.collect_context(login_request(dir.path(), budget), None).await.unwrap();
        assert!(
            bundle.total_tokens <= budget as usize,
            "budget {} produced {} tokens",
            budget,
            bundle.total_tokens
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_compute_once() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = Arc::new(open(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let root = dir.path().to_path_buf();
            tokio::spawn(async move { manager.collect_context(login_request(&root, 2000), None).await })
        })
        .collect();

    let mut bundles = Vec::new();
    for handle in handles {
        bundles.push(handle.await.unwrap().unwrap());
    }
    assert!(bundles.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(manager.cache().stats().computations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesced_callers_share_one_computation() {
    let cache = Arc::new(ContextCache::new(quiet_config().cache));
    let runs = Arc::new(AtomicUsize::new(0));
    let fp = Fingerprint([7; 32]);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                cache
                    .get_or_compute(fp, fp, move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Computed::complete(ContextCollection::new(fp.to_hex(), 100, 1)))
                    })
                    .await
            })
        })
        .collect();
    for handle in handles {
        let bundle = handle.await.unwrap().unwrap();
        assert_eq!(bundle.fingerprint, fp.to_hex());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_elapsed_deadline_returns_partial_and_skips_cache() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    let bundle = manager
        .collect_context(login_request(dir.path(), 2000), Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(bundle.truncated);
    assert!(bundle.total_tokens <= 2000);
    assert!(manager.cache().is_empty());

    // Without a deadline the full bundle is computed and cached
    let full = manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    assert!(!full.truncated);
    assert!(full.contains("auth.py"));
    assert_eq!(manager.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_without_deadline_is_not_cut_short_by_another() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let scorer = Arc::new(SlowScorer(Duration::from_millis(300)));
    let manager = Arc::new(ContextManager::open_with(dir.path(), quiet_config(), scorer).unwrap());

    let hurried = {
        let manager = Arc::clone(&manager);
        let root = dir.path().to_path_buf();
        tokio::spawn(async move {
            manager
                .collect_context(login_request(&root, 2000), Some(Duration::from_millis(150)))
                .await
        })
    };
    // Join the in-flight computation started under the short deadline
    tokio::time::sleep(Duration::from_millis(30)).await;
    let patient = manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    let hurried = hurried.await.unwrap().unwrap();

    assert!(hurried.truncated);
    assert!(!patient.truncated);
    assert!(patient.contains("auth.py"));
    let stats = manager.cache().stats();
    assert_eq!(stats.coalesced_waits, 1);
    assert_eq!(stats.computations, 2);
    assert_eq!(manager.cache().len(), 1);
}

// Index, file and memory work goes through the blocking pool, which a
// current-thread runtime must still serve
#[tokio::test]
async fn test_collect_on_single_thread_runtime() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    for i in 0..150 {
        fs::write(
            dir.path().join(format!("module_{}.py", i)),
            format!("def login_step_{}(user):\n    return user\n", i),
        )
        .unwrap();
    }
    let manager = open(dir.path());

    let ticker = tokio::spawn(async {
        let mut ticks = 0;
        while ticks < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            ticks += 1;
        }
        ticks
    });
    for budget in [1500, 2500, 3500] {
        let bundle = manager.collect_context(login_request(dir.path(), budget), None).await.unwrap();
        assert!(bundle.total_tokens <= budget as usize);
        assert!(bundle.contains("auth.py"));
    }
    assert_eq!(ticker.await.unwrap(), 3);
    assert_eq!(manager.memory().unwrap().records("developer").unwrap().len(), 3);
}

#[tokio::test]
async fn test_file_change_invalidates_after_refresh() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    let before = manager.collect_context(login_request(dir.path(), 4000), None).await.unwrap();
    assert!(!before.render().contains("def login_with_token"));

    fs::write(
        dir.path().join("auth.py"),
        "def login(user, password):\n    return True\n\n\ndef login_with_token(token):\n    return token\n",
    )
    .unwrap();
    let summary = manager.refresh_index().unwrap();
    assert!(summary.changed());

    let after = manager.collect_context(login_request(dir.path(), 4000), None).await.unwrap();
    assert!(after.generation > before.generation);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert!(after.render().contains("login_with_token"));
}

#[tokio::test]
async fn test_memory_shapes_later_requests() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let manager = open(dir.path());

    manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    let memory = manager.memory().expect("memory available");
    let records = memory.records("developer").unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].linked_files.iter().any(|f| f == "auth.py"));

    // The recorded task makes its files historically relevant to a similar one
    let affinity = memory.file_affinity("developer", "login bug in auth again").unwrap();
    assert!(affinity.get("auth.py").copied().unwrap_or(0.0) > 0.0);
}

#[tokio::test]
async fn test_workers_start_and_close() {
    let dir = tempdir().unwrap();
    write_project(dir.path());
    let mut config = KerfConfig::default();
    config.cache.predict_interval_ms = 20;
    config.cache.warm_interval_ms = 20;
    config.workers.reindex_interval_ms = 20;
    let manager = ContextManager::open_with(dir.path(), config, Arc::new(TokenOverlapScorer)).unwrap();
    manager.start_workers();

    manager.collect_context(login_request(dir.path(), 2000), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    manager.close().await.unwrap();
    assert!(manager.collect_context(login_request(dir.path(), 2000), None).await.is_err());
}
