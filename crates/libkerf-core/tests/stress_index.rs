//! Stress tests for concurrent index access
//!
//! Readers query while writers re-index; the graph must stay symmetric and
//! readers must never see an error.

use libkerf_core::config::IndexConfig;
use libkerf_core::index::{CodeIndex, SearchKind};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn write_module(root: &Path, i: usize, version: usize) {
    let imports = if i > 0 { format!("import mod_{}\n\n", i - 1) } else { String::new() };
    fs::write(
        root.join(format!("mod_{}.py", i)),
        format!(
            "{}def handler_{}_{}(request):\n    return request.user\n\n\nclass Service{}:\n    pass\n",
            imports, i, version, i
        ),
    )
    .unwrap();
}

fn assert_symmetric(index: &CodeIndex) {
    for edge in index.all_edges().expect("Failed to list edges") {
        let dependents = index.dependents(&edge.target).expect("Failed to read dependents");
        assert!(
            dependents.iter().any(|d| d.source == edge.source && d.kind == edge.kind),
            "reverse lookup of {} is missing {}",
            edge.target,
            edge.source
        );
    }
}

#[test]
fn test_concurrent_readers_and_writers() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let num_files = 20;
    for i in 0..num_files {
        write_module(root, i, 0);
    }

    let index = Arc::new(CodeIndex::open(root, &IndexConfig::default()).expect("Failed to open index"));
    index.scan().expect("Failed to scan");

    let num_writers = 4;
    let num_readers = 4;
    let rounds = 10;
    let barrier = Arc::new(Barrier::new(num_writers + num_readers));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..num_writers)
        .map(|writer_id| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            let root = root.to_path_buf();
            thread::spawn(move || {
                barrier.wait();
                let mut failures = 0;
                for round in 1..=rounds {
                    // Each writer owns a disjoint slice of files
                    for i in (writer_id..num_files).step_by(num_writers) {
                        write_module(&root, i, round);
                        let path = format!("mod_{}.py", i);
                        if let Err(e) = index.update(&[path.as_str()]) {
                            eprintln!("Writer {} round {} failed: {:?}", writer_id, round, e);
                            failures += 1;
                        }
                    }
                }
                failures
            })
        })
        .collect();

    let readers: Vec<_> = (0..num_readers)
        .map(|_| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                barrier.wait();
                let mut failures = 0;
                let mut reads = 0;
                while !done.load(Ordering::SeqCst) || reads == 0 {
                    if index.search("handler", SearchKind::Function, 10).is_err() {
                        failures += 1;
                    }
                    if index.snapshot().is_err() {
                        failures += 1;
                    }
                    if index.dependents("mod_0.py").is_err() {
                        failures += 1;
                    }
                    reads += 1;
                }
                failures
            })
        })
        .collect();

    let writer_failures: usize = writers.into_iter().map(|h| h.join().unwrap()).sum();
    done.store(true, Ordering::SeqCst);
    let reader_failures: usize = readers.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(writer_failures, 0);
    assert_eq!(reader_failures, 0);
    assert_eq!(index.file_count(), num_files);
    assert_symmetric(&index);

    // Every file ends on its last version
    let hits = index
        .search(&format!("handler_5_{}", rounds), SearchKind::Function, 5)
        .expect("Failed to search");
    assert!(hits.iter().any(|h| h.path == "mod_5.py"));
}

#[test]
fn test_graph_symmetry_after_churn() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    for i in 0..10 {
        write_module(root, i, 0);
    }
    let index = CodeIndex::open(root, &IndexConfig::default()).expect("Failed to open index");
    index.scan().expect("Failed to scan");
    assert_symmetric(&index);

    // Break the chain in the middle and rename a module
    fs::remove_file(root.join("mod_4.py")).unwrap();
    fs::rename(root.join("mod_7.py"), root.join("mod_70.py")).unwrap();
    index.refresh().expect("Failed to refresh");
    assert_symmetric(&index);

    assert!(index.dependencies("mod_5.py").unwrap().iter().all(|e| e.target != "mod_4.py"));
    assert!(index.dependents("mod_7.py").unwrap().is_empty());
}

#[test]
fn test_malformed_file_does_not_abort_siblings() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("good.py"), "import util\n\ndef run():\n    return util.go()\n").unwrap();
    fs::write(root.join("util.py"), "def go():\n    return 1\n").unwrap();
    fs::write(root.join("broken.py"), "def broken(:\n    return ((\n").unwrap();
    fs::write(root.join("bad.json"), "{\"a\": [1, 2,\n").unwrap();

    let index = CodeIndex::open(root, &IndexConfig::default()).expect("Failed to open index");
    let summary = index.scan().expect("Failed to scan");
    assert_eq!(summary.indexed, 4);

    let broken = index.get_file("broken.py").unwrap().expect("broken.py indexed");
    assert!(broken.size > 0);
    #[cfg(feature = "syntax")]
    {
        assert!(broken.parse_failed);
        assert!(broken.symbols.is_empty());
    }
    let bad = index.get_file("bad.json").unwrap().expect("bad.json indexed");
    assert!(bad.parse_failed);

    let good = index.get_file("good.py").unwrap().expect("good.py indexed");
    assert!(good.symbols.iter().any(|s| s.name == "run"));
    assert!(index.dependencies("good.py").unwrap().iter().any(|e| e.target == "util.py"));
}
