use std::collections::HashSet;
use std::time::Duration;

use super::*;
use crate::interchange::read_json;
use crate::remote::RetryPolicy;
use crate::remote::memory::{FailureKind, MemoryRemote, file_node, folder_node, shortcut_node};

// root
// ├── a/ (b, c)
// └── d/ (e, link -> outside)
// outside (no parent)
fn sample_remote() -> Arc<MemoryRemote> {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert(folder_node("root", "Root", None));
    remote.insert(folder_node("a", "A", Some("root")));
    remote.insert(file_node("b", "B.txt", Some("a")));
    remote.insert(file_node("c", "C.txt", Some("a")));
    remote.insert(folder_node("d", "D", Some("root")));
    remote.insert(file_node("e", "E.txt", Some("d")));
    remote.insert(shortcut_node("link", "Link", Some("d"), "outside"));
    remote.insert(file_node("outside", "Outside.pdf", None));
    remote
}

fn scanner(remote: &Arc<MemoryRemote>, options: ScanOptions) -> Scanner {
    let resilient = ResilientRemote::new(remote.clone())
        .with_policy(RetryPolicy::with_time_unit(Duration::from_millis(1)));
    Scanner::new(resilient, options)
}

async fn scanned_ids(path: &Path) -> Vec<String> {
    let nodes: Vec<Node> = read_json(path).await.unwrap();
    nodes.into_iter().map(|n| n.id).collect()
}

fn as_set(ids: &[String]) -> HashSet<&str> {
    ids.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn walks_subtree_and_resolves_shortcuts() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");

    let report = scanner(&remote, ScanOptions::default())
        .scan(&["root".to_string()], &output)
        .await
        .unwrap();

    let ids = scanned_ids(&output).await;
    assert_eq!(ids.len(), 8);
    assert_eq!(
        as_set(&ids),
        HashSet::from(["root", "a", "b", "c", "d", "e", "link", "outside"])
    );
    assert_eq!(report.visited, 8);
    assert_eq!(report.written, 8);
}

#[tokio::test]
async fn parent_chasing_records_each_node_once() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let options = ScanOptions {
        search_parent: true,
        ..ScanOptions::default()
    };

    // Every seed leads back to the same root through its parents.
    let seeds = vec!["b".to_string(), "e".to_string(), "c".to_string()];
    scanner(&remote, options).scan(&seeds, &output).await.unwrap();

    let ids = scanned_ids(&output).await;
    assert_eq!(ids.len(), 8);
    assert_eq!(as_set(&ids).len(), 8);
}

#[tokio::test]
async fn cyclic_parents_are_recorded_once() {
    // x and y name each other as parent, s is its own parent.
    let remote = Arc::new(MemoryRemote::new());
    remote.insert(folder_node("x", "X", Some("y")));
    remote.insert(folder_node("y", "Y", Some("x")));
    remote.insert(file_node("f", "F.txt", Some("x")));
    remote.insert(folder_node("s", "Self", Some("s")));
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let options = ScanOptions {
        search_parent: true,
        flush_every: 1,
        ..ScanOptions::default()
    };

    let report = scanner(&remote, options)
        .scan(&["f".to_string(), "s".to_string()], &output)
        .await
        .unwrap();

    let ids = scanned_ids(&output).await;
    assert_eq!(ids.len(), 4);
    assert_eq!(as_set(&ids), HashSet::from(["f", "s", "x", "y"]));
    assert_eq!(report.visited, 4);
    assert_eq!(report.written, 4);
}

#[tokio::test]
async fn parent_ascent_is_capped() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let options = ScanOptions {
        search_parent: true,
        max_parent_ascent: 1,
        ..ScanOptions::default()
    };

    scanner(&remote, options)
        .scan(&["b".to_string()], &output)
        .await
        .unwrap();

    let ids = scanned_ids(&output).await;
    assert_eq!(as_set(&ids), HashSet::from(["b", "a", "c"]));
}

#[tokio::test]
async fn descent_stops_at_max_depth() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let options = ScanOptions {
        max_depth: 1,
        ..ScanOptions::default()
    };

    scanner(&remote, options)
        .scan(&["root".to_string()], &output)
        .await
        .unwrap();

    let ids = scanned_ids(&output).await;
    assert_eq!(as_set(&ids), HashSet::from(["root", "a", "d"]));
}

#[tokio::test]
async fn small_flush_interval_keeps_every_record() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let options = ScanOptions {
        flush_every: 3,
        max_workers: 3,
        ..ScanOptions::default()
    };

    let report = scanner(&remote, options)
        .scan(&["root".to_string()], &output)
        .await
        .unwrap();

    assert_eq!(scanned_ids(&output).await.len(), 8);
    // Two full batches of three, then the final flush of the remaining two.
    assert_eq!(report.flushes, 3);
}

#[tokio::test]
async fn unavailable_nodes_are_skipped() {
    let remote = sample_remote();
    remote.fail("d", FailureKind::PermissionDenied, 10);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");

    let seeds = vec!["ghost".to_string(), "a".to_string()];
    let report = scanner(&remote, ScanOptions::default())
        .scan(&seeds, &output)
        .await
        .unwrap();

    assert_eq!(report.visited, 3);
    assert_eq!(as_set(&scanned_ids(&output).await), HashSet::from(["a", "b", "c"]));
}

#[tokio::test]
async fn scan_fails_when_no_seed_is_reachable() {
    let remote = sample_remote();
    remote.fail("a", FailureKind::NotFound, 10);
    remote.fail("d", FailureKind::PermissionDenied, 10);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");

    let seeds = vec!["a".to_string(), "d".to_string(), "ghost".to_string()];
    let result = scanner(&remote, ScanOptions::default())
        .scan(&seeds, &output)
        .await;

    assert!(matches!(result, Err(ScanError::NoReachableSeeds(3))));
    assert_eq!(remote.get_calls("a"), 1);
}

#[tokio::test]
async fn empty_folder_produces_single_record() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert(folder_node("empty", "Empty", None));
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");

    let report = scanner(&remote, ScanOptions::default())
        .scan(&["empty".to_string()], &output)
        .await
        .unwrap();

    assert_eq!(report.visited, 1);
    assert_eq!(scanned_ids(&output).await, vec!["empty".to_string()]);
}

#[tokio::test]
async fn missing_seeds_fail_fast() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");

    let err = scanner(&remote, ScanOptions::default())
        .scan(&[], &output)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::NoSeeds));
    assert!(!output.exists());
}

#[tokio::test]
async fn cancelled_scan_still_leaves_valid_output() {
    let remote = sample_remote();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scan.json");
    let scanner = scanner(&remote, ScanOptions::default());
    scanner.cancellation_token().cancel();

    let err = scanner
        .scan(&["root".to_string()], &output)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Cancelled));
    let nodes: Vec<Node> = read_json(&output).await.unwrap();
    assert!(nodes.is_empty());
}
