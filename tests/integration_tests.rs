use std::io::Write as _;

use md5::{Digest, Md5};

use edge_algo_agent::catalog::Catalog;
use edge_algo_agent::envelope::{AlgorithmAddParams, FlexibleInt};
use edge_algo_agent::error::{AgentError, Outcome};
use edge_algo_agent::lifecycle::ArtifactLifecycleEngine;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Builds a single-entry zip archive (`hello.txt` containing `contents`) and
/// returns its bytes alongside the lowercase hex MD5 of the whole archive,
/// mirroring what a real algorithm artifact download looks like
/// (`spec.md` §4.3 install steps 3-6).
fn build_archive(contents: &[u8]) -> (Vec<u8>, String) {
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("hello.txt", options).unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap();
    }
    let digest = hex::encode(Md5::new().chain_update(&buf).finalize());
    (buf, digest)
}

/// Serves `body` as the full response to exactly one HTTP request, then
/// shuts down. Good enough to exercise the downloader's streaming path
/// without pulling in a real HTTP server dependency the rest of the pack
/// doesn't use for tests.
async fn serve_once(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut discard = [0u8; 1024];
        let _ = socket.read(&mut discard).await;
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = socket.write_all(header.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/archive.zip")
}

fn add_params(algorithm_id: &str, version: &str, url: String, md5: String) -> AlgorithmAddParams {
    AlgorithmAddParams {
        algorithm_id: algorithm_id.to_string(),
        algorithm_name: "edge-detector".to_string(),
        algorithm_version: version.to_string(),
        algorithm_version_id: format!("{version}-id"),
        algorithm_data_url: url,
        file_size: FlexibleInt(0),
        last_modify_time: String::new(),
        md5,
    }
}

#[tokio::test]
async fn fresh_install_then_list_then_delete() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body, md5) = build_archive(b"weights-v1");
    let url = serve_once(body).await;

    let outcome = engine.install(add_params("algo-1", "1.0.0", url, md5)).await;
    assert!(matches!(outcome, Outcome::Success(_)), "install should succeed: {outcome:?}");

    let installed = dir.path().join("algo-1").join("1.0.0-id").join("hello.txt");
    assert!(installed.exists(), "unpacked file should exist at {}", installed.display());

    let entries = engine.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].algorithm_id, "algo-1");
    assert_eq!(entries[0].run_status, 0);

    let outcome = engine.delete("algo-1").await;
    assert!(matches!(outcome, Outcome::Success(_)));
    assert!(!dir.path().join("algo-1").exists());
    assert!(engine.list().unwrap().is_empty());
}

#[tokio::test]
async fn md5_mismatch_fails_install_and_cleans_up_target_dir() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body, _correct_md5) = build_archive(b"weights-v1");
    let url = serve_once(body).await;

    let outcome = engine
        .install(add_params("algo-2", "1.0.0", url, "0".repeat(32)))
        .await;
    match outcome {
        Outcome::Failure(AgentError::HashMismatch { .. }) => {}
        other => panic!("expected HashMismatch failure, got {other:?}"),
    }

    assert!(!dir.path().join("algo-2").exists(), "target dir should be cleaned up on mismatch");
    assert!(engine.list().unwrap().is_empty());
}

#[tokio::test]
async fn installing_same_version_twice_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body, md5) = build_archive(b"weights-v1");
    let url = serve_once(body).await;
    let outcome = engine
        .install(add_params("algo-3", "1.0.0", url.clone(), md5.clone()))
        .await;
    assert!(matches!(outcome, Outcome::Success(_)));

    let outcome = engine.install(add_params("algo-3", "1.0.0", url, md5)).await;
    match outcome {
        Outcome::Failure(AgentError::Duplicate { algorithm_id, .. }) => {
            assert_eq!(algorithm_id, "algo-3");
        }
        other => panic!("expected Duplicate failure, got {other:?}"),
    }
}

#[tokio::test]
async fn upgrading_to_a_new_version_updates_catalog_and_filesystem() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body_v1, md5_v1) = build_archive(b"weights-v1");
    let url_v1 = serve_once(body_v1).await;
    let outcome = engine.install(add_params("algo-4", "1.0.0", url_v1, md5_v1)).await;
    assert!(matches!(outcome, Outcome::Success(_)));

    let (body_v2, md5_v2) = build_archive(b"weights-v2");
    let url_v2 = serve_once(body_v2).await;
    let outcome = engine.install(add_params("algo-4", "2.0.0", url_v2, md5_v2)).await;
    assert!(matches!(outcome, Outcome::Success(_)), "distinct version should install: {outcome:?}");

    let entries = engine.list().unwrap();
    assert_eq!(entries.len(), 1, "install of a new version overwrites the catalog slot");
    assert_eq!(entries[0].algorithm_version, "2.0.0");

    assert!(
        !dir.path().join("algo-4").join("1.0.0-id").exists(),
        "prior version directory should be removed after upgrade"
    );
    assert!(
        dir.path().join("algo-4").join("2.0.0-id").join("hello.txt").exists(),
        "new version directory should be present after upgrade"
    );
}

#[tokio::test]
async fn deleting_missing_algorithm_is_idempotent_warning() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let outcome = engine.delete("never-installed").await;
    assert!(matches!(outcome, Outcome::Warning(_)));
}

#[tokio::test]
async fn set_run_status_then_list_reflects_new_value() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body, md5) = build_archive(b"weights-v1");
    let url = serve_once(body).await;
    engine.install(add_params("algo-5", "1.0.0", url, md5)).await;

    let outcome = engine.set_run_status("algo-5", 1).await;
    assert!(matches!(outcome, Outcome::Success(_)));

    let entries = engine.list().unwrap();
    assert_eq!(entries[0].run_status, 1);
}

#[tokio::test]
async fn concurrent_installs_of_distinct_algorithms_do_not_block_each_other() {
    let dir = tempdir().unwrap();
    let engine = ArtifactLifecycleEngine::new(
        Catalog::open_temp().unwrap(),
        edge_algo_agent::layout::ArtifactLayout::new(dir.path()),
    );

    let (body_a, md5_a) = build_archive(b"a");
    let (body_b, md5_b) = build_archive(b"b");
    let url_a = serve_once(body_a).await;
    let url_b = serve_once(body_b).await;

    let engine_a = engine.clone();
    let engine_b = engine.clone();
    let (outcome_a, outcome_b) = tokio::join!(
        engine_a.install(add_params("algo-6a", "1.0.0", url_a, md5_a)),
        engine_b.install(add_params("algo-6b", "1.0.0", url_b, md5_b)),
    );
    assert!(matches!(outcome_a, Outcome::Success(_)));
    assert!(matches!(outcome_b, Outcome::Success(_)));
    assert_eq!(engine.list().unwrap().len(), 2);
}
