//! End-to-end tests over real sockets: origin server, coordinator,
//! in-process agents, and the one-shot client.

mod common;

use std::sync::Arc;

use ddson_core::checksum;
use ddson_core::config::CoordinatorConfig;
use ddson_core::rpc::{client, DownloadStatus, FrameConn, Reply, Request};
use ddson_core::server::Coordinator;
use tempfile::TempDir;
use tokio::net::TcpListener;

use common::range_server::{self, Origin, OriginOptions};

const CHUNK: u64 = 64 * 1024;

struct Harness {
    coordinator: Arc<Coordinator>,
    addr: String,
    _workspace: TempDir,
}

async fn start_coordinator(chunk_size: u64) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let cfg = CoordinatorConfig {
        chunk_size,
        status_interval_secs: 1,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(workspace.path(), cfg).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    coordinator.spawn_queue_runner();
    tokio::spawn(Arc::clone(&coordinator).serve(listener));
    Harness {
        coordinator,
        addr,
        _workspace: workspace,
    }
}

/// Bind an agent listener, register it with the coordinator, return its id.
async fn start_agent(harness: &Harness, name: &str) -> i64 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = ddson_core::agent::serve(listener).await;
    });
    let (id, server_version) = client::register(&harness.addr, name, port).await.unwrap();
    assert_eq!(server_version, ddson_core::version::PROTOCOL_VERSION);
    id
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn fetch(
    harness: &Harness,
    origin: &Origin,
    checksum: Option<&str>,
) -> (anyhow::Result<u64>, Vec<u8>, Vec<DownloadStatus>) {
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("out.bin");
    let mut frames = Vec::new();
    let result = ddson_core::client::download_to_file(
        &harness.addr,
        &origin.url,
        checksum,
        &out_path,
        |status| frames.push(status.clone()),
    )
    .await;
    let content = std::fs::read(&out_path).unwrap_or_default();
    (result, content, frames)
}

#[tokio::test]
async fn two_agents_download_and_reassemble() {
    let body = test_body(200_000); // 4 chunks at 64 KiB, last one short
    let origin = range_server::start(body.clone());
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent-a").await;
    start_agent(&harness, "agent-b").await;

    let (result, content, frames) = fetch(&harness, &origin, None).await;
    assert_eq!(result.unwrap(), body.len() as u64);
    assert_eq!(content, body, "reassembled bytes equal the origin's");

    // Agents actually did the chunk work.
    assert!(origin.get_count() >= 4, "expected ranged GETs per chunk");

    // Frame discipline: Pending first, data frames bounded at 1 MiB.
    assert!(matches!(frames[0], DownloadStatus::Pending { .. }));
    for frame in &frames {
        if let DownloadStatus::Transferring { data } = frame {
            assert!(data.len() <= 1024 * 1024);
        }
    }

    // The artifact is cached and agents are all free again.
    let cached = harness
        .coordinator
        .cache
        .get(&origin.url, None)
        .await
        .unwrap()
        .expect("cache row after completion");
    assert_eq!(std::fs::metadata(&cached).unwrap().len(), body.len() as u64);
    assert_eq!(harness.coordinator.registry.busy_count(), 0);
}

#[tokio::test]
async fn single_agent_serves_all_chunks_sequentially() {
    let body = test_body(5 * CHUNK as usize);
    let origin = range_server::start(body.clone());
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "lonely").await;

    let (result, content, _frames) = fetch(&harness, &origin, None).await;
    assert_eq!(result.unwrap(), body.len() as u64);
    assert_eq!(content, body);
}

#[tokio::test]
async fn validating_frame_precedes_transfer_on_good_checksum() {
    let body = test_body(3 * CHUNK as usize / 2);
    let origin = range_server::start(body.clone());
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent").await;

    let sum = {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, &body).unwrap();
        checksum::sha256_file(tmp.path()).unwrap()
    };

    let (result, content, frames) = fetch(&harness, &origin, Some(&sum)).await;
    assert!(result.is_ok(), "stream should end cleanly: {result:?}");
    assert_eq!(content, body);

    let validating_at = frames
        .iter()
        .position(|f| matches!(f, DownloadStatus::Validating))
        .expect("a Validating frame");
    let first_transfer_at = frames
        .iter()
        .position(|f| matches!(f, DownloadStatus::Transferring { .. }))
        .expect("Transferring frames");
    assert!(validating_at < first_transfer_at);
}

#[tokio::test]
async fn wrong_checksum_fails_and_caches_nothing() {
    let body = test_body(CHUNK as usize);
    let origin = range_server::start(body);
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent").await;

    let wrong = "0".repeat(64);
    let (result, content, frames) = fetch(&harness, &origin, Some(&wrong)).await;
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("checksum mismatch"),
        "got: {err:#}"
    );
    assert!(content.is_empty(), "no artifact bytes delivered");
    assert!(frames
        .iter()
        .any(|f| matches!(f, DownloadStatus::Validating)));

    let cached = harness.coordinator.cache.get(&origin.url, None).await.unwrap();
    assert!(cached.is_none(), "failed validation must not populate the cache");
}

#[tokio::test]
async fn origin_without_ranges_fails_without_touching_agents() {
    let body = test_body(CHUNK as usize);
    let origin = range_server::start_with_options(
        body,
        OriginOptions {
            advertise_ranges: false,
        },
    );
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent").await;

    let (result, _content, _frames) = fetch(&harness, &origin, None).await;
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("ranged"),
        "expected a range-support failure, got: {err:#}"
    );
    assert_eq!(origin.get_count(), 0, "no agent fetched anything");
    assert_eq!(harness.coordinator.registry.busy_count(), 0);
}

#[tokio::test]
async fn second_download_is_served_from_cache() {
    let body = test_body(3 * CHUNK as usize);
    let origin = range_server::start(body.clone());
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent").await;

    let (first, first_content, _) = fetch(&harness, &origin, None).await;
    first.unwrap();
    assert_eq!(first_content, body);
    let gets_after_first = origin.get_count();
    assert!(gets_after_first >= 3);

    let (second, second_content, frames) = fetch(&harness, &origin, None).await;
    second.unwrap();
    assert_eq!(second_content, body, "cache round-trip is byte-identical");
    assert_eq!(
        origin.get_count(),
        gets_after_first,
        "cache hit must not dispatch DownloadPart work"
    );
    assert!(matches!(frames[0], DownloadStatus::Pending { .. }));
    assert_eq!(harness.coordinator.registry.busy_count(), 0);
}

#[tokio::test]
async fn zero_byte_artifact_with_checksum_of_empty_input() {
    let origin = range_server::start(Vec::new());
    let harness = start_coordinator(CHUNK).await;
    start_agent(&harness, "agent").await;

    // SHA-256 of empty input.
    let empty_sum = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("empty.bin");
    let received = ddson_core::client::download_to_file(
        &harness.addr,
        &origin.url,
        Some(empty_sum),
        &out_path,
        |_| {},
    )
    .await
    .unwrap();

    assert_eq!(received, 0);
    assert_eq!(std::fs::metadata(&out_path).unwrap().len(), 0);
    assert_eq!(origin.get_count(), 0, "zero subtasks planned");
}

#[tokio::test]
async fn dead_agent_in_pool_is_retried_around() {
    let body = test_body(4 * CHUNK as usize);
    let origin = range_server::start(body.clone());
    let harness = start_coordinator(CHUNK).await;

    // A registered agent whose endpoint refuses connections: bind a port to
    // learn a free number, then drop the listener.
    let dead_port = {
        let throwaway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        throwaway.local_addr().unwrap().port()
    };
    client::register(&harness.addr, "dead", dead_port)
        .await
        .unwrap();
    start_agent(&harness, "alive").await;

    // Every chunk that lands on the dead agent is retried on the live one;
    // the dead agent accumulates errors and is eventually retired.
    let (result, content, _frames) = fetch(&harness, &origin, None).await;
    assert_eq!(result.unwrap(), body.len() as u64);
    assert_eq!(content, body);
}

#[tokio::test]
async fn heartbeat_endpoint_reports_unknown_ids_softly() {
    let harness = start_coordinator(CHUNK).await;
    let id = start_agent(&harness, "beater").await;

    let (ok, _msg) = client::heartbeat(&harness.addr, "beater", id).await.unwrap();
    assert!(ok);

    let (ok, msg) = client::heartbeat(&harness.addr, "beater", 999).await.unwrap();
    assert!(!ok);
    assert!(msg.contains("not registered"));

    let (ok, msg) = client::heartbeat(&harness.addr, "impostor", id).await.unwrap();
    assert!(!ok);
    assert!(msg.contains("name mismatch"));
}

#[tokio::test]
async fn register_rejects_incompatible_versions() {
    let harness = start_coordinator(CHUNK).await;

    let mut conn = FrameConn::connect(&harness.addr).await.unwrap();
    conn.send(&Request::Register {
        name: "old-agent".into(),
        version: "9.9.0-ancient".into(),
        port: 1234,
    })
    .await
    .unwrap();
    match conn.recv::<Reply>().await.unwrap() {
        Some(Reply::Error { message }) => {
            assert!(message.contains("incompatible"), "got: {message}");
        }
        other => panic!("expected an error reply, got {other:?}"),
    }
    assert_eq!(harness.coordinator.registry.count(), 0);
}
