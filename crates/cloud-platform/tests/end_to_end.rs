//! Cross-component scenarios from §8: happy path, duplicate suppression,
//! and bulk ingest with one bad line.

use comidf_cloud_platform::{
    build_router, AdminRegistry, AflEngine, AppState, GlobalCorrelator, InMemoryIdempotencyCache,
    LoggingPublisher,
};
use std::sync::Arc;

async fn spawn_server() -> (String, Arc<GlobalCorrelator>) {
    let correlator = Arc::new(GlobalCorrelator::new(0.9));
    let afl = Arc::new(AflEngine::new(correlator.clone(), 0.1));
    let state = AppState {
        publisher: Arc::new(LoggingPublisher::new(correlator.clone())),
        cache: Arc::new(InMemoryIdempotencyCache::new(86400)),
        admin: Arc::new(AdminRegistry::new()),
        afl,
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{addr}"), correlator)
}

fn uer_json(uid: &str, score: f64, conf: f64) -> serde_json::Value {
    serde_json::json!({
        "uid": uid,
        "ts": chrono::Utc::now().to_rfc3339(),
        "src": {"ip": "10.0.0.1"},
        "dst": {"ip": "10.0.0.2"},
        "proto": {"l7": "MQTT"},
        "stats": {"len_mean": 512.0},
        "detector": {"score": score, "conf": conf, "model": "mqtt-v1"},
    })
}

#[tokio::test]
async fn scenario_1_happy_path_single_event() {
    let (base, correlator) = spawn_server().await;
    let client = reqwest::Client::new();

    let uid = "1".repeat(64);
    let resp = client
        .post(format!("{base}/api/fal/uer"))
        .header("X-Tenant-ID", "tenant-a")
        .header("X-Agent-ID", "edge-1")
        .json(&uer_json(&uid, 0.9, 0.9))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ingested");

    let result = correlator.close_window("tenant-a", chrono::Utc::now()).unwrap();
    assert!((result.posterior - 0.9).abs() < 1e-9);
    assert!((result.uncertainty - 0.1).abs() < 1e-9);

    let pr = comidf_cloud_platform::PolicyResponse::new(Default::default());
    let alert = pr.evaluate(&result);
    assert_eq!(alert.action, comidf_cloud_platform::Action::Alert);
    assert_eq!(alert.severity, comidf_cloud_platform::Severity::High);
}

#[tokio::test]
async fn scenario_2_duplicate_is_not_forwarded_twice() {
    let (base, correlator) = spawn_server().await;
    let client = reqwest::Client::new();
    let uid = "2".repeat(64);

    let first = client
        .post(format!("{base}/api/fal/uer"))
        .header("X-Tenant-ID", "tenant-a")
        .header("X-Agent-ID", "edge-1")
        .json(&uer_json(&uid, 0.8, 0.8))
        .send()
        .await
        .unwrap();
    let first_body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(first_body["status"], "ingested");

    let second = client
        .post(format!("{base}/api/fal/uer"))
        .header("X-Tenant-ID", "tenant-a")
        .header("X-Agent-ID", "edge-1")
        .json(&uer_json(&uid, 0.8, 0.8))
        .send()
        .await
        .unwrap();
    let second_body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second_body["status"], "duplicate");

    let result = correlator.close_window("tenant-a", chrono::Utc::now()).unwrap();
    assert_eq!(result.agent_count, 1, "the duplicate must not have reached the correlator window");
}

#[tokio::test]
async fn scenario_4_bulk_with_one_bad_line() {
    let (base, _correlator) = spawn_server().await;
    let client = reqwest::Client::new();

    let good1 = uer_json(&"3".repeat(64), 0.7, 0.7);
    let mut bad = uer_json(&"4".repeat(64), 0.7, 0.7);
    bad["detector"].as_object_mut().unwrap().remove("score");
    let good2 = uer_json(&"5".repeat(64), 0.7, 0.7);

    let body = format!(
        "{}\n{}\n{}\n",
        serde_json::to_string(&good1).unwrap(),
        serde_json::to_string(&bad).unwrap(),
        serde_json::to_string(&good2).unwrap()
    );

    let resp = client
        .post(format!("{base}/api/fal/uer/_bulk"))
        .header("X-Tenant-ID", "tenant-a")
        .header("X-Agent-ID", "edge-1")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let parsed: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(parsed["ingested"], 2);
    assert_eq!(parsed["errors"][0]["line"], 1);
    assert_eq!(parsed["errors"][0]["error"], "Missing detector.score");
}
