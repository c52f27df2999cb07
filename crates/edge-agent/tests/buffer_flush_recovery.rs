//! End-to-end test for §8 scenario 3: the cloud ingress is unreachable,
//! the connector buffers instead of dropping, and a later flush delivers
//! the backlog in FIFO order once the ingress recovers.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use comidf_edge_agent::config::{Retry, Tls, Uplink};
use comidf_edge_agent::{DurableBuffer, SecureConnector, SendOutcome};
use comidf_uer::{Normalizer, RawDetector, RawFeatures};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Received(Arc<std::sync::Mutex<Vec<String>>>);

async fn accept_uer(State(received): State<Received>, Json(uer): Json<comidf_uer::Uer>) -> axum::http::StatusCode {
    received.0.lock().unwrap().push(uer.uid);
    axum::http::StatusCode::ACCEPTED
}

async fn start_mock_ingress(fail_first_n: Arc<AtomicUsize>) -> (String, Received) {
    let received = Received::default();
    let app_received = received.clone();
    let counter = fail_first_n.clone();

    let app = Router::new()
        .route(
            "/api/fal/uer",
            post(move |state: State<Received>, body: Json<comidf_uer::Uer>| {
                let counter = counter.clone();
                async move {
                    if counter.load(Ordering::SeqCst) > 0 {
                        counter.fetch_sub(1, Ordering::SeqCst);
                        return axum::http::StatusCode::SERVICE_UNAVAILABLE;
                    }
                    accept_uer(state, body).await
                }
            }),
        )
        .with_state(app_received);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{addr}"), received)
}

fn sample_uer(tag: &str, seq: u64) -> comidf_uer::Uer {
    let n = Normalizer::new("salt");
    let raw = RawFeatures {
        src_ip: Some(format!("10.0.0.{seq}")),
        ..Default::default()
    };
    n.normalize(
        tag,
        &raw,
        &RawDetector {
            score: 0.9,
            conf: 0.8,
            model: None,
            entities: vec![],
            attck_hint: vec![],
        },
        Some("tenant-a".to_string()),
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn outage_buffers_then_flush_delivers_fifo() {
    // Ingress refuses every request until brought "back up".
    let always_down = Arc::new(AtomicUsize::new(usize::MAX));
    let (base_url, received) = start_mock_ingress(always_down.clone()).await;

    let uplink = Uplink {
        mssp_url: base_url.clone(),
        fal_endpoint: "/api/fal/uer".to_string(),
        token: "test-token".to_string(),
        tls: Tls::default(),
        retry: Retry {
            backoff_ms: vec![5, 5],
            max_retries: 2,
            timeout_seconds: 5,
        },
    };
    let connector = SecureConnector::new(&uplink, "agent-1", "tenant-a").unwrap();
    let buffer = DurableBuffer::in_memory().unwrap();

    let a = sample_uer("mqtt", 1);
    let b = sample_uer("mqtt", 2);
    let c = sample_uer("mqtt", 3);

    assert_eq!(connector.send(&buffer, &a).await.unwrap(), SendOutcome::Buffered);
    assert_eq!(connector.send(&buffer, &b).await.unwrap(), SendOutcome::Buffered);
    assert_eq!(connector.send(&buffer, &c).await.unwrap(), SendOutcome::Buffered);
    assert_eq!(buffer.size().unwrap(), 3);
    assert!(received.0.lock().unwrap().is_empty());

    // Ingress recovers.
    always_down.store(0, Ordering::SeqCst);

    let report = connector.flush_buffer(&buffer, 10).await.unwrap();
    assert_eq!(report.sent, 3);
    assert_eq!(buffer.size().unwrap(), 0);

    let got = received.0.lock().unwrap().clone();
    assert_eq!(got, vec![a.uid, b.uid, c.uid], "flush must deliver in FIFO order");
}

#[tokio::test]
async fn permanent_rejection_is_dead_lettered_not_buffered() {
    let received = Received::default();
    let app_received = received.clone();
    let app = Router::new()
        .route(
            "/api/fal/uer",
            post(|_state: State<Received>, _body: Json<comidf_uer::Uer>| async {
                axum::http::StatusCode::UNPROCESSABLE_ENTITY
            }),
        )
        .with_state(app_received);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let uplink = Uplink {
        mssp_url: format!("http://{addr}"),
        fal_endpoint: "/api/fal/uer".to_string(),
        token: "test-token".to_string(),
        tls: Tls::default(),
        retry: Retry {
            backoff_ms: vec![5],
            max_retries: 2,
            timeout_seconds: 5,
        },
    };
    let connector = SecureConnector::new(&uplink, "agent-1", "tenant-a").unwrap();
    let buffer = DurableBuffer::in_memory().unwrap();
    let uer = sample_uer("http", 1);

    let outcome = connector.send(&buffer, &uer).await.unwrap();
    assert!(matches!(outcome, SendOutcome::DeadLettered { .. }));
    assert_eq!(buffer.size().unwrap(), 0);
    assert_eq!(buffer.dlq_size().unwrap(), 1);
}
