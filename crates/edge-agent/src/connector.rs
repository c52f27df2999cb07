//! Secure Connector (C3): deliver a UER to the cloud ingress or persist it
//! for later. Grounded on `original_source/edge-agent/core/connector.py`'s
//! `requests`+`urllib3.Retry` session, re-expressed with `reqwest` and the
//! explicit state machine from §4.3 (the Design Notes call for hoisting
//! ad-hoc retry/backoff into one policy object, unit-testable without the
//! network).

use crate::buffer::{BufferError, DurableBuffer};
use crate::config::{Retry, Tls, Uplink};
use comidf_uer::Uer;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of `SecureConnector::send`, mirroring the terminal states of the
/// §4.3 state machine (`SENT` / `BUFFER` / `DLQ`; `RETRY_WAIT` is internal
/// looping and never observed by the caller).
#[derive(Debug, PartialEq)]
pub enum SendOutcome {
    Sent,
    Buffered,
    DeadLettered { reason: String },
}

pub struct SecureConnector {
    client: reqwest::Client,
    base_url: String,
    path: String,
    token: String,
    tenant_id: String,
    agent_id: String,
    backoff_ms: Vec<u64>,
    max_retries: usize,
}

impl SecureConnector {
    pub fn new(uplink: &Uplink, agent_id: &str, tenant_id: &str) -> Result<Self, TransportError> {
        let client = build_http_client(&uplink.tls, uplink.retry.timeout_seconds)?;
        Ok(Self {
            client,
            base_url: uplink.mssp_url.trim_end_matches('/').to_string(),
            path: uplink.fal_endpoint.clone(),
            token: uplink.token.clone(),
            tenant_id: tenant_id.to_string(),
            agent_id: agent_id.to_string(),
            backoff_ms: uplink.retry.backoff_ms.clone(),
            max_retries: uplink.retry.max_retries,
        })
    }

    fn backoff_schedule(&self) -> Vec<u64> {
        let mut sched = self.backoff_ms.clone();
        if sched.is_empty() {
            sched.push(200);
        }
        let last = *sched.last().unwrap();
        while sched.len() < self.max_retries {
            sched.push(last);
        }
        sched
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut h = reqwest::header::HeaderMap::new();
        h.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", self.token).parse().unwrap(),
        );
        h.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        h.insert("X-Tenant-ID", self.tenant_id.parse().unwrap());
        h.insert("X-Agent-ID", self.agent_id.parse().unwrap());
        h.insert("X-Schema-Version", comidf_uer::UER_SCHEMA_VERSION.parse().unwrap());
        h
    }

    async fn post_once(&self, uer: &Uer) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, self.path);
        self.client
            .post(url)
            .headers(self.headers())
            .json(uer)
            .send()
            .await
    }

    /// Sends a UER, following the backoff schedule on retryable failures.
    /// On exhaustion, buffers the UER (still valid, just undeliverable
    /// right now); on a permanent 4xx, dead-letters it with a reason.
    pub async fn send(&self, buffer: &DurableBuffer, uer: &Uer) -> Result<SendOutcome, BufferError> {
        let schedule = self.backoff_schedule();
        for (attempt, backoff) in schedule.iter().enumerate() {
            let is_last = attempt + 1 >= self.max_retries;
            match self.post_once(uer).await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        info!(uid = %uer.uid, "uer_sent");
                        return Ok(SendOutcome::Sent);
                    }
                    if is_retryable_status(status) {
                        warn!(uid = %uer.uid, %status, attempt, "retryable_http_error");
                        if is_last {
                            buffer.enqueue(uer)?;
                            warn!(uid = %uer.uid, "retries_exhausted_buffered");
                            return Ok(SendOutcome::Buffered);
                        }
                        tokio::time::sleep(Duration::from_millis(*backoff)).await;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let reason = format!("HTTP {status}: {}", &body[..body.len().min(100)]);
                    buffer.dead_letter(uer, &reason)?;
                    error!(uid = %uer.uid, %reason, "uer_dead_lettered");
                    return Ok(SendOutcome::DeadLettered { reason });
                }
                Err(e) => {
                    warn!(uid = %uer.uid, error = %e, attempt, "transport_error");
                    if is_last {
                        buffer.enqueue(uer)?;
                        warn!(uid = %uer.uid, "retries_exhausted_buffered");
                        return Ok(SendOutcome::Buffered);
                    }
                    tokio::time::sleep(Duration::from_millis(*backoff)).await;
                }
            }
        }
        // Unreachable in practice: schedule always has >=1 entry and the
        // last iteration always returns. Treat as exhausted just in case.
        buffer.enqueue(uer)?;
        Ok(SendOutcome::Buffered)
    }

    /// Polls the cloud's `afl.feedback.{tenant}` equivalent for `agent_tag`
    /// (§4.9: edges receive policies "via local HTTP"; the cloud side is
    /// NAT-unreachable from the edge's point of view only in the other
    /// direction, so the edge pulls rather than the cloud pushing). `load`
    /// is this agent's current normalized ingestion load in [0,1].
    pub async fn pull_policy(&self, agent_tag: &str, load: f64) -> Result<comidf_uer::Policy, TransportError> {
        let url = format!(
            "{}/afl/feedback/{}/{}?load={}",
            self.base_url, self.tenant_id, agent_tag, load
        );
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Drains up to `batch` buffered records and sends them serially with a
    /// small inter-send pause, for rate-limit friendliness (§4.3).
    pub async fn flush_buffer(&self, buffer: &DurableBuffer, batch: usize) -> Result<FlushReport, BufferError> {
        let uers = buffer.dequeue_batch(batch)?;
        let mut report = FlushReport::default();
        for uer in &uers {
            match self.send(buffer, uer).await? {
                SendOutcome::Sent => report.sent += 1,
                SendOutcome::Buffered => report.rebuffered += 1,
                SendOutcome::DeadLettered { .. } => report.dead_lettered += 1,
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!(count = uers.len(), sent = report.sent, "flush_buffer_complete");
        Ok(report)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub rebuffered: usize,
    pub dead_lettered: usize,
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn build_http_client(tls: &Tls, timeout_seconds: u64) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .danger_accept_invalid_certs(!tls.verify);

    if tls.mtls {
        if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
            if let (Ok(cert_pem), Ok(key_pem)) = (std::fs::read(cert), std::fs::read(key)) {
                let mut pem = cert_pem;
                pem.extend_from_slice(&key_pem);
                if let Ok(identity) = reqwest::Identity::from_pem(&pem) {
                    builder = builder.identity(identity);
                }
            }
        }
        if let Some(ca) = &tls.ca_cert {
            if let Ok(ca_pem) = std::fs::read(ca) {
                if let Ok(cert) = reqwest::Certificate::from_pem(&ca_pem) {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_extends_with_last_element() {
        let uplink = Uplink {
            mssp_url: "https://example.test".to_string(),
            retry: Retry {
                backoff_ms: vec![200, 500],
                max_retries: 5,
                timeout_seconds: 30,
            },
            ..Default::default()
        };
        let connector = SecureConnector::new(&uplink, "agent-1", "tenant-1").unwrap();
        let sched = connector.backoff_schedule();
        assert_eq!(sched, vec![200, 500, 500, 500, 500]);
    }

    #[test]
    fn retryable_statuses_match_spec() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
