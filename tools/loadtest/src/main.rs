// =============================================================================
// COMIDF — Load Test Tool
// =============================================================================
// Generates synthetic UER JSON records and posts them to a cloud ingress at
// a configurable rate, tracking ingested/duplicate/rejected outcomes.
// =============================================================================

use clap::Parser;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "comidf-loadtest")]
#[command(about = "Load test tool for the CoMIDF cloud ingress")]
struct Args {
    /// Cloud ingress base URL
    #[arg(long, default_value = "http://localhost:8443")]
    url: String,

    /// Tenant ID to post as
    #[arg(long, default_value = "loadtest-tenant")]
    tenant: String,

    /// Agent ID to post as
    #[arg(long, default_value = "loadtest-agent")]
    agent: String,

    /// Bearer token (optional; an unrecognized token is logged but not rejected)
    #[arg(long)]
    token: Option<String>,

    /// Events per second
    #[arg(long, default_value_t = 100)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct source protocol tags to rotate through
    #[arg(long, default_value_t = 3)]
    protocols: usize,

    /// Fraction of events re-sent with a previously seen uid, to exercise
    /// the idempotency cache (§8 scenario 2)
    #[arg(long, default_value_t = 0.0)]
    duplicate_fraction: f64,
}

struct Counters {
    sent: AtomicU64,
    ingested: AtomicU64,
    duplicate: AtomicU64,
    rejected: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

const PROTOS: &[&str] = &["MQTT", "HTTP", "COAP", "MODBUS", "DNP3"];

fn build_event(rng: &mut impl Rng, proto: &str, uid: &str) -> serde_json::Value {
    let score: f64 = rng.gen_range(0.0..1.0);
    let conf: f64 = rng.gen_range(0.3..1.0);
    serde_json::json!({
        "uid": uid,
        "ts": chrono::Utc::now().to_rfc3339(),
        "src": {"ip": format!("10.{}.{}.{}", rng.gen_range(0..255), rng.gen_range(0..255), rng.gen_range(1..255))},
        "dst": {"ip": "10.0.0.1", "port": rng.gen_range(1..65535)},
        "proto": {"l7": proto},
        "stats": {
            "len_mean": rng.gen_range(40.0..1500.0),
            "iat_mean": rng.gen_range(0.0..5.0),
        },
        "detector": {
            "score": (score * 100.0).round() / 100.0,
            "conf": (conf * 100.0).round() / 100.0,
            "model": format!("{}-v1", proto.to_lowercase()),
        },
    })
}

fn new_uid(rng: &mut impl Rng) -> String {
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("=== CoMIDF Load Test ===");
    println!("Target:   {}/api/fal/uer", args.url);
    println!("Tenant:   {}", args.tenant);
    println!("Agent:    {}", args.agent);
    println!("Rate:     {} evt/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let health_url = format!("{}/health", args.url);
    match client.get(&health_url).send().await {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {e}");
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());
    let ingest_url = format!("{}/api/fal/uer", args.url);
    let protocols: Vec<&str> = PROTOS.iter().take(args.protocols.max(1)).copied().collect();

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();
    let mut rng = rand::thread_rng();
    let mut tick = 0u64;
    let mut recent_uids: Vec<String> = Vec::new();

    while Instant::now() < deadline {
        let proto = protocols[(tick as usize) % protocols.len()];
        let uid = if !recent_uids.is_empty() && rng.gen_bool(args.duplicate_fraction.clamp(0.0, 1.0)) {
            recent_uids[rng.gen_range(0..recent_uids.len())].clone()
        } else {
            let uid = new_uid(&mut rng);
            recent_uids.push(uid.clone());
            if recent_uids.len() > 256 {
                recent_uids.remove(0);
            }
            uid
        };
        let payload = build_event(&mut rng, proto, &uid);

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        let mut req = client
            .post(&ingest_url)
            .header("X-Tenant-ID", &args.tenant)
            .header("X-Agent-ID", &args.agent)
            .header("X-Schema-Version", comidf_uer::UER_SCHEMA_VERSION)
            .json(&payload);
        if let Some(token) = &args.token {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(resp) => {
                let lat = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat, Ordering::Relaxed);

                if resp.status().is_success() {
                    match resp.json::<serde_json::Value>().await {
                        Ok(body) if body.get("status").and_then(|s| s.as_str()) == Some("duplicate") => {
                            counters.duplicate.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            counters.ingested.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            counters.rejected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                } else {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} ingested={} duplicate={} rejected={} err={} ({:.0} evt/s)",
                elapsed,
                sent,
                counters.ingested.load(Ordering::Relaxed),
                counters.duplicate.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            tokio::time::sleep(target - actual).await;
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let ingested = counters.ingested.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 {
        counters.latency_sum_us.load(Ordering::Relaxed) / sent
    } else {
        0
    };

    println!("\n=== Results ===");
    println!("Duration:   {:.2}s", elapsed.as_secs_f64());
    println!("Total sent: {sent}");
    println!("Ingested:   {} ({:.1}%)", ingested, ingested as f64 / sent.max(1) as f64 * 100.0);
    println!("Duplicate:  {}", counters.duplicate.load(Ordering::Relaxed));
    println!("Rejected:   {}", counters.rejected.load(Ordering::Relaxed));
    println!("Net errors: {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency: {avg_lat} us");
    println!("Throughput: {:.1} evt/s", sent as f64 / elapsed.as_secs_f64());
}
