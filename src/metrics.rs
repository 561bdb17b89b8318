//! Runtime counters exposed over a local HTTP listener.
//!
//! Per-minute rates are kept as 60 one-second buckets stamped with the epoch
//! second they belong to; stale buckets are ignored when summing. This gives
//! the same trailing-window counts as scheduling a deferred decrement per
//! event, without a task per event.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

/// Highest MMI level tracked by the estimation histogram.
const MMI_LEVELS: usize = 13;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Bucket {
    stamp: AtomicI64,
    count: AtomicI64,
}

/// Count of events in the trailing sixty seconds.
pub struct RateCounter {
    buckets: [Bucket; 60],
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCounter {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Bucket {
                stamp: AtomicI64::new(-1),
                count: AtomicI64::new(0),
            }),
        }
    }

    pub fn add(&self, n: i64) {
        self.add_at(now_secs(), n);
    }

    pub fn count(&self) -> i64 {
        self.count_at(now_secs())
    }

    // each counter has a single writer task, so the stamp handover does not
    // need to be atomic with the count update
    fn add_at(&self, now: i64, n: i64) {
        let bucket = &self.buckets[(now.rem_euclid(60)) as usize];
        if bucket.stamp.swap(now, Ordering::AcqRel) == now {
            bucket.count.fetch_add(n, Ordering::AcqRel);
        } else {
            bucket.count.store(n, Ordering::Release);
        }
    }

    fn count_at(&self, now: i64) -> i64 {
        self.buckets
            .iter()
            .filter(|b| {
                let stamp = b.stamp.load(Ordering::Acquire);
                stamp > now - 60 && stamp <= now
            })
            .map(|b| b.count.load(Ordering::Acquire))
            .sum()
    }
}

/// All runtime variables published at the status endpoint.
pub struct Metrics {
    fdsn_url: Mutex<String>,
    fdsn_streams: AtomicI64,
    total_streams: AtomicI64,
    /// slink_packets_per_minute
    pub packets: RateCounter,
    /// aws_messages_rate
    pub messages: RateCounter,
    estimations: [RateCounter; MMI_LEVELS],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fdsn_url: Mutex::new(String::new()),
            fdsn_streams: AtomicI64::new(0),
            total_streams: AtomicI64::new(0),
            packets: RateCounter::new(),
            messages: RateCounter::new(),
            estimations: std::array::from_fn(|_| RateCounter::new()),
        }
    }

    pub fn set_fdsn_url(&self, url: &str) {
        *self.fdsn_url.lock().unwrap() = url.to_string();
    }

    pub fn set_stream_counts(&self, loaded: i64, total: i64) {
        self.fdsn_streams.store(loaded, Ordering::Release);
        self.total_streams.store(total, Ordering::Release);
    }

    /// Record one intensity estimation at `mmi` in the per-level histogram.
    pub fn estimation(&self, mmi: i32) {
        let level = mmi.clamp(0, MMI_LEVELS as i32 - 1) as usize;
        self.estimations[level].add(1);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let mut histogram = serde_json::Map::new();
        for (level, counter) in self.estimations.iter().enumerate() {
            let n = counter.count();
            if n != 0 {
                histogram.insert(level.to_string(), n.into());
            }
        }
        json!({
            "fdsn_url": *self.fdsn_url.lock().unwrap(),
            "fdsn_streams": self.fdsn_streams.load(Ordering::Acquire),
            "total_streams": self.total_streams.load(Ordering::Acquire),
            "slink_packets_per_minute": self.packets.count(),
            "aws_messages_rate": self.messages.count(),
            "mmi_estimations_per_minute": histogram,
        })
    }
}

async fn vars(State(metrics): State<Arc<Metrics>>) -> Json<serde_json::Value> {
    Json(metrics.snapshot())
}

/// Serve the runtime variables as JSON. Runs until the listener fails.
pub async fn serve(addr: &str, metrics: Arc<Metrics>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/debug/vars", get(vars))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status endpoint listening");
    axum::serve(listener, app).await
}
