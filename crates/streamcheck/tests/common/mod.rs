#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use streamcheck_engine::ProbeConfig;
use tokio::net::TcpListener;

pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Shared request counter for handlers
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Small, fast thresholds so tests against localhost finish quickly.
pub fn test_config() -> ProbeConfig {
    ProbeConfig {
        concurrency: 4,
        connect_timeout: Duration::from_secs(2),
        sample_timeout: Duration::from_secs(3),
        min_speed_kbps: 100.0,
        max_ttfb: Duration::from_secs(2),
        sample_bytes: 64 * 1024,
        warmup_bytes: 4 * 1024,
        use_system_proxy: false,
        ..Default::default()
    }
}

pub fn media_body(len: usize) -> Vec<u8> {
    vec![0x47; len]
}
