#![allow(dead_code)]

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use seqmq::{Broker, Config};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        seqmq::logging::init_logging_with("warn");
    });
}

/// Broker with a fast reaper so deadline tests finish quickly.
pub fn fast_broker() -> Broker {
    init_logging();
    let mut cfg = Config::default();
    cfg.delivery.ack_check_interval_ms = 20;
    cfg.delivery.drain_timeout_ms = 1_000;
    Broker::new(cfg)
}

/// Polls `cond` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    tokio::time::timeout(limit, fut)
        .await
        .expect("test step timed out")
}
