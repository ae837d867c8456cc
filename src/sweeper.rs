//! Background expiry sweeper.
//!
//! Flips vouchers past their expiration inactive on a fixed interval. This
//! is a listing convenience only: the validation path checks expiry itself,
//! so a delayed or skipped sweep never admits an expired redemption.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tracing::{debug, info};

use crate::store::MemoryStore;

/// Spawn the sweep loop. The task runs until the handle is dropped at
/// shutdown.
pub fn spawn(store: Arc<MemoryStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(run(store, period))
}

async fn run(store: Arc<MemoryStore>, period: Duration) {
    let mut ticks = IntervalStream::new(tokio::time::interval(period));
    while ticks.next().await.is_some() {
        let deactivated = store.sweep_expired(Utc::now()).await;
        if deactivated > 0 {
            info!(deactivated, "expiry sweep deactivated vouchers");
        } else {
            debug!("expiry sweep found nothing to deactivate");
        }
    }
}
