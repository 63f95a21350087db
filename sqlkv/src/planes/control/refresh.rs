//! Background re-synchronization of the cache with the store's live keys.
//!
//! A cycle drops cached keys the store no longer reports, then evicts and
//! re-reads every remaining cached key so rows changed outside this client
//! become visible. The scheduler ticks at a fixed period; a cycle that
//! overruns is followed immediately by the missed ticks.

use crate::planes::data::client::ClientCore;
use shared::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one refresh cycle.
///
/// A store error while re-reading aborts the cycle; keys not yet re-read stay
/// evicted and are loaded again on their next `get`.
pub(crate) async fn refresh_cycle(core: &ClientCore) -> Result<()> {
    let live: HashSet<String> = core.keys().await?.into_iter().collect();

    let (current, stale): (Vec<String>, Vec<String>) = core
        .cache()
        .snapshot_keys()
        .into_iter()
        .partition(|key| live.contains(key));

    for key in &stale {
        core.cache().remove(key);
    }
    debug!(
        "refresh: {} live key(s), evicted {} stale, re-reading {}",
        live.len(),
        stale.len(),
        current.len()
    );

    for key in &current {
        core.cache().remove(key);
        core.load(key).await?;
    }

    Ok(())
}

/// Handle to the spawned refresh task.
#[derive(Debug)]
pub(crate) struct Refresher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Refresher {
    pub(crate) fn spawn(core: Arc<ClientCore>, period: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("refresh needs a tokio runtime: {}", e)))?;

        let token = CancellationToken::new();
        let handle = runtime.spawn(run(core, period, token.clone()));
        Ok(Self { token, handle })
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("refresh task ended abnormally: {}", e);
        }
    }
}

async fn run(core: Arc<ClientCore>, period: Duration, token: CancellationToken) {
    info!("refresh scheduler started, every {:?}", period);

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = refresh_cycle(&core) => {
                if let Err(e) = result {
                    warn!("refresh error: {}", e);
                }
            }
        }
    }

    info!("refresh scheduler stopped");
}
