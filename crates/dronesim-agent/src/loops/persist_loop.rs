//! State persistence loop.
//!
//! Coalesces vehicle snapshots into periodic state-file writes. Runs until every
//! snapshot sender is dropped, then performs a final flush, so the last state
//! handed over by the vehicle on shutdown always reaches disk.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use dronesim_core::PersistedState;

use crate::backoff::Backoff;
use crate::persistence::StateStore;

const PERSIST_BACKOFF_MAX_SECS: u64 = 300;
const MIN_PERSIST_PERIOD: Duration = Duration::from_millis(10);

pub async fn run_persist_loop(
    store: StateStore,
    period: Duration,
    mut rx: mpsc::Receiver<PersistedState>,
) {
    let period = period.max(MIN_PERSIST_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = Backoff::new(period, Duration::from_secs(PERSIST_BACKOFF_MAX_SECS).max(period));
    let mut pending: Option<PersistedState> = None;

    loop {
        tokio::select! {
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        pending = Some(record);
                        drain_queue(&mut pending, &mut rx);
                    }
                    None => {
                        tracing::info!("Snapshot channel closed, persistence loop stopping");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !backoff.ready() {
                    continue;
                }
                if let Err(err) = flush_pending(&store, &mut pending).await {
                    let delay = backoff.fail();
                    tracing::warn!(
                        "State persistence failed: {:#} (backing off {:?})",
                        err,
                        delay
                    );
                } else {
                    backoff.reset();
                }
            }
        }
    }

    if let Err(err) = flush_pending(&store, &mut pending).await {
        tracing::warn!("Final state persistence failed: {:#}", err);
    }
}

fn drain_queue(pending: &mut Option<PersistedState>, rx: &mut mpsc::Receiver<PersistedState>) {
    while let Ok(record) = rx.try_recv() {
        *pending = Some(record);
    }
}

async fn flush_pending(store: &StateStore, pending: &mut Option<PersistedState>) -> Result<()> {
    let Some(record) = pending.take() else {
        return Ok(());
    };

    if let Err(err) = store.save(&record).await {
        // Keep it unless a newer snapshot arrived meanwhile
        pending.get_or_insert(record);
        return Err(err);
    }

    tracing::debug!(
        "Saved state for {} ({}, battery {:.1}%)",
        record.drone_id,
        record.state.flight_state,
        record.state.battery
    );
    Ok(())
}
