//! Pipeline consumers - the two long-lived tasks behind the update bus
//!
//! The inbound consumer is the only mutator of the window scheduler: it
//! drains the production and weather queues (whichever is ready), normalizes
//! production values and hands each update to the scheduler. Executor calls
//! are awaited inline, so a slow model stalls ingestion and the bounded
//! queues push back on submitters.
//!
//! The outbound consumer denormalizes every synthesized update, restores
//! the submitted power of republished measurements, and fans both out to
//! the registered listeners in order.

use super::scheduler::WindowScheduler;
use crate::cache::UpdateListener;
use crate::models::{Normalizer, ProductionUpdate, WeatherUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drain both inbound queues until they are closed
///
/// Returns the scheduler so callers can inspect its final state.
pub async fn run_inbound(
    mut production_rx: mpsc::Receiver<ProductionUpdate>,
    mut weather_rx: mpsc::Receiver<WeatherUpdate>,
    mut scheduler: WindowScheduler,
    normalizer: Normalizer,
) -> WindowScheduler {
    log::info!("🚀 Starting inbound consumer");
    log::info!(
        "   ├─ Step: {}s, training batch: {}, inference batch: {}",
        scheduler.settings().step.num_seconds(),
        scheduler.settings().batch_size,
        scheduler.settings().inference_batch_size
    );
    log::info!("   └─ Normalization: {:?}", normalizer);

    let mut processed = 0u64;

    loop {
        tokio::select! {
            Some(mut update) = production_rx.recv() => {
                let raw = update.payload.power;
                update.payload.power = normalizer.normalize(raw, update.time);
                update.payload.raw_power = Some(raw);
                let outcome = scheduler.apply_production(update).await;
                log::trace!("production applied: {:?}", outcome);
                processed += 1;
            }

            Some(update) = weather_rx.recv() => {
                let outcome = scheduler.apply_weather(update).await;
                log::trace!("weather applied: {:?}", outcome);
                processed += 1;
            }

            else => {
                log::warn!("⚠️  Inbound queues closed, stopping inbound consumer");
                break;
            }
        }
    }

    log::info!(
        "✅ Inbound consumer stopped after {} updates (model id={})",
        processed,
        scheduler.model().id
    );
    scheduler
}

/// Fan every outbound update out to `listeners` until the queue is closed
pub async fn run_outbound(
    mut rx: mpsc::Receiver<ProductionUpdate>,
    normalizer: Normalizer,
    listeners: Vec<Arc<dyn UpdateListener>>,
) {
    log::info!("🚀 Starting outbound consumer ({} listeners)", listeners.len());

    let mut published = 0u64;
    while let Some(mut update) = rx.recv().await {
        // measurements leave with the submitted value; the baseline may have moved since
        update.payload.power = match update.payload.raw_power.take() {
            Some(raw) => raw,
            None => normalizer.denormalize(update.payload.power, update.time),
        };
        log::trace!(
            "publishing update id={} time={} power={:.3} derived={}",
            update.id(),
            update.time,
            update.payload.power,
            update.derived
        );
        for listener in &listeners {
            listener.on_update(&update);
        }
        published += 1;
    }

    log::info!("✅ Outbound consumer stopped after {} updates", published);
}
