//! Drift controller (spec §4.6): a periodic tick that samples every active
//! layer's current frame, compares it to the target frame, and triggers a
//! resync when any slot drifts past tolerance.
//!
//! Grounded in the teacher's `connectivity/monitor.rs` periodic-tick idiom —
//! `tokio::time::interval` driving a loop over a shared snapshot, generalized
//! here from a single ping target to N playout slots and a resync trigger in
//! place of a degraded/restored broadcast pair.

use crate::config::Slot;
use crate::engine::Engine;
use crate::slot::Mode;
use crate::status::{StatusRow, StatusSnapshot};
use crate::sync_ops;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs the drift controller until `shutdown` resolves. Does nothing on
/// ticks where `mode != Auto`; a tick's sync work never overlaps the next
/// (single-flight — an overlapping tick is dropped and counted, not queued).
pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
    let mut interval_secs = engine.config.snapshot().await.interval_seconds.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let busy = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mode = *engine.mode.read().await;
                if mode != Mode::Auto {
                    continue;
                }
                if busy.swap(true, Ordering::AcqRel) {
                    engine.record_dropped_tick();
                    warn!("drift tick dropped — previous tick still running");
                    continue;
                }

                let tick_engine = engine.clone();
                let tick_busy = busy.clone();
                tokio::spawn(async move {
                    run_tick(&tick_engine).await;
                    tick_busy.store(false, Ordering::Release);
                });

                // Only rearm the interval when the configured period actually
                // changed — `Interval::tick()` resolves immediately on a
                // freshly constructed Interval, so rebuilding on every tick
                // would busy-loop instead of waiting `interval_seconds`.
                let new_secs = engine.config.snapshot().await.interval_seconds.max(1);
                if new_secs != interval_secs {
                    interval_secs = new_secs;
                    interval = tokio::time::interval(Duration::from_secs(interval_secs));
                }
            }
            _ = &mut shutdown => {
                info!("drift controller shutting down");
                return;
            }
        }
    }
}

async fn run_tick(engine: &Engine) {
    let cfg = engine.config.snapshot().await;
    let tolerance = cfg.tolerance_frames;
    let resync_mode = cfg.resync_mode;

    let now = std::time::Instant::now();
    let tf = {
        let mut clock = engine.clock.write().await;
        clock.fps = cfg.fps;
        clock.loop_frames = cfg.loop_frames;
        clock.target_frame(now, 0)
    };

    let mut rows = Vec::with_capacity(cfg.slots.len());
    let mut triggered = false;

    for slot in cfg.effective_slots() {
        let runtime = engine.runtime_or_cold(slot.id, slot.base_layer).await;
        let current_frame = sample_frame(engine, slot, runtime.pair.active).await;
        // Raw signed delta, not wrapped modulo loop_frames. A future version
        // could compute drift_mod = ((drift + frames/2) mod frames) - frames/2
        // to distinguish a near-boundary one-frame mismatch from real drift;
        // v1 treats both the same and resyncs either way.
        let drift = current_frame.map(|frame| frame - tf);
        if let Some(d) = drift {
            if d.abs() > tolerance {
                triggered = true;
            }
        }
        rows.push(StatusRow {
            index: slot.id,
            name: slot.name.clone(),
            host: slot.host.clone(),
            port: slot.port,
            channel: slot.channel,
            base_layer: slot.base_layer,
            active_layer: runtime.pair.active,
            standby_layer: runtime.pair.standby,
            clip: slot.clip.clone(),
            timecode: slot.start_timecode.clone(),
            current_frame,
            target_frame: tf,
            drift,
        });
    }

    if triggered {
        debug!(tf, "drift exceeded tolerance — triggering resync");
        let errors = sync_ops::resync_all(engine, resync_mode, tf).await;
        if !errors.is_empty() {
            warn!(count = errors.len(), "drift-triggered resync reported slot failures");
        }
        // Rows above reflect pre-resync state; the next tick will sample the
        // post-swap layers.
    }

    let snapshot = StatusSnapshot {
        mode: *engine.mode.read().await,
        resync_mode: cfg.resync_mode,
        fade_frames: cfg.fade_frames,
        t0: engine.clock.read().await.t0_wall,
        fps: cfg.fps,
        frames: cfg.loop_frames,
        autosync_interval_sec: cfg.interval_seconds,
        drift_tolerance_frames: cfg.tolerance_frames,
        rows,
        dropped_ticks: engine.dropped_tick_count(),
    };

    engine.broadcaster.broadcast("status", &snapshot);
    *engine.last_status.write().await = Some(snapshot);
}

/// Queries the active layer's current frame via `CALL ch-active FRAME`. A
/// network- or protocol-level failure also yields `None` — the drift
/// controller treats every unreadable sample the same as a malformed one.
async fn sample_frame(engine: &Engine, slot: &Slot, active_layer: u32) -> Option<i64> {
    let conn = engine.connections.get_or_spawn(&slot.host, slot.port).await;
    match conn.call_frame(slot.channel, active_layer).await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(slot = slot.id, err = %e, "drift sample failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, EngineConfig};
    use std::time::Duration as StdDuration;

    /// Regression test for a busy-loop bug: rebuilding the `Interval` on
    /// every successful tick (instead of only when `interval_seconds`
    /// changes) made each tick rearm immediately, since a freshly
    /// constructed `tokio::time::Interval` resolves its first `.tick()`
    /// without delay. With a 1-second period, AUTO mode, and a no-slots
    /// config (so each tick is cheap), a real 1.2s window must not produce
    /// more than a couple of ticks.
    #[tokio::test]
    async fn does_not_busy_loop_between_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig { interval_seconds: 1, ..EngineConfig::default() };
        let store = ConfigStore::new(dir.path().to_path_buf(), cfg.clone());
        let engine = Arc::new(Engine::new(store, cfg.fps, cfg.loop_frames));
        *engine.mode.write().await = Mode::Auto;

        let mut rx = engine.broadcaster.subscribe();
        let (tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let run_engine = engine.clone();
        let handle = tokio::spawn(async move { run(run_engine, shutdown_rx).await });

        let mut ticks = 0u32;
        let deadline = tokio::time::Instant::now() + StdDuration::from_millis(1200);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(_)) => ticks += 1,
                _ => break,
            }
        }

        let _ = tx.send(());
        let _ = handle.await;

        assert!(ticks <= 3, "expected at most ~2 ticks in 1.2s at a 1s period, got {ticks}");
    }
}
