//! The status snapshot shape broadcast over the WebSocket feed and returned
//! by `GET /api/status` (spec §6).

use crate::config::{EngineConfig, ResyncMode};
use crate::engine::Engine;
use crate::slot::Mode;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub index: u32,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub channel: u32,
    pub base_layer: u32,
    pub active_layer: u32,
    pub standby_layer: u32,
    pub clip: String,
    pub timecode: String,
    pub current_frame: Option<i64>,
    pub target_frame: i64,
    pub drift: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub resync_mode: ResyncMode,
    pub fade_frames: u32,
    pub t0: Option<chrono::DateTime<chrono::Utc>>,
    pub fps: u32,
    pub frames: i64,
    pub autosync_interval_sec: u64,
    pub drift_tolerance_frames: i64,
    pub rows: Vec<StatusRow>,
    pub dropped_ticks: u64,
}

/// Builds a snapshot with `currentFrame`/`drift` left `null` for every row —
/// used by `GET /api/status` before the drift controller's first tick, and
/// whenever `mode != auto` leaves no fresher sample available.
pub async fn build_idle_snapshot(engine: &Engine, cfg: &EngineConfig) -> StatusSnapshot {
    let mode = *engine.mode.read().await;
    let tf = {
        let clock = engine.clock.read().await;
        clock.target_frame(std::time::Instant::now(), 0)
    };
    let t0_wall = engine.clock.read().await.t0_wall;

    let mut rows = Vec::new();
    for slot in cfg.effective_slots() {
        let runtime = engine.runtime_or_cold(slot.id, slot.base_layer).await;
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
            current_frame: None,
            target_frame: tf,
            drift: None,
        });
    }

    StatusSnapshot {
        mode,
        resync_mode: cfg.resync_mode,
        fade_frames: cfg.fade_frames,
        t0: t0_wall,
        fps: cfg.fps,
        frames: cfg.loop_frames,
        autosync_interval_sec: cfg.interval_seconds,
        drift_tolerance_frames: cfg.tolerance_frames,
        rows,
        dropped_ticks: engine.dropped_tick_count(),
    }
}
