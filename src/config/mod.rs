//! Persisted configuration (spec §3, §6 persisted state, §9 dynamic config
//! shapes).
//!
//! The persisted file is a single partial, tolerant JSON document; the
//! in-memory representation ([`EngineConfig`]) is fully populated with
//! explicit defaults. Unknown fields are ignored silently on read and
//! rejected on write (§9). Loaded once at startup; every save atomically
//! replaces the in-memory authoritative copy, matching the teacher's
//! write-to-temp + rename persistence discipline.

pub mod slot;

pub use slot::Slot;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_FPS: u32 = 25;
pub const DEFAULT_LOOP_FRAMES: i64 = 25 * 60 * 60 * 24; // 24h of frames at 25fps
pub const DEFAULT_INTERVAL_SECONDS: u64 = 1;
pub const DEFAULT_TOLERANCE_FRAMES: i64 = 1;
pub const DEFAULT_FADE_FRAMES: u32 = 2;
pub const SLOT_CAPACITY: usize = 20;

/// Process-wide resync mode used on the next drift-triggered or forced resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncMode {
    Cut,
    Fade,
}

impl Default for ResyncMode {
    fn default() -> Self {
        ResyncMode::Cut
    }
}

/// The fully-populated, in-memory-authoritative configuration. Field names
/// on the wire match the `POST /api/config` patch vocabulary (spec §6) so
/// `GET /api/config` round-trips through the same client-side types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub fps: u32,
    #[serde(rename = "frames")]
    pub loop_frames: i64,
    #[serde(rename = "autosyncIntervalSec")]
    pub interval_seconds: u64,
    #[serde(rename = "driftToleranceFrames")]
    pub tolerance_frames: i64,
    #[serde(rename = "resyncMode")]
    pub resync_mode: ResyncMode,
    #[serde(rename = "fadeFrames")]
    pub fade_frames: u32,
    /// Delay between the FADE arm batch and the park batch, in milliseconds.
    /// Default: `ceil(fade_frames / fps * 1000)` (spec §9 open question).
    #[serde(rename = "postFadeDelayMs")]
    pub post_fade_delay_ms: u64,
    pub slots: Vec<Slot>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            loop_frames: DEFAULT_LOOP_FRAMES,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            tolerance_frames: DEFAULT_TOLERANCE_FRAMES,
            resync_mode: ResyncMode::Cut,
            fade_frames: DEFAULT_FADE_FRAMES,
            post_fade_delay_ms: default_post_fade_delay_ms(DEFAULT_FADE_FRAMES, DEFAULT_FPS),
            slots: Vec::new(),
        }
    }
}

pub fn default_post_fade_delay_ms(fade_frames: u32, fps: u32) -> u64 {
    if fps == 0 {
        return 0;
    }
    ((fade_frames as f64 / fps as f64) * 1000.0).ceil() as u64
}

impl EngineConfig {
    /// Effective slots only — ineffective slots never produce wire traffic
    /// and are absent from status (spec §3).
    pub fn effective_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_effective())
    }
}

/// Partial, tolerant document read from / written to `{data_dir}/config.json`.
/// All fields optional; absent fields fall back to the current in-memory
/// value (on merge) or the built-in default (on first load).
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    fps: Option<u32>,
    #[serde(rename = "frames")]
    loop_frames: Option<i64>,
    #[serde(rename = "autosyncIntervalSec")]
    interval_seconds: Option<u64>,
    #[serde(rename = "driftToleranceFrames")]
    tolerance_frames: Option<i64>,
    #[serde(rename = "resyncMode")]
    resync_mode: Option<ResyncMode>,
    #[serde(rename = "fadeFrames")]
    fade_frames: Option<u32>,
    #[serde(rename = "postFadeDelayMs")]
    post_fade_delay_ms: Option<u64>,
    slots: Option<Vec<Slot>>,
}

impl PartialConfig {
    fn merge_into(self, base: &mut EngineConfig) {
        if let Some(v) = self.fps {
            base.fps = v;
        }
        if let Some(v) = self.loop_frames {
            base.loop_frames = v;
        }
        if let Some(v) = self.interval_seconds {
            base.interval_seconds = v;
        }
        if let Some(v) = self.tolerance_frames {
            base.tolerance_frames = v;
        }
        if let Some(v) = self.resync_mode {
            base.resync_mode = v;
        }
        if let Some(v) = self.fade_frames {
            base.fade_frames = v;
        }
        base.post_fade_delay_ms = self
            .post_fade_delay_ms
            .unwrap_or_else(|| default_post_fade_delay_ms(base.fade_frames, base.fps));
        if let Some(mut v) = self.slots {
            // Slots truncated to SLOT_CAPACITY (spec §6 POST /api/config).
            v.truncate(SLOT_CAPACITY);
            base.slots = v;
        }
    }
}

fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.json")
}

/// Loads `{data_dir}/config.json`. If absent, a built-in sample config (one
/// disabled example slot) is used, matching the spec's "sample file" fallback.
pub fn load(data_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let path = config_path(data_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found — using sample config");
            return Ok(sample_config());
        }
        Err(e) => return Err(ConfigError::Read { path, source: e }),
    };

    let partial: PartialConfig = serde_json::from_str(&contents).map_err(|e| {
        error!(path = %path.display(), err = %e, "failed to parse config.json");
        ConfigError::Parse { path: path.clone(), source: e }
    })?;

    let mut cfg = EngineConfig::default();
    partial.merge_into(&mut cfg);
    Ok(cfg)
}

fn sample_config() -> EngineConfig {
    EngineConfig {
        slots: vec![Slot::sample(1)],
        ..EngineConfig::default()
    }
}

/// Atomically replaces `{data_dir}/config.json`: write to a temp file in the
/// same directory, then `rename` over the target (spec §6 persisted state).
pub async fn save(data_dir: &Path, cfg: &EngineConfig) -> Result<(), ConfigError> {
    let path = config_path(data_dir);
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| ConfigError::Write { path: path.clone(), source: e })?;

    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(cfg).expect("EngineConfig always serializes");

    tokio::fs::write(&tmp_path, body.as_bytes())
        .await
        .map_err(|e| ConfigError::Write { path: tmp_path.clone(), source: e })?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| ConfigError::Write { path, source: e })?;
    Ok(())
}

/// A JSON patch for [`ConfigStore::update`] — mirrors the POST body shape in
/// spec §6 (`/api/config` and its `/api/settings` alias).
#[derive(Debug, Default, Deserialize)]
pub struct ConfigPatch {
    pub fps: Option<u32>,
    pub frames: Option<i64>,
    #[serde(rename = "autosyncIntervalSec")]
    pub autosync_interval_sec: Option<u64>,
    #[serde(rename = "driftToleranceFrames")]
    pub drift_tolerance_frames: Option<i64>,
    #[serde(rename = "resyncMode")]
    pub resync_mode: Option<ResyncMode>,
    #[serde(rename = "fadeFrames")]
    pub fade_frames: Option<u32>,
    pub slots: Option<Vec<Slot>>,
}

/// Rejects patch fields that would degenerate the clock or fade arithmetic —
/// `fps: 0` or `frames: 0` would divide by zero in `target_frame`, and
/// `fadeFrames: 0` would zero out `postFadeDelayMs`'s own divisor.
fn validate_patch(patch: &ConfigPatch) -> Result<(), ConfigError> {
    if let Some(v) = patch.fps {
        if v == 0 {
            return Err(ConfigError::InvalidField {
                field: "fps".to_string(),
                reason: "must be positive".to_string(),
            });
        }
    }
    if let Some(v) = patch.frames {
        if v <= 0 {
            return Err(ConfigError::InvalidField {
                field: "frames".to_string(),
                reason: "must be positive".to_string(),
            });
        }
    }
    if let Some(v) = patch.fade_frames {
        if v == 0 {
            return Err(ConfigError::InvalidField {
                field: "fadeFrames".to_string(),
                reason: "must be positive".to_string(),
            });
        }
    }
    if let Some(v) = patch.drift_tolerance_frames {
        if v < 0 {
            return Err(ConfigError::InvalidField {
                field: "driftToleranceFrames".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
    }
    Ok(())
}

/// Thread-safe, owned configuration: the single source of truth mutated by
/// control-surface handlers (serialized through the control-plane mutex —
/// here, the `RwLock` itself, per spec §5).
pub struct ConfigStore {
    data_dir: PathBuf,
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigStore {
    pub fn new(data_dir: PathBuf, initial: EngineConfig) -> Self {
        Self {
            data_dir,
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn snapshot(&self) -> EngineConfig {
        self.inner.read().await.clone()
    }

    pub fn shared(&self) -> Arc<RwLock<EngineConfig>> {
        self.inner.clone()
    }

    /// Applies a whitelisted partial update, persists it, and returns the
    /// new snapshot. Unknown JSON keys were already dropped by serde during
    /// deserialization of [`ConfigPatch`] (silently ignored per §9). Rejects
    /// non-positive `fps`/`frames`/`fadeFrames` and negative
    /// `driftToleranceFrames` with [`ConfigError::InvalidField`] before
    /// anything is mutated or persisted.
    pub async fn update(&self, patch: ConfigPatch) -> Result<EngineConfig, ConfigError> {
        validate_patch(&patch)?;

        let mut guard = self.inner.write().await;
        if let Some(v) = patch.fps {
            guard.fps = v;
        }
        if let Some(v) = patch.frames {
            guard.loop_frames = v;
        }
        if let Some(v) = patch.autosync_interval_sec {
            guard.interval_seconds = v;
        }
        if let Some(v) = patch.drift_tolerance_frames {
            guard.tolerance_frames = v;
        }
        if let Some(v) = patch.resync_mode {
            guard.resync_mode = v;
        }
        if let Some(v) = patch.fade_frames {
            guard.fade_frames = v;
            guard.post_fade_delay_ms = default_post_fade_delay_ms(v, guard.fps);
        }
        if let Some(mut slots) = patch.slots {
            if slots.len() > SLOT_CAPACITY {
                warn!(
                    requested = slots.len(),
                    capacity = SLOT_CAPACITY,
                    "slots truncated to capacity"
                );
            }
            slots.truncate(SLOT_CAPACITY);
            // A baseLayer change resets that slot's pair to canonical — the
            // caller (control::routes) diffs against the previous slots list
            // before calling update, so by the time we get here the slot's
            // runtime pair state has already been reset where needed.
            guard.slots = slots;
        }
        let snapshot = guard.clone();
        drop(guard);
        save(&self.data_dir, &snapshot).await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_returns_sample() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(dir.path()).unwrap();
        assert_eq!(cfg.fps, DEFAULT_FPS);
        assert_eq!(cfg.slots.len(), 1);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.fps = 50;
        cfg.slots.push(Slot::sample(1));
        save(dir.path(), &cfg).await.unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.fps, 50);
        assert_eq!(loaded.slots.len(), 1);
    }

    #[tokio::test]
    async fn unknown_fields_ignored_on_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"fps": 30, "totallyUnknownField": 123}"#,
        )
        .unwrap();
        let cfg = load(dir.path()).unwrap();
        assert_eq!(cfg.fps, 30);
    }

    #[tokio::test]
    async fn update_merges_whitelisted_fields_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch {
            fps: Some(60),
            ..Default::default()
        };
        let snapshot = store.update(patch).await.unwrap();
        assert_eq!(snapshot.fps, 60);

        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.fps, 60);
    }

    #[tokio::test]
    async fn update_rejects_zero_fps() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch { fps: Some(0), ..Default::default() };
        let err = store.update(patch).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "fps"));
    }

    #[tokio::test]
    async fn update_rejects_zero_fade_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch { fade_frames: Some(0), ..Default::default() };
        let err = store.update(patch).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "fadeFrames"));
    }

    #[tokio::test]
    async fn update_rejects_negative_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch { drift_tolerance_frames: Some(-1), ..Default::default() };
        let err = store.update(patch).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "driftToleranceFrames"));
    }

    #[tokio::test]
    async fn update_rejects_non_positive_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch { frames: Some(0), ..Default::default() };
        let err = store.update(patch).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "frames"));
    }

    #[tokio::test]
    async fn invalid_patch_is_rejected_before_any_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let patch = ConfigPatch { fps: Some(60), frames: Some(0), ..Default::default() };
        assert!(store.update(patch).await.is_err());
        // fps must not have been applied despite appearing earlier in the patch.
        assert_eq!(store.snapshot().await.fps, DEFAULT_FPS);
    }

    #[tokio::test]
    async fn slots_truncated_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf(), EngineConfig::default());
        let slots: Vec<Slot> = (1..=25).map(|i| Slot::sample(i)).collect();
        let patch = ConfigPatch {
            slots: Some(slots),
            ..Default::default()
        };
        let snapshot = store.update(patch).await.unwrap();
        assert_eq!(snapshot.slots.len(), SLOT_CAPACITY);
    }
}
