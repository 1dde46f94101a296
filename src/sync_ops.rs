//! Cross-slot orchestration: `preload_all`, `start_all`, `pause_all`,
//! `resync_all` (spec §4.5).
//!
//! All four operations share a shape: iterate effective slots, group by
//! `(host, port)`, build one batch per connection, dispatch batches in
//! parallel across connections, serial within each connection (a `Batch`
//! already is the serial-within-connection unit — see `batch.rs`).

use crate::batch::{Batch, Command};
use crate::config::{EngineConfig, ResyncMode, Slot};
use crate::engine::Engine;
use crate::error::SlotError;
use crate::slot::{LayerPair, PlayoutState};
use crate::timecode::parse_tc;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

type ConnKey = (String, u16);

/// Effective slots grouped by connection, each group sorted by slot id —
/// "within one connection, slots are processed in index order".
fn group_effective(cfg: &EngineConfig) -> BTreeMap<ConnKey, Vec<Slot>> {
    let mut groups: BTreeMap<ConnKey, Vec<Slot>> = BTreeMap::new();
    for slot in cfg.effective_slots() {
        groups.entry((slot.host.clone(), slot.port)).or_default().push(slot.clone());
    }
    for slots in groups.values_mut() {
        slots.sort_by_key(|s| s.id);
    }
    groups
}

async fn send_batch(
    engine: &Engine,
    key: &ConnKey,
    batch: Batch,
    slot_ids: &[u32],
) -> Result<(), Vec<SlotError>> {
    let conn = engine.connections.get_or_spawn(&key.0, key.1).await;
    conn.send(batch).await.map_err(|e| {
        let msg = e.to_string();
        slot_ids.iter().map(|&id| SlotError { slot_index: id, error: msg.clone() }).collect()
    })
}

/// `preloadAll`: loads both layers of every effective slot, paused, silent.
/// End state: `Preloaded`.
pub async fn preload_all(engine: &Engine) -> Vec<SlotError> {
    let cfg = engine.config.snapshot().await;
    let groups = group_effective(&cfg);

    let tasks = groups.into_iter().map(|(key, slots)| async move {
        let mut batch = Batch::new();
        let mut ids = Vec::with_capacity(slots.len());
        for slot in &slots {
            let runtime = engine.runtime_or_cold(slot.id, slot.base_layer).await;
            ids.push(slot.id);
            for (layer, active) in [(runtime.pair.active, true), (runtime.pair.standby, false)] {
                batch.push(Command::LoadBg {
                    channel: slot.channel,
                    layer,
                    clip: slot.clip.clone(),
                    seek: 0,
                    loop_: true,
                });
                batch.push(Command::Pause { channel: slot.channel, layer });
                batch.push(Command::MixerOpacity {
                    channel: slot.channel,
                    layer,
                    value: 0.0,
                    frames: 0,
                    linear: false,
                });
                batch.push(Command::MixerVolume {
                    channel: slot.channel,
                    layer,
                    value: if active { 1.0 } else { 0.0 },
                    frames: 0,
                    linear: false,
                });
            }
        }
        let result = send_batch(engine, &key, batch, &ids).await;
        if result.is_ok() {
            set_state(engine, &ids, PlayoutState::Preloaded).await;
        }
        result
    });

    join_all(tasks).await.into_iter().filter_map(Result::err).flatten().collect()
}

/// `startAll`: captures `t0` before issuing any commands, resets every
/// effective slot's pair to canonical, then plays `active` from
/// `startTimecode`. End state: `Playing`.
pub async fn start_all(engine: &Engine) -> Vec<SlotError> {
    let cfg = engine.config.snapshot().await;
    let fps = cfg.fps;
    let groups = group_effective(&cfg);
    let t0 = Instant::now();

    for slots in groups.values() {
        for slot in slots {
            engine.reset_slot_pair(slot.id, slot.base_layer).await;
        }
    }
    engine.clock.write().await.set_start(t0, chrono::Utc::now());

    let tasks = groups.into_iter().map(|(key, slots)| async move {
        let mut batch = Batch::new();
        let mut ids = Vec::with_capacity(slots.len());
        for slot in &slots {
            let pair = LayerPair::canonical(slot.base_layer);
            let start_frame = parse_tc(&slot.start_timecode, fps);
            ids.push(slot.id);
            batch.push(Command::LoadBg {
                channel: slot.channel,
                layer: pair.active,
                clip: slot.clip.clone(),
                seek: start_frame,
                loop_: true,
            });
            batch.push(Command::LoadBg {
                channel: slot.channel,
                layer: pair.standby,
                clip: slot.clip.clone(),
                seek: start_frame,
                loop_: true,
            });
            batch.push(Command::Pause { channel: slot.channel, layer: pair.active });
            batch.push(Command::Pause { channel: slot.channel, layer: pair.standby });
            batch.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.active,
                value: 0.0,
                frames: 0,
                linear: false,
            });
            batch.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.standby,
                value: 0.0,
                frames: 0,
                linear: false,
            });
            batch.push(Command::MixerVolume {
                channel: slot.channel,
                layer: pair.active,
                value: 1.0,
                frames: 0,
                linear: false,
            });
            batch.push(Command::MixerVolume {
                channel: slot.channel,
                layer: pair.standby,
                value: 0.0,
                frames: 0,
                linear: false,
            });
            batch.push(Command::Play { channel: slot.channel, layer: pair.active });
            batch.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.active,
                value: 1.0,
                frames: 0,
                linear: false,
            });
        }
        let result = send_batch(engine, &key, batch, &ids).await;
        if result.is_ok() {
            set_state(engine, &ids, PlayoutState::Playing).await;
        }
        result
    });

    join_all(tasks).await.into_iter().filter_map(Result::err).flatten().collect()
}

/// `pauseAll`: pauses both layers of every effective slot. Does not reset
/// `t0`. End state: `Paused`.
pub async fn pause_all(engine: &Engine) -> Vec<SlotError> {
    let cfg = engine.config.snapshot().await;
    let groups = group_effective(&cfg);

    let tasks = groups.into_iter().map(|(key, slots)| async move {
        let mut batch = Batch::new();
        let mut ids = Vec::with_capacity(slots.len());
        for slot in &slots {
            let runtime = engine.runtime_or_cold(slot.id, slot.base_layer).await;
            ids.push(slot.id);
            batch.push(Command::Pause { channel: slot.channel, layer: runtime.pair.active });
            batch.push(Command::Pause { channel: slot.channel, layer: runtime.pair.standby });
        }
        let result = send_batch(engine, &key, batch, &ids).await;
        if result.is_ok() {
            set_state(engine, &ids, PlayoutState::Paused).await;
        }
        result
    });

    join_all(tasks).await.into_iter().filter_map(Result::err).flatten().collect()
}

/// `resyncAll(mode, tf)`: arms every effective slot's standby layer on `tf`,
/// then swaps visibility with either an instantaneous `CUT` or a
/// `fadeFrames`-long cross-fade. A no-op if no slot is currently `Playing`
/// (spec §4.4: resyncing with nothing playing is a no-op, not an error).
pub async fn resync_all(engine: &Engine, mode: ResyncMode, tf: i64) -> Vec<SlotError> {
    let cfg = engine.config.snapshot().await;
    let fade_frames = cfg.fade_frames;
    let post_fade_delay_ms = cfg.post_fade_delay_ms;

    let mut groups: BTreeMap<ConnKey, Vec<(Slot, LayerPair)>> = BTreeMap::new();
    for (key, slots) in group_effective(&cfg) {
        let mut playing = Vec::new();
        for slot in slots {
            let runtime = engine.runtime_or_cold(slot.id, slot.base_layer).await;
            if runtime.state == PlayoutState::Playing {
                playing.push((slot, runtime.pair));
            }
        }
        if !playing.is_empty() {
            groups.insert(key, playing);
        }
    }
    if groups.is_empty() {
        return Vec::new();
    }

    let (frames, linear) = match mode {
        ResyncMode::Cut => (0u32, false),
        ResyncMode::Fade => (fade_frames, true),
    };

    let tasks = groups.into_iter().map(|(key, slots)| async move {
        let ids: Vec<u32> = slots.iter().map(|(s, _)| s.id).collect();

        let mut arm = Batch::new();
        for (slot, pair) in &slots {
            arm.push(Command::LoadBg {
                channel: slot.channel,
                layer: pair.standby,
                clip: slot.clip.clone(),
                seek: tf,
                loop_: true,
            });
            arm.push(Command::Pause { channel: slot.channel, layer: pair.standby });
            arm.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.standby,
                value: 0.0,
                frames: 0,
                linear: false,
            });
            arm.push(Command::MixerVolume {
                channel: slot.channel,
                layer: pair.standby,
                value: 0.0,
                frames: 0,
                linear: false,
            });
        }
        let conn = engine.connections.get_or_spawn(&key.0, key.1).await;
        if let Err(e) = conn.send(arm).await {
            return as_slot_errors(&ids, &e.to_string());
        }

        let mut batch_a = Batch::new();
        for (slot, pair) in &slots {
            batch_a.push(Command::Play { channel: slot.channel, layer: pair.standby });
            batch_a.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.standby,
                value: 1.0,
                frames,
                linear,
            });
            batch_a.push(Command::MixerVolume {
                channel: slot.channel,
                layer: pair.standby,
                value: 1.0,
                frames,
                linear,
            });
            batch_a.push(Command::MixerOpacity {
                channel: slot.channel,
                layer: pair.active,
                value: 0.0,
                frames,
                linear,
            });
            batch_a.push(Command::MixerVolume {
                channel: slot.channel,
                layer: pair.active,
                value: 0.0,
                frames,
                linear,
            });
        }
        if let Err(e) = conn.send(batch_a).await {
            return as_slot_errors(&ids, &e.to_string());
        }

        if mode == ResyncMode::Fade && post_fade_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(post_fade_delay_ms)).await;
        }

        let mut batch_b = Batch::new();
        for (slot, pair) in &slots {
            batch_b.push(Command::Pause { channel: slot.channel, layer: pair.active });
        }
        if let Err(e) = conn.send(batch_b).await {
            return as_slot_errors(&ids, &e.to_string());
        }

        let mut guard = engine.runtimes.write().await;
        for (slot, _) in &slots {
            if let Some(r) = guard.get_mut(&slot.id) {
                r.pair.swap();
                r.state = PlayoutState::Playing;
            }
        }
        Vec::new()
    });

    join_all(tasks).await.into_iter().flatten().collect()
}

fn as_slot_errors(ids: &[u32], message: &str) -> Vec<SlotError> {
    ids.iter().map(|&id| SlotError { slot_index: id, error: message.to_string() }).collect()
}

async fn set_state(engine: &Engine, ids: &[u32], state: PlayoutState) {
    let mut guard = engine.runtimes.write().await;
    for id in ids {
        if let Some(r) = guard.get_mut(id) {
            r.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, EngineConfig, Slot};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn slot(id: u32, host: &str, port: u16, channel: u32, base_layer: u32) -> Slot {
        Slot {
            id,
            name: format!("slot{id}"),
            host: host.to_string(),
            port,
            channel,
            base_layer,
            clip: "clip.mov".to_string(),
            start_timecode: "00:00:00:00".to_string(),
            enabled: true,
        }
    }

    async fn build_engine(slots: Vec<Slot>) -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig { slots, ..EngineConfig::default() };
        let store = ConfigStore::new(dir.path().to_path_buf(), cfg.clone());
        let engine = Engine::new(store, cfg.fps, cfg.loop_frames);
        (engine, dir)
    }

    async fn fake_engine_always_ok(listener: TcpListener) {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let (read_half, mut write_half) = socket.into_split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                loop {
                    line.clear();
                    let n = reader.read_line(&mut line).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    if write_half.write_all(b"202 OK\r\n\r\n").await.is_err() {
                        break;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn preload_all_reaches_preloaded_with_no_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_always_ok(listener));

        let (engine, _dir) = build_engine(vec![slot(1, &addr.ip().to_string(), addr.port(), 1, 10)]).await;
        let errors = preload_all(&engine).await;
        assert!(errors.is_empty());
        let runtimes = engine.runtimes.read().await;
        assert_eq!(runtimes.get(&1).unwrap().state, PlayoutState::Preloaded);
    }

    #[tokio::test]
    async fn start_all_sets_t0_and_playing_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_always_ok(listener));

        let (engine, _dir) = build_engine(vec![slot(1, &addr.ip().to_string(), addr.port(), 1, 10)]).await;
        assert!(engine.clock.read().await.t0.is_none());
        let errors = start_all(&engine).await;
        assert!(errors.is_empty());
        assert!(engine.clock.read().await.t0.is_some());
        let runtimes = engine.runtimes.read().await;
        assert_eq!(runtimes.get(&1).unwrap().state, PlayoutState::Playing);
    }

    #[tokio::test]
    async fn resync_all_is_noop_when_nothing_playing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_always_ok(listener));

        let (engine, _dir) = build_engine(vec![slot(1, &addr.ip().to_string(), addr.port(), 1, 10)]).await;
        let errors = resync_all(&engine, ResyncMode::Cut, 1000).await;
        assert!(errors.is_empty());
        let runtimes = engine.runtimes.read().await;
        assert!(runtimes.is_empty() || runtimes.get(&1).unwrap().state != PlayoutState::Playing);
    }

    #[tokio::test]
    async fn resync_all_swaps_pair_after_playing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_always_ok(listener));

        let (engine, _dir) = build_engine(vec![slot(1, &addr.ip().to_string(), addr.port(), 1, 10)]).await;
        start_all(&engine).await;
        let before = engine.runtimes.read().await.get(&1).unwrap().pair;

        let errors = resync_all(&engine, ResyncMode::Cut, 500).await;
        assert!(errors.is_empty());
        let after = engine.runtimes.read().await.get(&1).unwrap().pair;
        assert_eq!(after.active, before.standby);
        assert_eq!(after.standby, before.active);
    }
}
