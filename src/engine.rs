//! The single owned controller value (spec §9): `t0`, `mode`, `config`, and
//! `pairState` behind one serialization discipline. No hidden singletons —
//! every background task and control-surface handler holds an `Arc<Engine>`.

use crate::config::ConfigStore;
use crate::ipc::event::EventBroadcaster;
use crate::remote::ConnectionRegistry;
use crate::slot::{Mode, SlotRuntime};
use crate::status::StatusSnapshot;
use crate::timecode::Clock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Engine {
    pub config: ConfigStore,
    pub connections: ConnectionRegistry,
    /// Per-slot dual-layer runtime state, keyed by slot id. This, together
    /// with `clock` and `mode`, is the "pairState" the design notes call out
    /// as control-plane-mutex-guarded shared state.
    pub runtimes: RwLock<HashMap<u32, SlotRuntime>>,
    pub clock: RwLock<Clock>,
    pub mode: RwLock<Mode>,
    pub broadcaster: Arc<EventBroadcaster>,
    /// Incremented each time a drift-controller tick is dropped because the
    /// previous tick was still running (spec §4.6 reentrancy guard).
    pub dropped_ticks: AtomicU64,
    /// The most recent drift-controller tick's status snapshot, served by
    /// `GET /api/status` between ticks.
    pub last_status: RwLock<Option<StatusSnapshot>>,
}

impl Engine {
    pub fn new(config: ConfigStore, fps: u32, loop_frames: i64) -> Self {
        Self {
            config,
            connections: ConnectionRegistry::new(),
            runtimes: RwLock::new(HashMap::new()),
            clock: RwLock::new(Clock::new(fps, loop_frames)),
            mode: RwLock::new(Mode::Off),
            broadcaster: Arc::new(EventBroadcaster::new()),
            dropped_ticks: AtomicU64::new(0),
            last_status: RwLock::new(None),
        }
    }

    pub fn record_dropped_tick(&self) {
        self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_tick_count(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Returns the runtime for `slot_id`, creating it cold with the
    /// canonical pair if this is the first time it's referenced.
    pub async fn runtime_or_cold(&self, slot_id: u32, base_layer: u32) -> SlotRuntime {
        let mut guard = self.runtimes.write().await;
        guard
            .entry(slot_id)
            .or_insert_with(|| SlotRuntime::cold(slot_id, base_layer))
            .clone()
    }

    /// Resets a slot's pair to canonical — called when `baseLayer` changes
    /// in config (spec §3 lifecycle rules).
    pub async fn reset_slot_pair(&self, slot_id: u32, base_layer: u32) {
        let mut guard = self.runtimes.write().await;
        guard
            .entry(slot_id)
            .and_modify(|r| r.reset_pair(base_layer))
            .or_insert_with(|| SlotRuntime::cold(slot_id, base_layer));
    }
}
