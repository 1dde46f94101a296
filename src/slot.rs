//! Per-slot dual-layer state machine (spec §4.4) and the process-wide
//! operating mode (spec §3 Mode).

use serde::Serialize;

/// `{active, standby}` — always the slot's `{baseLayer, baseLayer+10}` in
/// some order. Mutated only inside a completed resync transaction on the
/// owning connection (spec §3 Layer pair invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerPair {
    pub active: u32,
    pub standby: u32,
}

impl LayerPair {
    pub fn canonical(base_layer: u32) -> Self {
        Self {
            active: base_layer,
            standby: base_layer + 10,
        }
    }

    /// `true` iff `{active, standby}` is exactly `{base_layer, base_layer+10}`
    /// in some order (spec §8 property 1).
    pub fn is_canonical_pair_of(&self, base_layer: u32) -> bool {
        let expect = (base_layer, base_layer + 10);
        (self.active, self.standby) == expect || (self.standby, self.active) == expect
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.standby);
    }
}

/// States: `Cold -> Preloaded -> Playing <-> Paused` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayoutState {
    Cold,
    Preloaded,
    Playing,
    Paused,
}

/// Runtime state for one effective slot: its layer pair and playout state.
/// Config (host/port/channel/clip/etc.) lives separately in
/// [`crate::config::Slot`]; this is the mutable part that sync operations
/// advance, held under the control-plane mutex (spec §5).
#[derive(Debug, Clone)]
pub struct SlotRuntime {
    pub id: u32,
    pub base_layer: u32,
    pub pair: LayerPair,
    pub state: PlayoutState,
}

impl SlotRuntime {
    pub fn cold(id: u32, base_layer: u32) -> Self {
        Self {
            id,
            base_layer,
            pair: LayerPair::canonical(base_layer),
            state: PlayoutState::Cold,
        }
    }

    /// Reset to the canonical pair — called when the slot's `baseLayer`
    /// changes in config (spec §3 lifecycle rules: "any running playout is
    /// assumed to be restarted by the operator").
    pub fn reset_pair(&mut self, base_layer: u32) {
        self.base_layer = base_layer;
        self.pair = LayerPair::canonical(base_layer);
        self.state = PlayoutState::Cold;
    }
}

/// Process-wide operating mode (spec §3). Only `Auto` enables the drift
/// controller; `Off` and `Manual` are server-identical, operator-facing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Manual,
    Auto,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Mode::Off),
            "manual" => Some(Mode::Manual),
            "auto" => Some(Mode::Auto),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_pair_invariant() {
        let pair = LayerPair::canonical(10);
        assert!(pair.is_canonical_pair_of(10));
        assert_eq!(pair, LayerPair { active: 10, standby: 20 });
    }

    #[test]
    fn swap_preserves_pair_membership() {
        let mut pair = LayerPair::canonical(10);
        pair.swap();
        assert!(pair.is_canonical_pair_of(10));
        assert_eq!(pair, LayerPair { active: 20, standby: 10 });
    }

    #[test]
    fn mode_parse_rejects_unknown() {
        assert_eq!(Mode::parse("auto"), Some(Mode::Auto));
        assert_eq!(Mode::parse("weird"), None);
    }

    proptest! {
        #[test]
        fn pair_stays_canonical_after_many_swaps(base in 1u32..1000, swaps in 0u32..50) {
            let mut pair = LayerPair::canonical(base);
            for _ in 0..swaps {
                pair.swap();
            }
            prop_assert!(pair.is_canonical_pair_of(base));
            prop_assert_eq!((pair.active as i64 - pair.standby as i64).abs(), 10);
        }
    }
}
