//! A configured playout endpoint (spec §3 Slot).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub port: u16,
    pub channel: u32,
    pub base_layer: u32,
    #[serde(default)]
    pub clip: String,
    #[serde(default = "default_timecode")]
    pub start_timecode: String,
    #[serde(default)]
    pub enabled: bool,
}

fn default_timecode() -> String {
    "00:00:00:00".to_string()
}

impl Slot {
    /// A slot is effective iff enabled, has a non-empty host, and a
    /// non-empty clip (spec §3).
    pub fn is_effective(&self) -> bool {
        self.enabled && !self.host.is_empty() && !self.clip.is_empty()
    }

    pub fn sample(id: u32) -> Self {
        Self {
            id,
            name: format!("Slot {id}"),
            host: String::new(),
            port: 5250,
            channel: 1,
            base_layer: 10,
            clip: String::new(),
            start_timecode: default_timecode(),
            enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_requires_enabled_host_and_clip() {
        let mut s = Slot::sample(1);
        assert!(!s.is_effective());
        s.enabled = true;
        assert!(!s.is_effective());
        s.host = "engine.local".to_string();
        assert!(!s.is_effective());
        s.clip = "a.mov".to_string();
        assert!(s.is_effective());
    }
}
