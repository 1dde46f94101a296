//! Command batching under a `DEFER`/`RESUME` envelope (spec §4.3).
//!
//! A batch is an ordered list of AMCP-like command lines the remote applies
//! atomically in a single render cycle. The builder's only job is ordering
//! and framing; the remote engine (out of scope, §1) owns atomicity.

use std::fmt;

/// One AMCP-like command line (spec §6). `Display` renders the exact wire
/// text, clip names always quoted.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadBg {
        channel: u32,
        layer: u32,
        clip: String,
        seek: i64,
        loop_: bool,
    },
    Play {
        channel: u32,
        layer: u32,
    },
    Pause {
        channel: u32,
        layer: u32,
    },
    MixerOpacity {
        channel: u32,
        layer: u32,
        value: f64,
        frames: u32,
        linear: bool,
    },
    MixerVolume {
        channel: u32,
        layer: u32,
        value: f64,
        frames: u32,
        linear: bool,
    },
    CallFrame {
        channel: u32,
        layer: u32,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LoadBg { channel, layer, clip, seek, loop_ } => {
                write!(f, "LOADBG {channel}-{layer} \"{clip}\" SEEK {seek}")?;
                if *loop_ {
                    write!(f, " LOOP")?;
                }
                Ok(())
            }
            Command::Play { channel, layer } => write!(f, "PLAY {channel}-{layer}"),
            Command::Pause { channel, layer } => write!(f, "PAUSE {channel}-{layer}"),
            Command::MixerOpacity { channel, layer, value, frames, linear } => {
                write!(f, "MIXER {channel}-{layer} OPACITY {value} {frames}")?;
                if *linear {
                    write!(f, " LINEAR")?;
                }
                Ok(())
            }
            Command::MixerVolume { channel, layer, value, frames, linear } => {
                write!(f, "MIXER {channel}-{layer} VOLUME {value} {frames}")?;
                if *linear {
                    write!(f, " LINEAR")?;
                }
                Ok(())
            }
            Command::CallFrame { channel, layer } => write!(f, "CALL {channel}-{layer} FRAME"),
        }
    }
}

/// An ordered sequence of commands for one connection, destined for a single
/// `DEFER`/`RESUME` envelope. Never mixes slots that target different
/// connections (spec §4.3) — enforced by construction: a `Batch` has exactly
/// one `(host, port)` owner, assigned by the caller.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Renders the full `DEFER` ... `RESUME` envelope as wire lines.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.commands.len() + 2);
        lines.push("DEFER".to_string());
        lines.extend(self.commands.iter().map(|c| c.to_string()));
        lines.push("RESUME".to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loadbg_renders_quoted_clip_with_loop() {
        let cmd = Command::LoadBg {
            channel: 1,
            layer: 10,
            clip: "a.mov".to_string(),
            seek: 0,
            loop_: true,
        };
        assert_eq!(cmd.to_string(), "LOADBG 1-10 \"a.mov\" SEEK 0 LOOP");
    }

    #[test]
    fn mixer_opacity_instantaneous_has_no_linear_suffix() {
        let cmd = Command::MixerOpacity {
            channel: 1,
            layer: 10,
            value: 0.0,
            frames: 0,
            linear: false,
        };
        assert_eq!(cmd.to_string(), "MIXER 1-10 OPACITY 0 0");
    }

    #[test]
    fn mixer_volume_timed_ramp_has_linear_suffix() {
        let cmd = Command::MixerVolume {
            channel: 1,
            layer: 10,
            value: 1.0,
            frames: 4,
            linear: true,
        };
        assert_eq!(cmd.to_string(), "MIXER 1-10 VOLUME 1 4 LINEAR");
    }

    #[test]
    fn batch_wraps_commands_in_defer_resume_envelope() {
        let mut batch = Batch::new();
        batch.push(Command::Pause { channel: 1, layer: 10 });
        let lines = batch.to_lines();
        assert_eq!(lines.first().unwrap(), "DEFER");
        assert_eq!(lines.last().unwrap(), "RESUME");
        assert_eq!(lines.len(), 3);
    }
}
