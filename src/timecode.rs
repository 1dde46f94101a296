//! Timecode parsing and target-frame arithmetic (spec §4.1).
//!
//! Pure, allocation-free functions — no I/O, safe to call from both the
//! control-plane handlers and the drift controller's hot loop.

/// Parses `HH:MM:SS:FF` into an absolute frame count at the given frame rate.
///
/// Malformed input (wrong shape, non-numeric, negative) returns `0` — this
/// never fails; the control surface's own input validation is the only
/// defense, per spec. `FF` is intentionally **not** clamped to `fps - 1`;
/// overflow simply adds to the total frame count.
pub fn parse_tc(tc: &str, fps: u32) -> i64 {
    let fields: Vec<&str> = tc.split(':').collect();
    if fields.len() != 4 {
        return 0;
    }
    let mut parsed = [0i64; 4];
    for (slot, field) in parsed.iter_mut().zip(fields.iter()) {
        match field.parse::<i64>() {
            Ok(v) if v >= 0 => *slot = v,
            _ => return 0,
        }
    }
    let [hh, mm, ss, ff] = parsed;
    (hh * 3600 + mm * 60 + ss) * fps as i64 + ff
}

/// Formats an absolute frame count back into `HH:MM:SS:FF` at the given rate.
///
/// Inverse of [`parse_tc`] when `0 <= ff < fps`. Used only by tests and
/// diagnostics; the wire protocol never emits formatted timecodes.
pub fn format_tc(frame: i64, fps: u32) -> String {
    let fps = fps.max(1) as i64;
    let total_secs = frame / fps;
    let ff = frame % fps;
    let hh = total_secs / 3600;
    let mm = (total_secs % 3600) / 60;
    let ss = total_secs % 60;
    format!("{hh:02}:{mm:02}:{ss:02}:{ff:02}")
}

/// The monotonic synchronization clock: `t0` plus the global `fps`/`loop_frames`.
///
/// `t0` is the instant of the last successful `startAll` (or operator clock
/// reset). `None` before the first start — `target_frame` then returns `0`.
/// `t0_wall` mirrors `t0` in wall-clock time, carried only so the control
/// surface can report a human-meaningful timestamp; arithmetic always uses
/// the monotonic `t0`.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub t0: Option<std::time::Instant>,
    pub t0_wall: Option<chrono::DateTime<chrono::Utc>>,
    pub fps: u32,
    pub loop_frames: i64,
}

impl Clock {
    pub fn new(fps: u32, loop_frames: i64) -> Self {
        Self {
            t0: None,
            t0_wall: None,
            fps,
            loop_frames,
        }
    }

    /// Records a new start instant, in both the monotonic and wall-clock
    /// representations, as of `wall_now`.
    pub fn set_start(&mut self, instant: std::time::Instant, wall_now: chrono::DateTime<chrono::Utc>) {
        self.t0 = Some(instant);
        self.t0_wall = Some(wall_now);
    }

    /// `targetFrame()` for a slot with the given start-timecode offset
    /// (already parsed to frames via [`parse_tc`]).
    ///
    /// `floor((now - t0) * fps + tc_frames) mod loop_frames`, or `0` if the
    /// clock has not been started. Uses a monotonic source only.
    pub fn target_frame(&self, now: std::time::Instant, tc_frames: i64) -> i64 {
        let Some(t0) = self.t0 else {
            return 0;
        };
        if self.loop_frames <= 0 {
            return 0;
        }
        let elapsed = now.saturating_duration_since(t0);
        let elapsed_frames = (elapsed.as_secs_f64() * self.fps as f64).floor() as i64;
        let total = elapsed_frames + tc_frames;
        total.rem_euclid(self.loop_frames)
    }
}
