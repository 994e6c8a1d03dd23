//! Control surface: the UI-thread side of the player.
//!
//! Owns the scope, the settings and the transport buttons' state, turns
//! user actions into [`ControlMessage`]s and folds incoming [`Telemetry`]
//! back into what is displayed. Messages are queued and collected with
//! [`Surface::take_outgoing`]; the bridge forwards them to the engine.

use log::{debug, info};

use crate::config::{sanitize_divisor, sanitize_sample_rate, Settings};
use crate::dsp::quantizer::PlaybackMode;
use crate::scope::{Canvas, DrawMode, DrawOutcome, Scope, MAX_SCALE};

use super::message::{ControlMessage, Telemetry};

pub const DEFAULT_CANVAS_WIDTH: usize = 1024;
/// Fast-forward and fast-reverse stop doubling here.
pub const MAX_FAST_MULTIPLIER: f64 = 64.0;

/// A program together with how it should be played and shown.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub code: String,
    pub mode: PlaybackMode,
    pub sample_rate: f64,
    pub draw_mode: Option<DrawMode>,
    pub scale: Option<u32>,
}

impl Song {
    pub fn new(code: impl Into<String>, mode: PlaybackMode, sample_rate: f64) -> Self {
        Song {
            code: code.into(),
            mode,
            sample_rate,
            draw_mode: None,
            scale: None,
        }
    }
}

#[derive(Debug)]
pub struct Surface {
    settings: Settings,
    scope: Scope,
    canvas_width: usize,
    /// Rate of the output device; the engine's ratio is relative to it.
    host_sample_rate: f64,
    sample_rate: f64,
    mode: PlaybackMode,
    code: String,

    byte_sample: f64,
    is_playing: bool,
    playback_speed: f64,
    /// Speed the next press of `[forward, backward]` selects.
    multipliers: [f64; 2],
    /// Clear canvas and backlog once the engine reports position 0.
    clear_on_zero: bool,
    canvas_dirty: bool,
    cursor: Option<f64>,

    is_compilation_error: bool,
    error_message: String,
    url_update: bool,
    outgoing: Vec<ControlMessage>,
}

impl Surface {
    pub fn new(host_sample_rate: f64, settings: Settings) -> Self {
        let settings = settings.sanitized();
        let mut scope = Scope::new();
        scope.draw_mode = settings.draw_mode;
        scope.palette = settings.palette();
        scope.set_scale(settings.draw_scale);
        Surface {
            settings,
            scope,
            canvas_width: DEFAULT_CANVAS_WIDTH,
            host_sample_rate,
            sample_rate: 8000.0,
            mode: PlaybackMode::Bytebeat,
            code: String::new(),
            byte_sample: 0.0,
            is_playing: false,
            playback_speed: 1.0,
            multipliers: [1.0; 2],
            clear_on_zero: false,
            canvas_dirty: true,
            cursor: None,
            is_compilation_error: false,
            error_message: String::new(),
            url_update: false,
            outgoing: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn byte_sample(&self) -> f64 {
        self.byte_sample
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    /// `[forward, backward]` multipliers shown on the fast buttons.
    pub fn multipliers(&self) -> [f64; 2] {
        self.multipliers
    }

    /// Error text currently shown; empty when there is none.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Time cursor position as a fraction of the width, when shown.
    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    pub fn set_canvas_width(&mut self, width: usize) {
        self.canvas_width = width;
        self.canvas_dirty = true;
    }

    /// Messages for the engine, oldest first.
    pub fn take_outgoing(&mut self) -> Vec<ControlMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Whether the code should be written to the shareable URL since the
    /// last call.
    pub fn take_url_update(&mut self) -> bool {
        std::mem::take(&mut self.url_update)
    }

    fn send(&mut self, msg: ControlMessage) {
        self.outgoing.push(msg);
    }

    fn ratio(&self) -> f64 {
        self.sample_rate / self.host_sample_rate
    }

    // ── Songs & Code ────────────────────────────────────────

    /// Load a song as a single message; with `play` it also restarts from 0.
    pub fn load_song(&mut self, song: Song, play: bool) {
        info!("loading {} song at {} Hz", song.mode.name(), song.sample_rate);
        self.mode = song.mode;
        self.code = song.code;
        self.sample_rate = sanitize_sample_rate(song.sample_rate);

        let mut msg = ControlMessage {
            mode: Some(self.mode.name().into()),
            sample_rate: Some(self.sample_rate),
            sample_ratio: Some(self.ratio()),
            divisor: Some(self.settings.sr_divisor),
            ..Default::default()
        };
        if play {
            self.playback_speed = 1.0;
            self.set_transport(true, 0);
            msg.playback_speed = Some(1.0);
            msg.reset_time = Some(true);
            msg.is_playing = Some(true);
        }
        msg.set_function = Some(self.code.clone());
        if let Some(draw_mode) = song.draw_mode {
            self.set_draw_mode(draw_mode);
        }
        if let Some(scale) = song.scale {
            self.set_scale(scale as i32 - self.scope.scale() as i32);
        }
        self.send(msg);
    }

    /// Recompile after an edit.
    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
        self.send(ControlMessage {
            set_function: Some(self.code.clone()),
            ..Default::default()
        });
    }

    /// Switch mode; the code is recompiled under the new convention.
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
        self.url_update = true;
        self.send(ControlMessage {
            mode: Some(mode.name().into()),
            set_function: Some(self.code.clone()),
            ..Default::default()
        });
    }

    // ── Transport ───────────────────────────────────────────

    /// Play or pause. A nonzero `speed_increment` presses fast-forward
    /// (positive) or fast-reverse (negative); each press doubles the speed
    /// up to [`MAX_FAST_MULTIPLIER`] and then starts over at 1. Pausing
    /// keeps the direction.
    pub fn toggle_playback(&mut self, playing: bool, speed_increment: i32) {
        self.set_transport(playing, speed_increment);
        self.send(ControlMessage {
            is_playing: Some(playing),
            playback_speed: Some(self.playback_speed),
            ..Default::default()
        });
    }

    fn set_transport(&mut self, playing: bool, speed_increment: i32) {
        let reverse = if speed_increment != 0 {
            speed_increment < 0
        } else {
            self.playback_speed < 0.0
        };
        let speed = if speed_increment != 0 {
            self.multipliers[reverse as usize]
        } else {
            1.0
        };
        let next = if speed >= MAX_FAST_MULTIPLIER { 1.0 } else { speed * 2.0 };
        self.multipliers = [
            if playing && !reverse { next } else { 1.0 },
            if playing && reverse { next } else { 1.0 },
        ];
        if speed_increment != 0 || !playing {
            self.playback_speed = if playing {
                speed_increment.signum() as f64 * speed
            } else {
                self.playback_speed.signum()
            };
        }
        self.is_playing = playing;
        if speed_increment == 0 && playing {
            self.clear_on_zero = true;
        }
    }

    /// Pause and rewind to 0. The scope is cleared when the engine
    /// confirms the new position.
    pub fn stop(&mut self) {
        self.set_transport(false, 0);
        self.clear_on_zero = true;
        self.send(ControlMessage {
            is_playing: Some(false),
            reset_time: Some(true),
            ..Default::default()
        });
    }

    /// Rewind to 0 without changing play state.
    pub fn reset_time(&mut self) {
        self.clear_on_zero = true;
        self.send(ControlMessage {
            reset_time: Some(true),
            playback_speed: Some(self.playback_speed),
            ..Default::default()
        });
    }

    /// Jump to an absolute logical position.
    pub fn set_position(&mut self, byte_sample: f64) {
        self.set_byte_sample(byte_sample);
        self.send(ControlMessage {
            byte_sample: Some(self.byte_sample),
            ..Default::default()
        });
    }

    fn set_byte_sample(&mut self, value: f64) {
        self.byte_sample = if value.is_finite() { value } else { 0.0 };
        if self.clear_on_zero && self.byte_sample == 0.0 {
            self.clear_on_zero = false;
            self.scope.clear_backlog();
            self.scope.forget_edge();
            self.canvas_dirty = true;
            self.cursor = Some(0.0);
        }
    }

    // ── Parameters ──────────────────────────────────────────

    /// Change the target rate. Funcbeat programs think in seconds, so their
    /// position is rescaled to keep the same wall-clock time.
    pub fn set_sample_rate(&mut self, rate: f64) {
        let old = self.sample_rate;
        self.sample_rate = sanitize_sample_rate(rate);
        self.url_update = true;
        let mut msg = ControlMessage {
            sample_rate: Some(self.sample_rate),
            sample_ratio: Some(self.ratio()),
            ..Default::default()
        };
        if self.mode == PlaybackMode::Funcbeat {
            let position = (self.byte_sample * self.sample_rate / old).round();
            self.set_byte_sample(position);
            msg.byte_sample = Some(position);
        }
        self.send(msg);
    }

    /// Zero and non-finite divisors are ignored.
    pub fn set_divisor(&mut self, divisor: f64) {
        if sanitize_divisor(divisor, 0.0) == 0.0 {
            debug!("ignoring divisor {divisor}");
            return;
        }
        self.settings.sr_divisor = divisor;
        self.send(ControlMessage {
            divisor: Some(divisor),
            ..Default::default()
        });
    }

    /// Zoom in (negative) or out (positive), clamped to `0..=MAX_SCALE`.
    pub fn set_scale(&mut self, delta: i32) {
        let scale = (self.scope.scale() as i64 + delta as i64).clamp(0, MAX_SCALE as i64) as u32;
        self.scope.set_scale(scale);
        self.settings.draw_scale = scale;
        self.canvas_dirty = true;
    }

    pub fn set_draw_mode(&mut self, draw_mode: DrawMode) {
        self.scope.draw_mode = draw_mode;
        self.settings.draw_mode = draw_mode;
        self.send(ControlMessage {
            draw_mode: Some(draw_mode.name().into()),
            ..Default::default()
        });
    }

    /// Apply new colors and stereo layout.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings.sanitized();
        self.scope.palette = self.settings.palette();
        self.canvas_dirty = true;
    }

    // ── Telemetry ───────────────────────────────────────────

    pub fn receive(&mut self, telemetry: Telemetry) {
        if let Some(byte_sample) = telemetry.byte_sample {
            self.set_byte_sample(byte_sample);
        }
        if !telemetry.draw_buffer.is_empty() {
            self.scope.extend_backlog(telemetry.draw_buffer, self.canvas_width);
        }
        if let Some(error) = telemetry.error {
            let show = match error.is_compiled {
                Some(compiled) => {
                    self.is_compilation_error = !compiled;
                    true
                }
                None => error.is_runtime == Some(true) && !self.is_compilation_error,
            };
            if show {
                self.error_message = error.message;
                self.send(ControlMessage {
                    error_displayed: Some(true),
                    ..Default::default()
                });
            }
        }
        if telemetry.update_url == Some(true) {
            self.url_update = true;
        }
    }

    // ── Animation ───────────────────────────────────────────

    /// Draw one frame. Returns whether another frame should be scheduled.
    pub fn animation_frame<C: Canvas + ?Sized>(&mut self, canvas: &mut C) -> bool {
        if self.canvas_dirty {
            canvas.clear();
            self.canvas_dirty = false;
        }
        let reverse = self.playback_speed < 0.0;
        match self.scope.draw(canvas, self.byte_sample, reverse) {
            DrawOutcome::ResetRequested => self.reset_time(),
            DrawOutcome::Drawn { cursor } => {
                if self.scope.time_cursor_enabled(self.sample_rate) {
                    self.cursor = Some(cursor);
                } else {
                    self.cursor = None;
                }
            }
            DrawOutcome::Idle => {}
        }
        self.is_playing
    }

    /// Keep drawing while playing. `next_frame` blocks until the display
    /// is ready and feeds in pending telemetry; returning `false` stops
    /// the loop early.
    pub fn run_animation<C: Canvas + ?Sized>(
        &mut self,
        canvas: &mut C,
        mut next_frame: impl FnMut(&mut Self) -> bool,
    ) {
        while next_frame(self) {
            if !self.animation_frame(canvas) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::message::{DrawEvent, ErrorReport};
    use crate::scope::PixelBuffer;

    fn surface() -> Surface {
        Surface::new(48000.0, Settings::default())
    }

    #[test]
    fn test_load_song_sends_one_message() {
        let mut s = surface();
        s.load_song(Song::new("t*(t>>5|t>>8)", PlaybackMode::Bytebeat, 8000.0), true);
        let out = s.take_outgoing();
        assert_eq!(out.len(), 1);
        let msg = &out[0];
        assert_eq!(msg.mode.as_deref(), Some("Bytebeat"));
        assert_eq!(msg.sample_rate, Some(8000.0));
        assert_eq!(msg.sample_ratio, Some(8000.0 / 48000.0));
        assert_eq!(msg.set_function.as_deref(), Some("t*(t>>5|t>>8)"));
        assert_eq!(msg.reset_time, Some(true));
        assert_eq!(msg.is_playing, Some(true));
        assert_eq!(msg.playback_speed, Some(1.0));
        assert!(s.is_playing());
    }

    #[test]
    fn test_load_without_play_keeps_transport() {
        let mut s = surface();
        s.load_song(Song::new("t", PlaybackMode::Floatbeat, 0.0), false);
        let msg = &s.take_outgoing()[0];
        assert_eq!(msg.sample_rate, Some(8000.0));
        assert!(msg.is_playing.is_none());
        assert!(msg.reset_time.is_none());
        assert!(!s.is_playing());
    }

    #[test]
    fn test_fast_forward_doubles_then_wraps() {
        let mut s = surface();
        let mut speeds = Vec::new();
        for _ in 0..8 {
            s.toggle_playback(true, 1);
            speeds.push(s.playback_speed());
        }
        assert_eq!(speeds, vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 1.0]);

        s.toggle_playback(true, -1);
        assert_eq!(s.playback_speed(), -1.0);
        s.toggle_playback(true, -1);
        assert_eq!(s.playback_speed(), -2.0);
        assert_eq!(s.multipliers(), [1.0, 4.0]);

        s.toggle_playback(false, 0);
        assert_eq!(s.playback_speed(), -1.0);
        assert_eq!(s.multipliers(), [1.0, 1.0]);
        let last = s.take_outgoing().pop().unwrap();
        assert_eq!(last.is_playing, Some(false));
        assert_eq!(last.playback_speed, Some(-1.0));
    }

    #[test]
    fn test_stop_clears_scope_on_zero_position() {
        let mut s = surface();
        s.load_song(Song::new("t", PlaybackMode::Bytebeat, 8000.0), true);
        s.receive(Telemetry {
            byte_sample: Some(0.0),
            ..Default::default()
        });
        s.receive(Telemetry {
            byte_sample: Some(128.0),
            draw_buffer: vec![DrawEvent {
                t: 0.0,
                value: [Some(0); 3],
            }],
            ..Default::default()
        });
        assert_eq!(s.scope().backlog().len(), 1);
        s.take_outgoing();

        s.stop();
        assert_eq!(
            s.take_outgoing(),
            vec![ControlMessage {
                is_playing: Some(false),
                reset_time: Some(true),
                ..Default::default()
            }]
        );
        assert_eq!(s.scope().backlog().len(), 1);
        s.receive(Telemetry::position(0.0));
        assert!(s.scope().backlog().is_empty());
        assert_eq!(s.byte_sample(), 0.0);
    }

    #[test]
    fn test_runtime_error_hidden_behind_compile_error() {
        let mut s = surface();
        s.receive(Telemetry {
            error: Some(ErrorReport::compile("compilation error: bad", false)),
            update_url: Some(false),
            ..Default::default()
        });
        assert_eq!(s.error_message(), "compilation error: bad");
        assert_eq!(s.take_outgoing()[0].error_displayed, Some(true));
        assert!(!s.take_url_update());

        s.receive(Telemetry {
            error: Some(ErrorReport::runtime("t=9 error: x")),
            ..Default::default()
        });
        assert_eq!(s.error_message(), "compilation error: bad");
        assert!(s.take_outgoing().is_empty());

        s.receive(Telemetry {
            error: Some(ErrorReport::compile("", true)),
            update_url: Some(true),
            ..Default::default()
        });
        assert_eq!(s.error_message(), "");
        assert!(s.take_url_update());
        s.receive(Telemetry {
            error: Some(ErrorReport::runtime("t=9 error: x")),
            ..Default::default()
        });
        assert_eq!(s.error_message(), "t=9 error: x");
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut s = surface();
        s.set_scale(-100);
        assert_eq!(s.scope().scale(), 0);
        s.set_scale(100);
        assert_eq!(s.scope().scale(), MAX_SCALE);
        assert_eq!(s.settings().draw_scale, MAX_SCALE);
    }

    #[test]
    fn test_invalid_divisor_is_not_sent() {
        let mut s = surface();
        s.set_divisor(0.0);
        s.set_divisor(f64::NAN);
        assert!(s.take_outgoing().is_empty());
        s.set_divisor(4.0);
        assert_eq!(s.take_outgoing()[0].divisor, Some(4.0));
        assert_eq!(s.settings().sr_divisor, 4.0);
    }

    #[test]
    fn test_funcbeat_position_follows_rate() {
        let mut s = surface();
        s.load_song(Song::new("return t => 0", PlaybackMode::Funcbeat, 8000.0), false);
        s.receive(Telemetry::position(8000.0));
        s.take_outgoing();
        s.set_sample_rate(44100.0);
        let msg = &s.take_outgoing()[0];
        assert_eq!(msg.byte_sample, Some(44100.0));
        assert_eq!(msg.sample_ratio, Some(44100.0 / 48000.0));
    }

    #[test]
    fn test_animation_runs_only_while_playing() {
        let mut s = surface();
        s.set_canvas_width(64);
        s.set_scale(-100);
        s.load_song(Song::new("t", PlaybackMode::Bytebeat, 8000.0), true);
        let mut canvas = PixelBuffer::new(64);

        let mut frames = 0;
        s.run_animation(&mut canvas, |surface| {
            frames += 1;
            let t = frames as f64 - 1.0;
            surface.receive(Telemetry {
                byte_sample: Some(t + 1.0),
                draw_buffer: vec![DrawEvent {
                    t,
                    value: [Some(200); 3],
                }],
                ..Default::default()
            });
            if frames == 3 {
                surface.toggle_playback(false, 0);
            }
            true
        });
        assert_eq!(frames, 3);
        assert_eq!(canvas.pixel(2, 55), [255, 255, 255, 255]);
    }
}
