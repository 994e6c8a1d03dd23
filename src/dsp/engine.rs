//! Synthesis Loop: services logical ticks from the host's audio callback.
//!
//! The host pulls fixed-size blocks. Each frame advances a fractional clock
//! by the sample ratio; whenever its floor crosses into a new integer the
//! user function is evaluated for one tick and the result is held until
//! the next crossing. Host block size therefore never changes which ticks
//! are serviced, and the target rate may be below, above, or negative
//! relative to the host rate.

use log::{debug, info, warn};

use crate::compiler::{self, CompiledFunction, Convention};
use crate::config::{sanitize_divisor, sanitize_sample_rate};
use crate::control::message::{ControlMessage, DrawEvent, ErrorReport, Telemetry};

use super::quantizer::{PlaybackMode, Quantizer, RawSample};

/// Largest integer a double holds exactly. Beyond it the clock is reset.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// The synthesis loop and its clock state.
#[derive(Debug)]
pub struct Engine {
    /// Host frames processed since the last reset.
    audio_sample: u64,
    /// Logical time exposed to user code and to the scope.
    byte_sample: f64,
    /// Floor of the fractional clock at the last serviced tick.
    last_time: f64,
    /// Logical ticks per host frame, playback speed included.
    sample_ratio: f64,
    playback_speed: f64,
    /// Ticks per evaluation; results are held in between.
    divisor: f64,
    /// Target rate handed to factory functions.
    sample_rate: f64,
    is_playing: bool,
    error_displayed: bool,
    draw_mode: Option<String>,

    func: Option<CompiledFunction>,
    quantizer: Quantizer,
    /// Result held across the non-evaluated ticks of a divisor window.
    divisor_storage: RawSample,
    out_value: [f64; 2],
    outbox: Vec<Telemetry>,
}

impl Engine {
    pub fn new(host_sample_rate: f64) -> Self {
        Engine {
            audio_sample: 0,
            byte_sample: 0.0,
            last_time: 0.0,
            sample_ratio: 1.0,
            playback_speed: 1.0,
            divisor: 1.0,
            sample_rate: sanitize_sample_rate(host_sample_rate),
            is_playing: false,
            error_displayed: true,
            draw_mode: None,
            func: None,
            quantizer: Quantizer::new(None),
            divisor_storage: RawSample::Scalar(0.0),
            out_value: [0.0; 2],
            outbox: Vec::new(),
        }
    }

    pub fn byte_sample(&self) -> f64 {
        self.byte_sample
    }

    pub fn sample_ratio(&self) -> f64 {
        self.sample_ratio
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn divisor(&self) -> f64 {
        self.divisor
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn mode(&self) -> Option<PlaybackMode> {
        self.quantizer.mode()
    }

    pub fn draw_mode(&self) -> Option<&str> {
        self.draw_mode.as_deref()
    }

    /// Source of the active function, if one compiled.
    pub fn function_source(&self) -> Option<&str> {
        self.func.as_ref().map(CompiledFunction::source)
    }

    pub fn set_mode(&mut self, mode: Option<PlaybackMode>) {
        self.quantizer.set_mode(mode);
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }

    /// Swap in an already validated function.
    pub fn install(&mut self, func: CompiledFunction) {
        self.func = Some(func);
    }

    /// Outbound events queued since the last call.
    pub fn take_telemetry(&mut self) -> Vec<Telemetry> {
        std::mem::take(&mut self.outbox)
    }

    // ── Control ─────────────────────────────────────────────

    /// Apply one control message. Fields are applied in a fixed order so
    /// that, for example, a mode switch lands before the code that needs it.
    pub fn apply(&mut self, msg: ControlMessage) {
        debug!("control message: {msg:?}");
        if let Some(position) = msg.byte_sample {
            self.byte_sample = if position.is_finite() { position } else { 0.0 };
            self.reset_values();
        }
        if msg.error_displayed == Some(true) {
            self.error_displayed = true;
        }
        if let Some(playing) = msg.is_playing {
            self.is_playing = playing;
        }
        if let Some(speed) = msg.playback_speed {
            if speed.is_finite() && speed != 0.0 {
                let base = self.sample_ratio / self.playback_speed;
                self.playback_speed = speed;
                self.set_sample_ratio(base);
            }
        }
        if let Some(name) = msg.mode {
            let mode = PlaybackMode::from_name(&name);
            if mode.is_none() {
                warn!("unknown playback mode {name:?}, output is silent");
            } else {
                info!("playback mode: {name}");
            }
            self.quantizer.set_mode(mode);
        }
        if let Some(code) = msg.set_function {
            self.set_function(&code);
        }
        if msg.reset_time == Some(true) {
            self.reset_time();
        }
        if let Some(rate) = msg.sample_rate {
            self.sample_rate = sanitize_sample_rate(rate);
            info!("sample rate: {}", self.sample_rate);
        }
        if let Some(ratio) = msg.sample_ratio {
            if ratio.is_finite() {
                self.set_sample_ratio(ratio);
            }
        }
        if let Some(divisor) = msg.divisor {
            self.divisor = sanitize_divisor(divisor, self.divisor);
        }
        if let Some(draw_mode) = msg.draw_mode {
            self.draw_mode = Some(draw_mode);
        }
    }

    /// Compile `code` for the current mode. On failure the active function
    /// stays in place.
    fn set_function(&mut self, code: &str) {
        let convention = self
            .quantizer
            .mode()
            .map_or(Convention::Expression, PlaybackMode::convention);
        self.error_displayed = false;
        match compiler::compile(code, convention, self.sample_rate) {
            Ok(func) => {
                info!("compiled {convention:?} function, {} chars", func.source().len());
                self.func = Some(func);
                self.outbox.push(Telemetry {
                    error: Some(ErrorReport::compile("", true)),
                    update_url: Some(true),
                    ..Default::default()
                });
            }
            Err(err) => {
                let message = err.describe(&compiler::prepare_source(code));
                warn!("{message}");
                self.outbox.push(Telemetry {
                    error: Some(ErrorReport::compile(message, err.is_compiled())),
                    update_url: Some(err.is_compiled()),
                    ..Default::default()
                });
            }
        }
    }

    /// Change the base ratio while keeping the clock's distance to the last
    /// serviced tick, so playback continues without a jump.
    fn set_sample_ratio(&mut self, ratio: f64) {
        let frames = self.audio_sample as f64;
        let offset = (self.sample_ratio * frames).floor() - self.last_time;
        self.sample_ratio = ratio * self.playback_speed;
        self.last_time = (self.sample_ratio * frames).floor() - offset;
    }

    fn reset_values(&mut self) {
        self.audio_sample = 0;
        self.last_time = 0.0;
        self.out_value = [0.0; 2];
    }

    fn reset_time(&mut self) {
        self.byte_sample = 0.0;
        self.reset_values();
        self.outbox.push(Telemetry::position(0.0));
    }

    // ── Processing ──────────────────────────────────────────

    /// Fill one host block. `inputs` are the microphone channels. Always
    /// returns `true` (keep the processor alive).
    pub fn process(&mut self, inputs: &[&[f32]], left: &mut [f32], right: &mut [f32]) -> bool {
        let len = left.len().min(right.len());
        if len == 0 || !self.is_playing {
            return true;
        }

        let mut byte_sample = self.byte_sample;
        let mut draw_buffer = Vec::new();

        for i in 0..len {
            // Derived from the frame count, not accumulated, so the block
            // size cannot shift where ticks land.
            let frame = self.audio_sample + i as u64 + 1;
            let current_time = (self.sample_ratio * frame as f64).floor();
            if current_time != self.last_time {
                let delta = current_time - self.last_time;
                // Reverse steps evaluate the tick being moved into.
                let tick = if delta < 0.0 {
                    (byte_sample + delta).floor()
                } else {
                    byte_sample.floor()
                };
                let raw = self.evaluate(tick, mic_sample(inputs, i));
                self.out_value = self.quantizer.audio(raw);
                draw_buffer.push(DrawEvent {
                    t: tick,
                    value: self.quantizer.visual(raw),
                });
                byte_sample += delta;
                self.last_time = current_time;
            }
            left[i] = self.out_value[0] as f32;
            right[i] = self.out_value[1] as f32;
        }

        if byte_sample.abs() > MAX_SAFE_INTEGER {
            warn!("logical time {byte_sample} out of range, resetting");
            self.reset_time();
            return true;
        }

        self.audio_sample += len as u64;

        let mut telemetry = Telemetry::default();
        if byte_sample != self.byte_sample {
            self.byte_sample = byte_sample;
            telemetry.byte_sample = Some(byte_sample);
        }
        telemetry.draw_buffer = draw_buffer;
        if telemetry.byte_sample.is_some() || !telemetry.draw_buffer.is_empty() {
            self.outbox.push(telemetry);
        }
        true
    }

    /// Run the user function for `tick`, or reuse the divisor window's
    /// stored result. Failures yield NaN and are reported once per re-arm.
    fn evaluate(&mut self, tick: f64, mic: [f64; 3]) -> RawSample {
        if tick.rem_euclid(self.divisor) != 0.0 {
            return self.divisor_storage;
        }
        let Some(func) = self.func.as_mut() else {
            return RawSample::NAN;
        };
        match func.call_tick(tick, self.sample_rate, mic) {
            Ok(raw) => {
                self.divisor_storage = raw;
                raw
            }
            Err(err) => {
                if self.error_displayed {
                    self.error_displayed = false;
                    let message = func.describe_runtime(&err, tick);
                    warn!("{message}");
                    self.outbox.push(Telemetry {
                        error: Some(ErrorReport::runtime(message)),
                        ..Default::default()
                    });
                }
                RawSample::NAN
            }
        }
    }
}

/// `[left, right, average]` from the input channels; mono input is
/// duplicated and missing samples read as 0.
fn mic_sample(inputs: &[&[f32]], i: usize) -> [f64; 3] {
    let sample = |ch: &[f32]| ch.get(i).map_or(0.0, |&s| s as f64);
    let first = inputs.first().map_or(0.0, |ch| sample(*ch));
    let second = inputs.get(1).map_or(first, |ch| sample(*ch));
    [first, second, (first + second) / 2.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(mode: &str, code: &str) -> Engine {
        let mut engine = Engine::new(48000.0);
        engine.apply(ControlMessage {
            mode: Some(mode.into()),
            set_function: Some(code.into()),
            reset_time: Some(true),
            is_playing: Some(true),
            ..Default::default()
        });
        engine.take_telemetry();
        engine
    }

    fn run(engine: &mut Engine, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        engine.process(&[], &mut left, &mut right);
        (left, right)
    }

    fn draw_events(engine: &mut Engine) -> Vec<DrawEvent> {
        engine
            .take_telemetry()
            .into_iter()
            .flat_map(|t| t.draw_buffer)
            .collect()
    }

    fn errors(telemetry: &[Telemetry]) -> Vec<&ErrorReport> {
        telemetry.iter().filter_map(|t| t.error.as_ref()).collect()
    }

    #[test]
    fn bytebeat_first_ticks() {
        let mut engine = engine_with("Bytebeat", "t & 255");
        let (left, right) = run(&mut engine, 4);
        let expected = [-1.0, -0.992_156_9, -0.984_313_7, -0.976_470_6];
        for (i, want) in expected.iter().enumerate() {
            assert!((left[i] - want).abs() < 1e-6, "left[{i}] = {}", left[i]);
            assert_eq!(left[i], right[i]);
        }
        let events = draw_events(&mut engine);
        let ticks: Vec<f64> = events.iter().map(|e| e.t).collect();
        assert_eq!(ticks, vec![0.0, 1.0, 2.0, 3.0]);
        let visual: Vec<Option<u8>> = events.iter().map(|e| e.value[0]).collect();
        assert_eq!(visual, vec![Some(0), Some(1), Some(2), Some(3)]);
        assert_eq!(engine.byte_sample(), 4.0);
    }

    #[test]
    fn divisor_reuses_window_result() {
        let mut engine = engine_with("Bytebeat", "t");
        engine.apply(ControlMessage {
            divisor: Some(3.0),
            ..Default::default()
        });
        run(&mut engine, 6);
        let visual: Vec<Option<u8>> = draw_events(&mut engine).iter().map(|e| e.value[0]).collect();
        assert_eq!(
            visual,
            vec![Some(0), Some(0), Some(0), Some(3), Some(3), Some(3)]
        );
    }

    #[test]
    fn divisor_invokes_once_per_window() {
        // The trial call at compile time counts as the first invocation.
        let mut engine = engine_with("Bytebeat", "n = (n | 0) + 1");
        engine.apply(ControlMessage {
            divisor: Some(4.0),
            ..Default::default()
        });
        run(&mut engine, 12);
        let visual: Vec<Option<u8>> = draw_events(&mut engine).iter().map(|e| e.value[0]).collect();
        let mut expected = Vec::new();
        for n in [2, 3, 4] {
            expected.extend([Some(n); 4]);
        }
        assert_eq!(visual, expected);
    }

    #[test]
    fn runtime_error_reported_once_until_rearmed() {
        let mut engine = engine_with("Bytebeat", "br(t, t >= 5 ? 40 : 8)");
        engine.apply(ControlMessage {
            error_displayed: Some(true),
            ..Default::default()
        });
        run(&mut engine, 7);
        let telemetry = engine.take_telemetry();
        let reported = errors(&telemetry);
        assert_eq!(reported.len(), 1, "{telemetry:?}");
        assert_eq!(reported[0].is_runtime, Some(true));
        assert!(
            reported[0].message.starts_with("t=5 error"),
            "message: {}",
            reported[0].message
        );
        let events: Vec<DrawEvent> = telemetry.into_iter().flat_map(|t| t.draw_buffer).collect();
        assert_eq!(events[5].value, [None; 3]);
        assert_eq!(events[6].value, [None; 3]);

        run(&mut engine, 3);
        assert!(errors(&engine.take_telemetry()).is_empty());

        engine.apply(ControlMessage {
            error_displayed: Some(true),
            ..Default::default()
        });
        run(&mut engine, 1);
        assert_eq!(errors(&engine.take_telemetry()).len(), 1);
    }

    #[test]
    fn failed_recompile_keeps_previous_function() {
        let mut engine = engine_with("Bytebeat", "t * 2");
        engine.apply(ControlMessage {
            set_function: Some("t * (".into()),
            ..Default::default()
        });
        let telemetry = engine.take_telemetry();
        let report = errors(&telemetry)[0];
        assert_eq!(report.is_compiled, Some(false));
        assert!(report.message.starts_with("compilation error"), "{}", report.message);
        assert_eq!(telemetry[0].update_url, Some(false));
        assert_eq!(engine.function_source(), Some("t * 2"));

        run(&mut engine, 3);
        let visual: Vec<Option<u8>> = draw_events(&mut engine).iter().map(|e| e.value[0]).collect();
        assert_eq!(visual, vec![Some(0), Some(2), Some(4)]);
    }

    #[test]
    fn failed_trial_call_keeps_previous_function() {
        let mut engine = engine_with("Bytebeat", "t");
        engine.apply(ControlMessage {
            set_function: Some("br(t, 64)".into()),
            ..Default::default()
        });
        let telemetry = engine.take_telemetry();
        let report = errors(&telemetry)[0];
        assert_eq!(report.is_compiled, Some(true));
        assert!(report.message.starts_with("t=0 error"), "{}", report.message);
        assert_eq!(engine.function_source(), Some("t"));
    }

    #[test]
    fn successful_compile_clears_error() {
        let mut engine = Engine::new(48000.0);
        engine.apply(ControlMessage {
            mode: Some("Floatbeat".into()),
            set_function: Some("sin(t / 10)".into()),
            ..Default::default()
        });
        let telemetry = engine.take_telemetry();
        assert_eq!(telemetry.len(), 1);
        assert_eq!(telemetry[0].error, Some(ErrorReport::compile("", true)));
        assert_eq!(telemetry[0].update_url, Some(true));
    }

    #[test]
    fn buffer_size_does_not_change_ticks() {
        let render = |block: usize| {
            let mut engine = engine_with("Bytebeat", "(t * 7) ^ (t >> 2)");
            engine.apply(ControlMessage {
                sample_ratio: Some(0.75),
                divisor: Some(2.0),
                ..Default::default()
            });
            let mut out = Vec::new();
            let mut remaining = 300;
            while remaining > 0 {
                let n = block.min(remaining);
                let (left, _) = run(&mut engine, n);
                out.extend(left);
                remaining -= n;
            }
            (engine.byte_sample(), out, draw_events(&mut engine))
        };
        let (pos_a, out_a, events_a) = render(128);
        let (pos_b, out_b, events_b) = render(7);
        assert_eq!(pos_a, 225.0);
        assert_eq!(pos_a, pos_b);
        assert_eq!(out_a, out_b);
        assert_eq!(events_a, events_b);
    }

    #[test]
    fn buffer_size_does_not_change_ticks_at_uneven_ratio() {
        let ratio = 8000.0 / 44100.0;
        let render = |block: usize| {
            let mut engine = engine_with("Bytebeat", "(t * 7) ^ (t >> 2)");
            engine.apply(ControlMessage {
                sample_ratio: Some(ratio),
                ..Default::default()
            });
            let mut out = Vec::with_capacity(44100);
            let mut remaining = 44100;
            while remaining > 0 {
                let n = block.min(remaining);
                let (left, _) = run(&mut engine, n);
                out.extend(left);
                remaining -= n;
            }
            (engine.byte_sample(), out)
        };
        let (pos_a, out_a) = render(128);
        let (pos_b, out_b) = render(7);
        let (pos_c, out_c) = render(1);
        assert_eq!(pos_a, (ratio * 44100.0).floor());
        assert_eq!(pos_a, pos_b, "128-frame vs 7-frame blocks");
        assert_eq!(pos_a, pos_c, "128-frame vs 1-frame blocks");
        assert!(out_a == out_b, "audio differs between 128 and 7 frame blocks");
        assert!(out_a == out_c, "audio differs between 128 and 1 frame blocks");
    }

    #[test]
    fn overly_nested_function_keeps_previous_function() {
        let mut engine = engine_with("Bytebeat", "t");
        let code = format!("{}t{}", "(".repeat(10_000), ")".repeat(10_000));
        engine.apply(ControlMessage {
            set_function: Some(code),
            ..Default::default()
        });
        let telemetry = engine.take_telemetry();
        let report = errors(&telemetry)[0];
        assert_eq!(report.is_compiled, Some(false));
        assert_eq!(engine.function_source(), Some("t"));
    }

    #[test]
    fn reverse_playback_mirrors_forward() {
        let mut engine = engine_with("Bytebeat", "(t * 7) ^ (t >> 2)");
        run(&mut engine, 40);
        let forward = draw_events(&mut engine);

        engine.apply(ControlMessage {
            playback_speed: Some(-1.0),
            ..Default::default()
        });
        run(&mut engine, 40);
        let backward = draw_events(&mut engine);

        assert_eq!(engine.byte_sample(), 0.0);
        let mut mirrored = backward.clone();
        mirrored.reverse();
        assert_eq!(mirrored, forward);
    }

    #[test]
    fn ratio_change_keeps_position() {
        let mut engine = engine_with("Bytebeat", "t");
        run(&mut engine, 10);
        engine.apply(ControlMessage {
            sample_ratio: Some(2.0),
            ..Default::default()
        });
        engine.take_telemetry();
        run(&mut engine, 3);
        let ticks: Vec<f64> = draw_events(&mut engine).iter().map(|e| e.t).collect();
        assert_eq!(ticks, vec![10.0, 12.0, 14.0]);
        assert_eq!(engine.byte_sample(), 16.0);
    }

    #[test]
    fn paused_engine_is_silent_and_quiet() {
        let mut engine = engine_with("Bytebeat", "t");
        engine.apply(ControlMessage {
            is_playing: Some(false),
            ..Default::default()
        });
        let (left, right) = run(&mut engine, 16);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
        assert!(engine.take_telemetry().is_empty());
        assert_eq!(engine.byte_sample(), 0.0);
    }

    #[test]
    fn overflowing_clock_resets() {
        let mut engine = engine_with("Bytebeat", "t & 255");
        engine.apply(ControlMessage {
            byte_sample: Some(MAX_SAFE_INTEGER - 1.0),
            ..Default::default()
        });
        run(&mut engine, 4);
        assert_eq!(engine.byte_sample(), 0.0);
        let telemetry = engine.take_telemetry();
        assert_eq!(telemetry, vec![Telemetry::position(0.0)]);
    }

    #[test]
    fn funcbeat_receives_rate_and_mic() {
        let mut engine = Engine::new(48000.0);
        engine.apply(ControlMessage {
            mode: Some("Funcbeat".into()),
            sample_rate: Some(8000.0),
            ..Default::default()
        });
        engine.apply(ControlMessage {
            set_function: Some("return (time, rate, t, mic) => mic[0] + (rate == 8000 ? 0 : 1)".into()),
            is_playing: Some(true),
            ..Default::default()
        });
        assert_eq!(errors(&engine.take_telemetry())[0].message, "");
        let input = [0.5f32, -0.25];
        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        engine.process(&[&input], &mut left, &mut right);
        assert_eq!(left, [0.5, -0.25]);
    }

    #[test]
    fn triple_result_is_mixed_to_stereo() {
        let mut engine = engine_with("Floatbeat", "[0.9, 0.3, -0.6]");
        let (left, right) = run(&mut engine, 1);
        assert!((left[0] - 0.7).abs() < 1e-6);
        assert!((right[0] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn mic_sample_duplicates_mono() {
        let mono = [0.5f32];
        assert_eq!(mic_sample(&[&mono], 0), [0.5, 0.5, 0.5]);
        let left = [1.0f32];
        let right = [0.0f32];
        assert_eq!(mic_sample(&[&left, &right], 0), [1.0, 0.0, 0.5]);
        assert_eq!(mic_sample(&[], 3), [0.0; 3]);
    }

    #[test]
    fn zero_divisor_is_ignored() {
        let mut engine = Engine::new(44100.0);
        engine.apply(ControlMessage {
            divisor: Some(0.0),
            ..Default::default()
        });
        assert_eq!(engine.divisor(), 1.0);
        engine.apply(ControlMessage {
            divisor: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(engine.divisor(), 1.0);
    }
}
