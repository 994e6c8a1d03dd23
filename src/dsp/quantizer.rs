//! Sample Quantizer: maps raw function results to audio and display values.

use serde::{Deserialize, Serialize};

use crate::compiler::Convention;
use crate::prelude::to_int32;

/// Playback mode: picks the quantization pair and the calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// Unsigned 8-bit.
    #[default]
    Bytebeat,
    /// Signed 8-bit.
    #[serde(rename = "Signed Bytebeat")]
    SignedBytebeat,
    /// Float in [-1, 1].
    Floatbeat,
    /// Float in [-1, 1], factory calling convention.
    Funcbeat,
}

impl PlaybackMode {
    pub fn name(self) -> &'static str {
        match self {
            PlaybackMode::Bytebeat => "Bytebeat",
            PlaybackMode::SignedBytebeat => "Signed Bytebeat",
            PlaybackMode::Floatbeat => "Floatbeat",
            PlaybackMode::Funcbeat => "Funcbeat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Bytebeat" => Some(PlaybackMode::Bytebeat),
            "Signed Bytebeat" => Some(PlaybackMode::SignedBytebeat),
            "Floatbeat" => Some(PlaybackMode::Floatbeat),
            "Funcbeat" => Some(PlaybackMode::Funcbeat),
            _ => None,
        }
    }

    pub fn convention(self) -> Convention {
        match self {
            PlaybackMode::Funcbeat => Convention::Factory,
            _ => Convention::Expression,
        }
    }
}

/// A function result: one number, or up to three per-channel numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawSample {
    Scalar(f64),
    /// `len` is the array length capped at 3; unused entries are NaN.
    List { values: [f64; 3], len: usize },
}

impl RawSample {
    pub const NAN: RawSample = RawSample::Scalar(f64::NAN);
}

/// Audio-domain value in [-1, 1]. NaN when no mode is selected.
pub fn audio_value(mode: Option<PlaybackMode>, raw: f64) -> f64 {
    match mode {
        Some(PlaybackMode::Bytebeat) => (to_int32(raw) & 255) as f64 / 127.5 - 1.0,
        Some(PlaybackMode::SignedBytebeat) => (to_int32(raw + 128.0) & 255) as f64 / 127.5 - 1.0,
        Some(PlaybackMode::Floatbeat | PlaybackMode::Funcbeat) => raw.clamp(-1.0, 1.0),
        None => f64::NAN,
    }
}

/// Display-domain byte. `None` marks "no value" (drawn as an error stripe).
pub fn visual_value(mode: Option<PlaybackMode>, raw: f64) -> Option<u8> {
    if raw.is_nan() {
        return None;
    }
    let v = match mode? {
        PlaybackMode::Bytebeat => (to_int32(raw) & 255) as f64,
        PlaybackMode::SignedBytebeat => (to_int32(raw + 128.0) & 255) as f64,
        PlaybackMode::Floatbeat | PlaybackMode::Funcbeat => raw.clamp(-1.0, 1.0) * 127.5 + 128.0,
    };
    Some((to_int32(v.floor()) & 255) as u8)
}

/// Stateful per-mode quantizer. Remembers the last good audio value of each
/// channel so non-finite results hold the previous level.
#[derive(Debug, Clone)]
pub struct Quantizer {
    mode: Option<PlaybackMode>,
    last_values: [f64; 3],
}

impl Quantizer {
    pub fn new(mode: Option<PlaybackMode>) -> Self {
        Quantizer {
            mode,
            last_values: [0.0; 3],
        }
    }

    pub fn mode(&self) -> Option<PlaybackMode> {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Option<PlaybackMode>) {
        self.mode = mode;
    }

    /// Stereo output. Three channels are blended as
    /// `[c0·2/3 + c1/3, c2·2/3 + c1/3]`.
    pub fn audio(&mut self, raw: RawSample) -> [f64; 2] {
        let (channels, count) = match raw {
            RawSample::Scalar(v) => ([v, v, f64::NAN], 2),
            RawSample::List { values, len } => match len {
                0 => ([f64::NAN; 3], 2),
                1 => ([values[0], f64::NAN, f64::NAN], 2),
                2 => ([values[0], values[1], f64::NAN], 2),
                _ => (values, 3),
            },
        };
        let mut out = [0.0; 3];
        for ch in 0..count {
            if channels[ch].is_finite() {
                self.last_values[ch] = audio_value(self.mode, channels[ch]);
            }
            out[ch] = self.last_values[ch];
        }
        if count == 3 {
            [
                out[0] * (2.0 / 3.0) + out[1] / 3.0,
                out[2] * (2.0 / 3.0) + out[1] / 3.0,
            ]
        } else {
            [out[0], out[1]]
        }
    }

    /// Display bytes for the three scope channels.
    pub fn visual(&self, raw: RawSample) -> [Option<u8>; 3] {
        let channels = match raw {
            RawSample::Scalar(v) => [v, v, v],
            RawSample::List { values, len } => match len {
                0 => [f64::NAN; 3],
                1 => [values[0], f64::NAN, f64::NAN],
                2 => [values[0], values[1], values[1]],
                _ => values,
            },
        };
        channels.map(|v| visual_value(self.mode, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_to_byte(a: f64) -> u8 {
        ((a + 1.0) * 127.5).round() as u8
    }

    #[test]
    fn test_bytebeat_round_trip() {
        for raw in (0..=1020).step_by(4) {
            let raw = raw as f64;
            let visual = visual_value(Some(PlaybackMode::Bytebeat), raw).unwrap();
            let audio = audio_value(Some(PlaybackMode::Bytebeat), raw);
            assert_eq!(visual, audio_to_byte(audio), "raw {raw}");
        }
    }

    #[test]
    fn test_signed_and_float_formulas() {
        let signed = Some(PlaybackMode::SignedBytebeat);
        assert_eq!(visual_value(signed, -128.0), Some(0));
        assert_eq!(visual_value(signed, 0.0), Some(128));
        assert!((audio_value(signed, 127.0) - 1.0).abs() < 1e-12);

        let float = Some(PlaybackMode::Floatbeat);
        assert_eq!(audio_value(float, 3.0), 1.0);
        assert_eq!(audio_value(float, -0.25), -0.25);
        assert_eq!(visual_value(float, 1.0), Some(255));
        assert_eq!(visual_value(float, -1.0), Some(0));
        assert_eq!(visual_value(float, 0.0), Some(128));
    }

    #[test]
    fn test_unset_mode_yields_nan() {
        assert!(audio_value(None, 5.0).is_nan());
        assert_eq!(visual_value(None, 5.0), None);
    }

    #[test]
    fn test_triple_mix_and_hold() {
        let mut q = Quantizer::new(Some(PlaybackMode::Floatbeat));
        let out = q.audio(RawSample::List {
            values: [0.9, 0.3, -0.6],
            len: 3,
        });
        assert!((out[0] - 0.7).abs() < 1e-12, "left {}", out[0]);
        assert!((out[1] - -0.3).abs() < 1e-12, "right {}", out[1]);

        // NaN on the right channel keeps its previous level.
        let out = q.audio(RawSample::List {
            values: [0.5, f64::NAN, f64::NAN],
            len: 2,
        });
        assert_eq!(out, [0.5, 0.3]);

        // Infinity holds too.
        let out = q.audio(RawSample::Scalar(f64::INFINITY));
        assert_eq!(out, [0.5, 0.3]);
    }

    #[test]
    fn test_visual_channel_expansion() {
        let q = Quantizer::new(Some(PlaybackMode::Bytebeat));
        assert_eq!(q.visual(RawSample::Scalar(300.0)), [Some(44); 3]);
        assert_eq!(
            q.visual(RawSample::List {
                values: [1.0, 2.0, f64::NAN],
                len: 2
            }),
            [Some(1), Some(2), Some(2)]
        );
        assert_eq!(
            q.visual(RawSample::List {
                values: [7.0, f64::NAN, f64::NAN],
                len: 1
            }),
            [Some(7), None, None]
        );
        assert_eq!(q.visual(RawSample::NAN), [None; 3]);
    }

    #[test]
    fn test_mode_names() {
        for mode in [
            PlaybackMode::Bytebeat,
            PlaybackMode::SignedBytebeat,
            PlaybackMode::Floatbeat,
            PlaybackMode::Funcbeat,
        ] {
            assert_eq!(PlaybackMode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(PlaybackMode::Funcbeat.convention(), Convention::Factory);
        assert_eq!(PlaybackMode::from_name("Bitbeat"), None);
    }
}
