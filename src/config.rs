//! Persisted user settings and the validation rules for rate, divisor,
//! scale and colors.

use serde::{Deserialize, Serialize};

use crate::scope::{stereo_channels, DrawMode, Palette, DEFAULT_SCALE, MAX_SCALE};

pub const MIN_SAMPLE_RATE: f64 = 8000.0;
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;
/// Playback rate used when the requested one is unusable.
pub const FALLBACK_SAMPLE_RATE: f64 = 8000.0;
pub const DEFAULT_DEVICE_RATE: f64 = 48000.0;

/// Settings record, stored as JSON. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub draw_mode: DrawMode,
    pub draw_scale: u32,
    /// `#rrggbb`
    pub color_diagram: String,
    /// `#rrggbb`, also used for points.
    pub color_waveform: String,
    /// Channel-to-RGB layout, see [`stereo_channels`].
    pub color_stereo: u8,
    pub sr_divisor: f64,
    /// Output device rate requested from the host.
    pub audio_sample_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            draw_mode: DrawMode::Combined,
            draw_scale: DEFAULT_SCALE,
            color_diagram: "#9ee0b2".into(),
            color_waveform: "#ffffff".into(),
            color_stereo: 0,
            sr_divisor: 1.0,
            audio_sample_rate: DEFAULT_DEVICE_RATE,
        }
    }
}

impl Settings {
    /// Parse stored settings and bring every field into range.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let settings: Settings = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn sanitized(mut self) -> Self {
        let defaults = Settings::default();
        self.draw_scale = self.draw_scale.min(MAX_SCALE);
        self.sr_divisor = sanitize_divisor(self.sr_divisor, 1.0);
        self.audio_sample_rate = validate_device_rate(self.audio_sample_rate, defaults.audio_sample_rate);
        if parse_hex_color(&self.color_diagram).is_none() {
            self.color_diagram = defaults.color_diagram;
        }
        if parse_hex_color(&self.color_waveform).is_none() {
            self.color_waveform = defaults.color_waveform;
        }
        self
    }

    /// Scope colors for these settings. Unparseable colors keep the
    /// default palette entry.
    pub fn palette(&self) -> Palette {
        let defaults = Palette::default();
        Palette {
            diagram: parse_hex_color(&self.color_diagram).unwrap_or(defaults.diagram),
            waveform: parse_hex_color(&self.color_waveform).unwrap_or(defaults.waveform),
            channels: stereo_channels(self.color_stereo),
        }
    }
}

/// Playback rate: magnitude of the input if it lies in
/// `MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE`, otherwise the fallback.
pub fn sanitize_sample_rate(rate: f64) -> f64 {
    let rate = rate.abs();
    if rate.is_finite() && (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        rate
    } else {
        FALLBACK_SAMPLE_RATE
    }
}

/// Device rate: out-of-range requests are rejected and `previous` kept.
pub fn validate_device_rate(rate: f64, previous: f64) -> f64 {
    if rate.is_finite() && (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        rate
    } else {
        previous
    }
}

/// Zero and non-finite divisors are ignored.
pub fn sanitize_divisor(value: f64, previous: f64) -> f64 {
    if value.is_finite() && value != 0.0 {
        value
    } else {
        previous
    }
}

/// `#rrggbb` to `[r, g, b]`.
pub fn parse_hex_color(text: &str) -> Option<[u8; 3]> {
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let settings = Settings {
            draw_mode: DrawMode::Diagram,
            draw_scale: 3,
            color_stereo: 2,
            sr_divisor: 4.0,
            ..Default::default()
        };
        let json = settings.to_json().unwrap();
        assert!(json.contains("\"drawMode\":\"Diagram\""), "{json}");
        assert!(json.contains("\"srDivisor\":4.0"), "{json}");
        assert_eq!(Settings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_missing_and_bad_fields_fall_back() {
        let settings =
            Settings::from_json(r##"{"drawScale":99,"colorDiagram":"green","srDivisor":0,"audioSampleRate":1000}"##)
                .unwrap();
        assert_eq!(settings.draw_scale, MAX_SCALE);
        assert_eq!(settings.color_diagram, "#9ee0b2");
        assert_eq!(settings.sr_divisor, 1.0);
        assert_eq!(settings.audio_sample_rate, DEFAULT_DEVICE_RATE);
        assert_eq!(settings.draw_mode, DrawMode::Combined);
        assert!(Settings::from_json("not json").is_err());
    }

    #[test]
    fn test_sample_rate_rules() {
        assert_eq!(sanitize_sample_rate(44100.0), 44100.0);
        assert_eq!(sanitize_sample_rate(-11025.0), 11025.0);
        assert_eq!(sanitize_sample_rate(0.0), FALLBACK_SAMPLE_RATE);
        assert_eq!(sanitize_sample_rate(f64::NAN), FALLBACK_SAMPLE_RATE);
        assert_eq!(sanitize_sample_rate(500_000.0), FALLBACK_SAMPLE_RATE);
        assert_eq!(validate_device_rate(96000.0, 48000.0), 96000.0);
        assert_eq!(validate_device_rate(4000.0, 44100.0), 44100.0);
    }

    #[test]
    fn test_divisor_and_colors() {
        assert_eq!(sanitize_divisor(3.0, 1.0), 3.0);
        assert_eq!(sanitize_divisor(0.0, 2.0), 2.0);
        assert_eq!(sanitize_divisor(f64::INFINITY, 2.0), 2.0);
        assert_eq!(parse_hex_color("#9ee0b2"), Some([0x9e, 0xe0, 0xb2]));
        assert_eq!(parse_hex_color("9ee0b2"), None);
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#zz0000"), None);
    }

    #[test]
    fn test_palette_uses_stereo_layout() {
        let settings = Settings {
            color_waveform: "#102030".into(),
            color_stereo: 1,
            ..Default::default()
        };
        let palette = settings.palette();
        assert_eq!(palette.waveform, [0x10, 0x20, 0x30]);
        assert_eq!(palette.channels, [1, 0, 2]);
    }
}
