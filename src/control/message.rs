//! Records carried over the control channel.
//!
//! Both directions are plain structs of optional fields, serialized with
//! camelCase keys so a JavaScript host can post them unchanged.

use serde::{Deserialize, Serialize};

// ── Inbound ─────────────────────────────────────────────────

/// A parameter change for the synthesis loop. Every field is optional;
/// present fields are applied in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlMessage {
    /// Absolute logical position. Also resets the derived clock state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_sample: Option<f64>,
    /// Only `true` has an effect: re-arms runtime error reporting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_displayed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_speed: Option<f64>,
    /// Mode name, e.g. `"Signed Bytebeat"`. Unknown names select no mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Source text to compile and swap in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_function: Option<String>,
    /// Only `true` has an effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    /// Target rate over host rate, before the speed multiplier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divisor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_mode: Option<String>,
}

impl ControlMessage {
    pub fn is_empty(&self) -> bool {
        *self == ControlMessage::default()
    }
}

// ── Outbound ────────────────────────────────────────────────

/// One serviced tick as seen by the scope. `None` channels carry no value
/// and are drawn as an error stripe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawEvent {
    pub t: f64,
    pub value: [Option<u8>; 3],
}

/// Error surfaced to the control surface. An empty message clears the
/// displayed error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorReport {
    pub message: String,
    /// Set on compile results: whether the source got far enough to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_compiled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_runtime: Option<bool>,
}

impl ErrorReport {
    pub fn compile(message: impl Into<String>, is_compiled: bool) -> Self {
        ErrorReport {
            message: message.into(),
            is_compiled: Some(is_compiled),
            is_runtime: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ErrorReport {
            message: message.into(),
            is_compiled: None,
            is_runtime: Some(true),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.message.is_empty()
    }
}

/// Event sent from the synthesis loop back to the control surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Telemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_sample: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub draw_buffer: Vec<DrawEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// The submitted code is worth persisting in the page URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_url: Option<bool>,
}

impl Telemetry {
    pub fn position(byte_sample: f64) -> Self {
        Telemetry {
            byte_sample: Some(byte_sample),
            ..Default::default()
        }
    }
}
