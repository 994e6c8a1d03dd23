pub mod ast;
pub mod compiler;
pub mod config;
pub mod control;
pub mod dsp;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod prelude;
pub mod runtime;
pub mod scope;
pub mod token;
pub mod unbake;
pub mod wasm;

use crate::dsp::quantizer::PlaybackMode;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the beatscope-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: compile `code` for the named mode without playing it.
/// Returns the one-line error description, or an empty string when the
/// code compiles.
#[wasm_bindgen]
pub fn check_code(code: &str, mode: &str) -> String {
    let mode = PlaybackMode::from_name(mode).unwrap_or(PlaybackMode::Bytebeat);
    match compiler::compile(code, mode.convention(), config::FALLBACK_SAMPLE_RATE) {
        Ok(_) => String::new(),
        Err(e) => e.describe(&compiler::prepare_source(code)),
    }
}

/// WASM-exposed: render `seconds` of a program to a 16-bit stereo WAV.
#[wasm_bindgen]
pub fn render_wav(code: &str, mode: &str, sample_rate: f64, seconds: f64) -> Result<Vec<u8>, JsValue> {
    let mode = PlaybackMode::from_name(mode)
        .ok_or_else(|| JsValue::from_str(&format!("unknown playback mode {mode:?}")))?;
    dsp::renderer::render_wav(code, mode, sample_rate, seconds).map_err(|e| JsValue::from_str(&format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_code() {
        assert_eq!(check_code("t*(t>>8|t>>9)", "Bytebeat"), "");
        assert_eq!(check_code("return (t, sr) => Math.sin(t)", "Funcbeat"), "");
        let err = check_code("t +", "Bytebeat");
        assert!(err.starts_with("compilation error"), "got: {err}");
    }

    #[test]
    fn test_version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }
}
