//! WAV renderer: runs a program offline through the synthesis loop.

use std::fmt;
use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::compiler;
use crate::config::sanitize_sample_rate;
use crate::error::CompileError;

use super::engine::Engine;
use super::quantizer::PlaybackMode;

/// Frames per block, matching a browser audio worklet quantum.
pub const BLOCK_SIZE: usize = 128;

/// Longest render accepted, in seconds.
pub const MAX_RENDER_SECONDS: f64 = 600.0;

#[derive(Debug)]
pub enum RenderError {
    /// Duration negative, not finite, or above [`MAX_RENDER_SECONDS`].
    Duration(f64),
    Compile(CompileError),
    Wav(hound::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Duration(s) => {
                write!(f, "render length {s} s outside 0..={MAX_RENDER_SECONDS} s")
            }
            RenderError::Compile(e) => write!(f, "{e}"),
            RenderError::Wav(e) => write!(f, "WAV encoding failed: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<CompileError> for RenderError {
    fn from(e: CompileError) -> Self {
        RenderError::Compile(e)
    }
}

impl From<hound::Error> for RenderError {
    fn from(e: hound::Error) -> Self {
        RenderError::Wav(e)
    }
}

/// Render `seconds` of `code` at its own sample rate into 16-bit stereo
/// WAV bytes. Every output frame is one logical tick. `seconds` must lie
/// in `0..=MAX_RENDER_SECONDS`.
pub fn render_wav(
    code: &str,
    mode: PlaybackMode,
    sample_rate: f64,
    seconds: f64,
) -> Result<Vec<u8>, RenderError> {
    if !(0.0..=MAX_RENDER_SECONDS).contains(&seconds) {
        return Err(RenderError::Duration(seconds));
    }
    let sample_rate = sanitize_sample_rate(sample_rate);
    let func = compiler::compile(code, mode.convention(), sample_rate)?;

    let mut engine = Engine::new(sample_rate);
    engine.set_mode(Some(mode));
    engine.install(func);
    engine.set_playing(true);

    let frames = (seconds * sample_rate).round() as usize;
    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + frames * 4));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        let mut left = [0.0f32; BLOCK_SIZE];
        let mut right = [0.0f32; BLOCK_SIZE];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(BLOCK_SIZE);
            engine.process(&[], &mut left[..n], &mut right[..n]);
            // Nobody is watching the scope offline.
            engine.take_telemetry();
            for i in 0..n {
                writer.write_sample(to_pcm(left[i]))?;
                writer.write_sample(to_pcm(right[i]))?;
            }
            remaining -= n;
        }
        writer.finalize()?;
    }
    log::info!("rendered {frames} frames of {} at {sample_rate} Hz", mode.name());
    Ok(cursor.into_inner())
}

fn to_pcm(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
