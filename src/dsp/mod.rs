//! DSP: the per-tick synthesis loop and its quantizers.
//!
//! The same engine runs inside the browser's AudioWorklet (via WASM) and
//! in the offline WAV renderer.

pub mod engine;
pub mod quantizer;
pub mod renderer;
