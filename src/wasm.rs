//! AudioWorklet bindings. The worklet owns a [`WorkletProcessor`], feeds it
//! `port.onmessage` payloads and posts whatever `take_telemetry` returns.

use wasm_bindgen::prelude::*;

use crate::control::message::ControlMessage;
use crate::dsp::engine::Engine;

#[wasm_bindgen]
pub struct WorkletProcessor {
    engine: Engine,
}

#[wasm_bindgen]
impl WorkletProcessor {
    /// `host_sample_rate` is the AudioContext's rate.
    #[wasm_bindgen(constructor)]
    pub fn new(host_sample_rate: f64) -> WorkletProcessor {
        WorkletProcessor {
            engine: Engine::new(host_sample_rate),
        }
    }

    /// Apply a control message object.
    pub fn receive(&mut self, data: JsValue) -> Result<(), JsValue> {
        let msg: ControlMessage =
            serde_wasm_bindgen::from_value(data).map_err(|e| JsValue::from_str(&format!("{e}")))?;
        self.engine.apply(msg);
        Ok(())
    }

    /// Fill one render quantum. Microphone channels may be empty.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], input_left: &[f32], input_right: &[f32]) -> bool {
        let inputs: Vec<&[f32]> = [input_left, input_right]
            .into_iter()
            .filter(|ch| !ch.is_empty())
            .collect();
        self.engine.process(&inputs, left, right)
    }

    /// Pending telemetry as an array of plain objects.
    pub fn take_telemetry(&mut self) -> Result<JsValue, JsValue> {
        let telemetry = self.engine.take_telemetry();
        serde_wasm_bindgen::to_value(&telemetry).map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    #[wasm_bindgen(getter)]
    pub fn byte_sample(&self) -> f64 {
        self.engine.byte_sample()
    }
}
