//! Thread-safe bridge between the control surface and the synthesis loop.
//!
//! - **UI thread** owns [`SurfaceHandle`] with the [`Surface`]
//! - **Audio thread** owns [`EngineHandle`] with the [`Engine`]
//! - [`ControlMessage`]s flow one way and [`Telemetry`] the other, each over
//!   its own MPSC channel, so every message is applied whole and in order.
//!
//! ```ignore
//! let (mut ui, mut audio) = create_bridge(Surface::new(48000.0, settings), Engine::new(48000.0));
//!
//! // UI thread
//! ui.surface_mut().load_song(song, true);
//! ui.flush();
//!
//! // Audio thread, once per block
//! audio.process_commands();
//! audio.process(&inputs, &mut left, &mut right);
//! ```

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use log::trace;

use crate::dsp::engine::Engine;
use crate::scope::Canvas;

use super::message::{ControlMessage, Telemetry};
use super::surface::Surface;

/// UI-side endpoint.
pub struct SurfaceHandle {
    surface: Surface,
    command_tx: Sender<ControlMessage>,
    telemetry_rx: Receiver<Telemetry>,
}

/// Audio-side endpoint; owns the engine.
pub struct EngineHandle {
    engine: Engine,
    command_rx: Receiver<ControlMessage>,
    telemetry_tx: Sender<Telemetry>,
}

/// Create a linked pair of handles.
pub fn create_bridge(surface: Surface, engine: Engine) -> (SurfaceHandle, EngineHandle) {
    let (command_tx, command_rx) = mpsc::channel();
    let (telemetry_tx, telemetry_rx) = mpsc::channel();
    (
        SurfaceHandle {
            surface,
            command_tx,
            telemetry_rx,
        },
        EngineHandle {
            engine,
            command_rx,
            telemetry_tx,
        },
    )
}

// ── SurfaceHandle ───────────────────────────────────────────

impl SurfaceHandle {
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    /// Send every message the surface has queued.
    pub fn flush(&mut self) {
        for msg in self.surface.take_outgoing() {
            if msg.is_empty() {
                continue;
            }
            let _ = self.command_tx.send(msg);
        }
    }

    /// Fold all pending telemetry into the surface. Returns how many
    /// events were received.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.telemetry_rx.try_recv() {
                Ok(telemetry) => {
                    self.surface.receive(telemetry);
                    count += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        count
    }

    /// Animation loop: exchange messages and draw until playback stops or
    /// `wait_frame` returns `false`.
    pub fn run_animation<C: Canvas + ?Sized>(&mut self, canvas: &mut C, mut wait_frame: impl FnMut() -> bool) {
        loop {
            self.flush();
            if !wait_frame() {
                break;
            }
            self.poll();
            if !self.surface.animation_frame(canvas) {
                break;
            }
        }
        self.flush();
    }
}

// ── EngineHandle ────────────────────────────────────────────

impl EngineHandle {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Apply every queued message in arrival order.
    pub fn process_commands(&mut self) {
        while let Ok(msg) = self.command_rx.try_recv() {
            trace!("applying {msg:?}");
            self.engine.apply(msg);
        }
        self.forward_telemetry();
    }

    /// Render one block and forward what it produced.
    pub fn process(&mut self, inputs: &[&[f32]], left: &mut [f32], right: &mut [f32]) -> bool {
        let alive = self.engine.process(inputs, left, right);
        self.forward_telemetry();
        alive
    }

    fn forward_telemetry(&mut self) {
        for telemetry in self.engine.take_telemetry() {
            let _ = self.telemetry_tx.send(telemetry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::control::surface::Song;
    use crate::dsp::quantizer::PlaybackMode;
    use crate::scope::PixelBuffer;

    fn bridge() -> (SurfaceHandle, EngineHandle) {
        create_bridge(Surface::new(8000.0, Settings::default()), Engine::new(8000.0))
    }

    #[test]
    fn test_load_and_play_through_channels() {
        let (mut ui, mut audio) = bridge();
        ui.surface_mut()
            .load_song(Song::new("t", PlaybackMode::Bytebeat, 8000.0), true);
        ui.flush();
        audio.process_commands();
        assert!(audio.engine().is_playing());
        assert_eq!(audio.engine().sample_ratio(), 1.0);

        let mut left = [0.0f32; 4];
        let mut right = [0.0f32; 4];
        audio.process(&[], &mut left, &mut right);
        assert_eq!(left[1], (1.0 / 127.5 - 1.0) as f32);

        ui.poll();
        assert_eq!(ui.surface().byte_sample(), 4.0);
        assert_eq!(ui.surface().scope().backlog().len(), 4);
    }

    #[test]
    fn test_compile_error_round_trip() {
        let (mut ui, mut audio) = bridge();
        ui.surface_mut()
            .load_song(Song::new("t +", PlaybackMode::Bytebeat, 8000.0), false);
        ui.flush();
        audio.process_commands();
        assert!(ui.poll() > 0);
        assert!(!ui.surface().error_message().is_empty());

        // The surface acknowledges the error so the next one is shown too.
        ui.flush();
        audio.process_commands();
        ui.surface_mut().set_code("t");
        ui.flush();
        audio.process_commands();
        ui.poll();
        assert_eq!(ui.surface().error_message(), "");
        assert_eq!(audio.engine().function_source(), Some("t"));
    }

    #[test]
    fn test_messages_cross_threads_in_order() {
        let (mut ui, mut audio) = bridge();
        for code in ["t", "t*2", "t*3"] {
            ui.surface_mut().set_code(code);
        }
        ui.flush();
        let handle = std::thread::spawn(move || {
            audio.process_commands();
            audio.engine().function_source().map(str::to_string)
        });
        assert_eq!(handle.join().unwrap().as_deref(), Some("t*3"));
    }

    #[test]
    fn test_animation_stops_with_playback() {
        let (mut ui, mut audio) = bridge();
        ui.surface_mut()
            .load_song(Song::new("t", PlaybackMode::Bytebeat, 8000.0), true);
        let mut canvas = PixelBuffer::new(64);
        let mut frames = 0;
        ui.run_animation(&mut canvas, || {
            audio.process_commands();
            let mut left = [0.0f32; 32];
            let mut right = [0.0f32; 32];
            audio.process(&[], &mut left, &mut right);
            frames += 1;
            frames < 5
        });
        assert_eq!(frames, 5);
    }
}
