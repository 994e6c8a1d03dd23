//! Raster Renderer: draws serviced ticks onto a circular canvas.
//!
//! Logical time maps to columns as `x = t / 2^scale`, wrapped into the
//! canvas width. Each call draws only the segment since the previous call
//! into a scratch image and blits it, so the canvas acts as a ring buffer.
//! At `scale > 0` several ticks share a column; the trailing column is
//! remembered and replayed at the start of the next segment so partly
//! drawn columns continue seamlessly.

pub mod canvas;

use serde::{Deserialize, Serialize};

use crate::control::message::DrawEvent;
use crate::prelude::to_int32;

pub use canvas::{Canvas, HEIGHT, PixelBuffer};

/// Largest supported scale (2^20 ticks per column).
pub const MAX_SCALE: u32 = 20;
pub const DEFAULT_SCALE: u32 = 5;

/// Value written to the red component of an error stripe.
const ERROR_RED: u8 = 100;

// Paint layers, lowest first. A component only takes paint from an
// equal or higher layer.
const LAYER_NONE: u8 = 0;
const LAYER_ERROR: u8 = 1;
const LAYER_DIAGRAM: u8 = 2;
const LAYER_WAVEFORM: u8 = 3;
const LAYER_POINT: u8 = 4;

// ── Draw Mode & Palette ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawMode {
    /// One dot per channel per tick.
    Points,
    /// Dots joined by vertical lines.
    Waveform,
    /// Amplitude shown as color intensity in a band per sub-column tick.
    Diagram,
    /// Diagram underneath waveform.
    #[default]
    Combined,
}

impl DrawMode {
    pub fn name(self) -> &'static str {
        match self {
            DrawMode::Points => "Points",
            DrawMode::Waveform => "Waveform",
            DrawMode::Diagram => "Diagram",
            DrawMode::Combined => "Combined",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Points" => Some(DrawMode::Points),
            "Waveform" => Some(DrawMode::Waveform),
            "Diagram" => Some(DrawMode::Diagram),
            "Combined" => Some(DrawMode::Combined),
            _ => None,
        }
    }
}

/// Colors used by the scope. `channels[ch]` is the RGB component that
/// display channel `ch` paints into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub diagram: [u8; 3],
    pub waveform: [u8; 3],
    pub channels: [usize; 3],
}

impl Default for Palette {
    fn default() -> Self {
        Palette {
            diagram: [0x9e, 0xe0, 0xb2],
            waveform: [0xff, 0xff, 0xff],
            channels: stereo_channels(0),
        }
    }
}

/// Channel-to-component map for the stereo color setting:
/// 0 is red/green/blue, 2 is blue/red/green, anything else green/red/blue.
pub fn stereo_channels(setting: u8) -> [usize; 3] {
    match setting {
        0 => [0, 1, 2],
        2 => [2, 0, 1],
        _ => [1, 0, 2],
    }
}

// ── Scratch Segment ─────────────────────────────────────────

/// RGBA image for one segment plus the paint layer of every color
/// component.
struct Scratch {
    width: usize,
    rgba: Vec<u8>,
    layers: Vec<u8>,
}

impl Scratch {
    fn new(width: usize) -> Self {
        let mut rgba = vec![0; width * HEIGHT * 4];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Scratch {
            width,
            rgba,
            layers: vec![LAYER_NONE; width * HEIGHT * 3],
        }
    }

    fn paint(&mut self, x: usize, row: usize, component: usize, value: u8, layer: u8) {
        if x >= self.width || row >= HEIGHT {
            return;
        }
        let px = row * self.width + x;
        let slot = px * 3 + component;
        if layer >= self.layers[slot] {
            self.rgba[px * 4 + component] = value;
            self.layers[slot] = layer;
        }
    }

    /// Red stripe, only on pixels that carry no other color.
    fn mark_error(&mut self, x: usize, row: usize) {
        if x >= self.width || row >= HEIGHT {
            return;
        }
        let px = row * self.width + x;
        let idx = px * 4;
        if self.rgba[idx + 1] == 0 && self.rgba[idx + 2] == 0 && self.layers[px * 3] <= LAYER_ERROR {
            self.rgba[idx] = ERROR_RED;
            self.layers[px * 3] = LAYER_ERROR;
        }
    }

    fn column(&self, x: usize) -> Vec<[u8; 3]> {
        (0..HEIGHT)
            .map(|row| {
                let idx = (row * self.width + x) * 4;
                [self.rgba[idx], self.rgba[idx + 1], self.rgba[idx + 2]]
            })
            .collect()
    }

    /// Replay a saved column. Replayed colors sit on the waveform layer, so
    /// new diagram bands do not cover them.
    fn seed_column(&mut self, x: usize, colors: &[[u8; 3]]) {
        for (row, rgb) in colors.iter().enumerate().take(HEIGHT) {
            for (component, &value) in rgb.iter().enumerate() {
                if value != 0 {
                    self.paint(x, row, component, value, LAYER_WAVEFORM);
                }
            }
        }
    }
}

// ── Scope ───────────────────────────────────────────────────

/// Result of one [`Scope::draw`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawOutcome {
    /// Nothing buffered.
    Idle,
    /// The end time was not finite; the caller should reset logical time.
    ResetRequested,
    /// A segment was drawn. `cursor` is the end column as a fraction of
    /// the canvas width.
    Drawn { cursor: f64 },
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub draw_mode: DrawMode,
    pub palette: Palette,
    scale: u32,
    backlog: Vec<DrawEvent>,
    /// Trailing column of the last segment, one RGB per row.
    edge: Vec<[u8; 3]>,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            draw_mode: DrawMode::default(),
            palette: Palette::default(),
            scale: DEFAULT_SCALE,
            backlog: Vec::new(),
            edge: vec![[0; 3]; HEIGHT],
        }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Change the zoom. The caller clears the canvas; the saved edge no
    /// longer lines up so it is dropped here.
    pub fn set_scale(&mut self, scale: u32) {
        self.scale = scale.min(MAX_SCALE);
        self.forget_edge();
    }

    pub fn backlog(&self) -> &[DrawEvent] {
        &self.backlog
    }

    /// Queue events, keeping at most `width << scale` minus one.
    pub fn extend_backlog(&mut self, events: impl IntoIterator<Item = DrawEvent>, width: usize) {
        self.backlog.extend(events);
        let limit = (width << self.scale).saturating_sub(1);
        if self.backlog.len() > limit {
            let excess = self.backlog.len() - limit;
            self.backlog.drain(..excess);
        }
    }

    pub fn clear_backlog(&mut self) {
        self.backlog.clear();
    }

    pub fn forget_edge(&mut self) {
        self.edge.fill([0; 3]);
    }

    /// Whether the time cursor is useful: fewer than 2000 columns per
    /// second at `sample_rate`.
    pub fn time_cursor_enabled(&self, sample_rate: f64) -> bool {
        (to_int32(sample_rate) >> self.scale) < 2000
    }

    fn ticks_per_column(&self) -> f64 {
        (1u64 << self.scale) as f64
    }

    fn x_of(&self, t: f64) -> f64 {
        t / self.ticks_per_column()
    }

    /// `(first row, rows)` of the diagram band for tick `t`.
    fn diagram_band(&self, t: f64) -> (usize, usize) {
        let size = (HEIGHT >> self.scale).max(1);
        let phase = t.rem_euclid(self.ticks_per_column());
        (size * phase as usize, size)
    }

    /// Start column (wrapped) and unwrapped end column of a time range.
    fn span(&self, start_time: f64, end_time: f64, width: f64) -> (i64, i64) {
        let start_x = self.x_of(start_time).rem_euclid(width);
        let end_x = (start_x + self.x_of(end_time - start_time)).floor() as i64;
        (start_x.floor() as i64, end_x)
    }

    /// Draw everything buffered up to `end_time` and keep only a carry
    /// event for the next call.
    pub fn draw<C: Canvas + ?Sized>(&mut self, canvas: &mut C, end_time: f64, reverse: bool) -> DrawOutcome {
        if !end_time.is_finite() {
            return DrawOutcome::ResetRequested;
        }
        let Some(last) = self.backlog.last().copied() else {
            return DrawOutcome::Idle;
        };
        let width = canvas.width();
        if width == 0 {
            return DrawOutcome::Idle;
        }
        let w = width as i64;
        let wf = width as f64;

        let mut start_time = self.backlog[0].t;
        let (mut start_x, mut end_x) = self.span(start_time, end_time, wf);
        if (end_x - start_x).abs() + 1 > w {
            // Only the most recent canvas width of time is visible.
            let visible = wf * self.ticks_per_column();
            start_time = if reverse { end_time + visible } else { end_time - visible };
            (start_x, end_x) = self.span(start_time, end_time, wf);
        }
        let draw_width = ((end_x - start_x).abs() + 1) as usize;
        let start_x = start_x.min(end_x);

        let mut scratch = Scratch::new(draw_width);
        if self.scale > 0 {
            let x = if reverse { draw_width - 1 } else { 0 };
            scratch.seed_column(x, &self.edge);
        }

        let mode = self.draw_mode;
        let with_diagram = matches!(mode, DrawMode::Combined | DrawMode::Diagram);
        let with_waveform = matches!(mode, DrawMode::Combined | DrawMode::Waveform);
        let point_color = self.palette.waveform;
        let wave_color = if mode == DrawMode::Waveform {
            point_color.map(|c| (c as f64 * 0.6) as u8)
        } else {
            point_color
        };
        let channels = self.palette.channels;
        let column = |t: f64, round: fn(f64) -> f64| (round(self.x_of(t)) as i64 - start_x).rem_euclid(w);

        for (i, event) in self.backlog.iter().enumerate() {
            let in_window = if reverse {
                event.t <= start_time
            } else {
                event.t >= start_time
            };
            if !in_window {
                continue;
            }
            let prev = if i > 0 { self.backlog[i - 1].value } else { [None; 3] };
            let next_time = self.backlog.get(i + 1).map_or(end_time, |e| e.t);
            let (cur_x, next_x) = if reverse {
                (column(next_time + 1.0, f64::floor), column(event.t + 1.0, f64::ceil))
            } else {
                (column(event.t, f64::floor), column(next_time, f64::ceil))
            };
            let cols = || columns(cur_x, next_x, w);
            let (band_start, band_size) = self.diagram_band(event.t);

            if !with_diagram && event.value.iter().any(Option::is_none) {
                for x in cols() {
                    for row in 0..HEIGHT {
                        scratch.mark_error(x, row);
                    }
                }
            }

            for ch in (0..3).rev() {
                let component = channels[ch];
                let value = event.value[ch];
                if with_diagram {
                    let shade = value.map(|v| (v as f64 / 256.0 * self.palette.diagram[component] as f64) as u8);
                    for x in cols() {
                        for row in band_start..band_start + band_size {
                            match shade {
                                Some(c) => scratch.paint(x, row, component, c, LAYER_DIAGRAM),
                                None => scratch.mark_error(x, row),
                            }
                        }
                    }
                }
                let Some(v) = value else {
                    continue;
                };
                if mode == DrawMode::Diagram {
                    continue;
                }
                let row = HEIGHT - 1 - v as usize;
                for x in cols() {
                    scratch.paint(x, row, component, point_color[component], LAYER_POINT);
                }
                if with_waveform {
                    let Some(p) = prev[ch] else {
                        continue;
                    };
                    let x = (if reverse { column(event.t, f64::floor) } else { cur_x }) as usize;
                    let step: i32 = if p < v { 1 } else { -1 };
                    let mut y = p as i32;
                    while y != v as i32 {
                        scratch.paint(x, HEIGHT - 1 - y as usize, component, wave_color[component], LAYER_WAVEFORM);
                        y += step;
                    }
                }
            }
        }

        if self.scale > 0 {
            let x = if reverse { 0 } else { draw_width - 1 };
            self.edge = scratch.column(x);
        }

        canvas.put_image(&scratch.rgba, draw_width, start_x);
        if end_x >= w {
            canvas.put_image(&scratch.rgba, draw_width, start_x - w);
        } else if end_x <= 0 {
            canvas.put_image(&scratch.rgba, draw_width, start_x + w);
        }

        self.backlog.clear();
        self.backlog.push(DrawEvent {
            t: end_time,
            value: last.value,
        });
        DrawOutcome::Drawn {
            cursor: end_x.rem_euclid(w) as f64 / wf,
        }
    }
}

/// Columns from `from` up to, not including, `to`, wrapping at `width`.
fn columns(from: i64, to: i64, width: i64) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(from), move |&x| Some((x + 1).rem_euclid(width)))
        .take_while(move |&x| x != to)
        .map(|x| x as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn event(t: f64, v: u8) -> DrawEvent {
        DrawEvent {
            t,
            value: [Some(v); 3],
        }
    }

    fn scope(mode: DrawMode, scale: u32) -> Scope {
        let mut scope = Scope::new();
        scope.draw_mode = mode;
        scope.set_scale(scale);
        scope
    }

    fn row(v: u8) -> usize {
        255 - v as usize
    }

    #[test]
    fn test_split_draw_matches_single_draw_at_scale_zero() {
        let events: Vec<DrawEvent> = (0..10)
            .map(|i| DrawEvent {
                t: i as f64,
                value: [Some(20 + 10 * i as u8), Some(100 - 5 * i as u8), Some(200)],
            })
            .collect();

        let mut whole = scope(DrawMode::Combined, 0);
        let mut canvas_a = PixelBuffer::new(16);
        whole.extend_backlog(events.clone(), 16);
        whole.draw(&mut canvas_a, 10.0, false);

        let mut split = scope(DrawMode::Combined, 0);
        let mut canvas_b = PixelBuffer::new(16);
        split.extend_backlog(events[..5].to_vec(), 16);
        split.draw(&mut canvas_b, 5.0, false);
        split.extend_backlog(events[5..].to_vec(), 16);
        split.draw(&mut canvas_b, 10.0, false);

        assert!(canvas_a == canvas_b, "split rendering differs");
        assert_eq!(whole.backlog(), split.backlog());
    }

    #[test]
    fn test_diagram_band_follows_tick_phase() {
        let mut scope = scope(DrawMode::Diagram, 2);
        assert_eq!(scope.diagram_band(6.0), (128, 64));
        assert_eq!(scope.diagram_band(-3.0), (64, 64));

        let mut canvas = PixelBuffer::new(64);
        scope.extend_backlog([event(6.0, 128)], 64);
        scope.draw(&mut canvas, 7.0, false);
        assert_eq!(canvas.pixel(1, 128), [79, 112, 89, 255]);
        assert_eq!(canvas.pixel(1, 191), [79, 112, 89, 255]);
        assert_eq!(canvas.pixel(1, 127), BLACK);
        assert_eq!(canvas.pixel(1, 192), BLACK);
        assert_eq!(canvas.pixel(0, 128), [0; 4]);
    }

    #[test]
    fn test_band_size_bottoms_out_at_one_row() {
        let scope = scope(DrawMode::Diagram, 12);
        assert_eq!(scope.diagram_band(4097.0), (1, 1));
    }

    #[test]
    fn test_points_win_over_waveform_and_diagram() {
        let mut scope = scope(DrawMode::Combined, 1);
        let mut canvas = PixelBuffer::new(32);
        scope.extend_backlog([event(0.0, 50), event(1.0, 60)], 32);
        scope.draw(&mut canvas, 2.0, false);

        // Tick 1's diagram band covers rows 128..256 of the shared column.
        assert_eq!(canvas.pixel(0, row(50)), WHITE);
        assert_eq!(canvas.pixel(0, row(60)), WHITE);
        assert_eq!(canvas.pixel(0, row(55)), WHITE);
        assert_eq!(canvas.pixel(0, 250), [37, 52, 41, 255]);
        assert_eq!(canvas.pixel(0, 10), [30, 43, 34, 255]);
    }

    #[test]
    fn test_wrapped_segment_is_blitted_twice() {
        let mut scope = scope(DrawMode::Points, 0);
        let mut canvas = PixelBuffer::new(8);
        scope.extend_backlog((6..10).map(|t| event(t as f64, 10 * t as u8)), 8);
        let outcome = scope.draw(&mut canvas, 10.0, false);

        assert_eq!(outcome, DrawOutcome::Drawn { cursor: 0.25 });
        assert_eq!(canvas.pixel(6, row(60)), WHITE);
        assert_eq!(canvas.pixel(7, row(70)), WHITE);
        assert_eq!(canvas.pixel(0, row(80)), WHITE);
        assert_eq!(canvas.pixel(1, row(90)), WHITE);
        assert_eq!(canvas.pixel(2, 0), BLACK);
        assert_eq!(canvas.pixel(3, 0), [0; 4]);
        assert_eq!(scope.backlog(), &[event(10.0, 90)]);
    }

    #[test]
    fn test_edge_memory_continues_partial_column() {
        let mut scope = scope(DrawMode::Waveform, 1);
        let mut canvas = PixelBuffer::new(32);
        scope.extend_backlog([event(0.0, 10), event(1.0, 10), event(2.0, 50)], 32);
        scope.draw(&mut canvas, 3.0, false);
        assert_eq!(canvas.pixel(1, row(25)), [153, 153, 153, 255]);

        // The next segment starts mid-column 1 and redraws it.
        scope.extend_backlog([event(3.0, 50)], 32);
        scope.draw(&mut canvas, 4.0, false);
        assert_eq!(canvas.pixel(1, row(25)), [153, 153, 153, 255]);
        assert_eq!(canvas.pixel(1, row(50)), WHITE);
        assert_eq!(canvas.pixel(2, row(25)), BLACK);
    }

    #[test]
    fn test_missing_channel_draws_error_stripe() {
        let mut scope = scope(DrawMode::Points, 0);
        let mut canvas = PixelBuffer::new(8);
        scope.extend_backlog(
            [DrawEvent {
                t: 0.0,
                value: [Some(100), None, Some(100)],
            }],
            8,
        );
        scope.draw(&mut canvas, 1.0, false);
        assert_eq!(canvas.pixel(0, 10), [100, 0, 0, 255]);
        assert_eq!(canvas.pixel(0, row(100)), [255, 0, 255, 255]);
    }

    #[test]
    fn test_reverse_draws_the_same_columns() {
        let mut scope = scope(DrawMode::Points, 0);
        let mut canvas = PixelBuffer::new(16);
        scope.extend_backlog((0..4).rev().map(|t| event(t as f64 + 4.0, 30 + t as u8)), 16);
        scope.draw(&mut canvas, 3.0, true);
        for t in 0..4u8 {
            assert_eq!(canvas.pixel(4 + t as usize, row(30 + t)), WHITE, "tick {}", t + 4);
        }
    }

    #[test]
    fn test_non_finite_end_requests_reset() {
        let mut scope = scope(DrawMode::Points, 0);
        let mut canvas = PixelBuffer::new(8);
        scope.extend_backlog([event(0.0, 1)], 8);
        assert_eq!(scope.draw(&mut canvas, f64::NAN, false), DrawOutcome::ResetRequested);
        assert_eq!(scope.backlog().len(), 1);
        scope.clear_backlog();
        assert_eq!(scope.draw(&mut canvas, 1.0, false), DrawOutcome::Idle);
    }

    #[test]
    fn test_backlog_is_capped() {
        let mut scope = scope(DrawMode::Points, 1);
        scope.extend_backlog((0..10).map(|t| event(t as f64, 0)), 4);
        assert_eq!(scope.backlog().len(), 7);
        assert_eq!(scope.backlog()[0].t, 3.0);
    }

    #[test]
    fn test_time_cursor_threshold() {
        let scope = scope(DrawMode::Points, 2);
        assert!(scope.time_cursor_enabled(7999.0));
        assert!(!scope.time_cursor_enabled(8000.0));
        assert_eq!(stereo_channels(2), [2, 0, 1]);
        assert_eq!(stereo_channels(1), [1, 0, 2]);
    }
}
