// Window + software drawing for the overlay view.
// Visual effects provided here:
// 1) A window that shows the live camera image, sized to the model's mask.
// 2) The purple overlay blended on top of it.
// 3) A tiny 5x7 bitmap font for the HUD line (mode + FPS).

use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use minifb::{Key, Window, WindowOptions};

use crate::error::{Error, Result};
use crate::gamma::GammaLut;
use crate::types::{Frame, FrameBuffer, OverlayBuffer};

/// The drawing surface at the end of the loop.
pub trait Presenter {
    /// Show `frame` with `overlay` on top. With an overlay the surface takes
    /// the overlay's size; without one it takes the frame's.
    fn present(&mut self, frame: &Frame, overlay: Option<&OverlayBuffer>) -> Result<()>;

    /// Show the last surface again without a new frame. Keeps window events
    /// (close, ESC) flowing while the camera has nothing to give.
    fn refresh(&mut self) -> Result<()>;

    /// False once the user wants out (window closed, ESC).
    fn is_open(&self) -> bool;
}

/// Scale `frame` to `width` x `height` and pack it into `screen` as 0x00RRGGBB.
/// `screen` is resized (and cleared) if its dimensions differ.
pub fn frame_to_screen(frame: &Frame, width: u32, height: u32, screen: &mut FrameBuffer) {
    let (w, h) = (width as usize, height as usize);
    if screen.width != w || screen.height != h {
        *screen = FrameBuffer::new(w, h);
    }
    if w == 0 || h == 0 {
        return;
    }

    let resized;
    let src = if frame.dimensions() == (width, height) {
        frame
    } else {
        resized = imageops::resize(frame, width, height, FilterType::Triangle);
        &resized
    };

    for (dst, pixel) in screen.pixels.iter_mut().zip(src.pixels()) {
        // Each `pixel` is Rgb<u8>. We pack it as 0x00RRGGBB.
        let r = pixel[0] as u32;
        let g = pixel[1] as u32;
        let b = pixel[2] as u32;
        *dst = (r << 16) | (g << 8) | b;
    }
}

/// Blend the RGBA overlay onto the screen in linear light.
/// Visual: alpha 0 keeps the camera pixel, 255 paints solid purple.
pub fn blend_overlay_in_place(screen: &mut FrameBuffer, overlay: &OverlayBuffer, lut: &GammaLut) -> Result<()> {
    if screen.width != overlay.width() as usize || screen.height != overlay.height() as usize {
        return Err(Error::WindowUpdate(format!(
            "blend: overlay is {}x{}, surface is {}x{}",
            overlay.width(),
            overlay.height(),
            screen.width,
            screen.height
        )));
    }

    for (dst, over) in screen.pixels.iter_mut().zip(overlay.pixels()) {
        let [or, og, ob, oa] = over.0;
        if oa == 0 {
            continue; // visual: raw camera pixel
        }
        let a = oa as f32 / 255.0;
        let p = *dst;
        let r = lut.mix(((p >> 16) & 0xFF) as u8, or, a) as u32;
        let g = lut.mix(((p >> 8) & 0xFF) as u8, og, a) as u32;
        let b = lut.mix((p & 0xFF) as u8, ob, a) as u32;
        *dst = (r << 16) | (g << 8) | b;
    }
    Ok(())
}

/// minifb-backed presenter.
pub struct WindowPresenter {
    window: Window,
    screen: FrameBuffer,
    lut: GammaLut,
    label: String,
    // FPS counter, refreshed once per second
    last_fps_time: Instant,
    frames_this_second: u32,
    hud_fps_text: String,
}

impl WindowPresenter {
    /// Create a window sized to the camera feed.
    /// Visual: a new empty window appears with your chosen title.
    pub fn new(title: &str, width: usize, height: usize, label: &str) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions { resize: true, ..WindowOptions::default() },
        )
        .map_err(|e| Error::WindowInit(e.to_string()))?;
        Ok(Self {
            window,
            screen: FrameBuffer::new(width, height),
            lut: GammaLut::new(),
            label: label.to_uppercase(),
            last_fps_time: Instant::now(),
            frames_this_second: 0,
            hud_fps_text: String::from("FPS: 0.0"),
        })
    }

    fn tick_fps(&mut self) {
        self.frames_this_second += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_time);
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames_this_second as f32 / elapsed.as_secs_f32();
            log::debug!("FPS: {:.1}", fps);
            self.hud_fps_text = format!("FPS: {:.1}", fps);
            self.frames_this_second = 0;
            self.last_fps_time = now;
        }
    }
}

impl Presenter for WindowPresenter {
    /// Push this frame's pixels to the window.
    /// Visual: the window shows the camera with the latest overlay on top.
    fn present(&mut self, frame: &Frame, overlay: Option<&OverlayBuffer>) -> Result<()> {
        let (w, h) = overlay.map(|o| o.dimensions()).unwrap_or_else(|| frame.dimensions());
        frame_to_screen(frame, w, h, &mut self.screen);
        if let Some(overlay) = overlay {
            blend_overlay_in_place(&mut self.screen, overlay, &self.lut)?;
        }

        self.tick_fps();
        let hud = format!("{} | {}", self.label, self.hud_fps_text);
        draw_text_5x7(&mut self.screen, 4, 4, &hud, 0x00_FF_FF_FF);

        // minifb stretches the buffer to the window, so a mask-sized surface is fine.
        self.window
            .update_with_buffer(&self.screen.pixels, self.screen.width, self.screen.height)
            .map_err(|e| Error::WindowUpdate(e.to_string()))
    }

    /// Visual: the picture freezes on the last frame but the window stays responsive.
    fn refresh(&mut self) -> Result<()> {
        if self.screen.pixels.is_empty() {
            self.window.update();
            return Ok(());
        }
        self.window
            .update_with_buffer(&self.screen.pixels, self.screen.width, self.screen.height)
            .map_err(|e| Error::WindowUpdate(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }
}

/* ---------- Software drawing: pixels and a tiny bitmap font ---------- */

/// Put a pixel on the framebuffer if (x,y) is inside bounds.
#[inline]
fn put_pixel(fb: &mut FrameBuffer, x: i32, y: i32, color: u32) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as usize, y as usize);
    if x >= fb.width || y >= fb.height {
        return;
    }
    let idx = y * fb.width + x;
    fb.pixels[idx] = color;
}

/// Return a 5x7 glyph bitmap for the characters the HUD uses.
/// Each u8 is a row; the low 5 bits are the pixels (bit 4 = leftmost).
fn glyph5x7(ch: char) -> Option<[u8; 7]> {
    macro_rules! g { ($a:expr,$b:expr,$c:expr,$d:expr,$e:expr,$f:expr,$g:expr) => {
        Some([$a,$b,$c,$d,$e,$f,$g])
    }; }

    match ch.to_ascii_uppercase() {
        '0' => g!(0b01110,0b10001,0b10011,0b10101,0b11001,0b10001,0b01110),
        '1' => g!(0b00100,0b01100,0b00100,0b00100,0b00100,0b00100,0b01110),
        '2' => g!(0b01110,0b10001,0b00001,0b00010,0b00100,0b01000,0b11111),
        '3' => g!(0b11110,0b00001,0b00001,0b01110,0b00001,0b00001,0b11110),
        '4' => g!(0b00010,0b00110,0b01010,0b10010,0b11111,0b00010,0b00010),
        '5' => g!(0b11111,0b10000,0b11110,0b00001,0b00001,0b10001,0b01110),
        '6' => g!(0b00110,0b01000,0b10000,0b11110,0b10001,0b10001,0b01110),
        '7' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b01000,0b01000),
        '8' => g!(0b01110,0b10001,0b10001,0b01110,0b10001,0b10001,0b01110),
        '9' => g!(0b01110,0b10001,0b10001,0b01111,0b00001,0b00010,0b01100),

        // Letters for FACE / HAIR / FPS
        'A' => g!(0b01110,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'C' => g!(0b01110,0b10001,0b10000,0b10000,0b10000,0b10001,0b01110),
        'E' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b11111),
        'F' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b10000),
        'H' => g!(0b10001,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'I' => g!(0b01110,0b00100,0b00100,0b00100,0b00100,0b00100,0b01110),
        'P' => g!(0b11110,0b10001,0b10001,0b11110,0b10000,0b10000,0b10000),
        'R' => g!(0b11110,0b10001,0b10001,0b11110,0b10100,0b10010,0b10001),
        'S' => g!(0b01111,0b10000,0b10000,0b01110,0b00001,0b00001,0b11110),

        ' ' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00000,0b00000),
        '|' => g!(0b00100,0b00100,0b00100,0b00100,0b00100,0b00100,0b00100),
        ':' => g!(0b00000,0b00100,0b00000,0b00000,0b00100,0b00000,0b00000),
        '.' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00100,0b00000),

        _ => None,
    }
}

/// Draw a single 5x7 character at (x,y), with a 1-pixel black shadow for contrast.
fn draw_char_5x7(fb: &mut FrameBuffer, x: i32, y: i32, ch: char, color: u32) {
    if let Some(rows) = glyph5x7(ch) {
        for (offset, c) in [(1, 0x00000000), (0, color)] {
            for (ry, rowbits) in rows.iter().enumerate() {
                for rx in 0..5 {
                    if (rowbits & (1 << (4 - rx))) != 0 {
                        put_pixel(fb, x + rx + offset, y + ry as i32 + offset, c);
                    }
                }
            }
        }
    }
}

/// Draw a text string using 5x7 glyphs; unknown characters leave a gap.
pub fn draw_text_5x7(fb: &mut FrameBuffer, mut x: i32, y: i32, text: &str, color: u32) {
    for ch in text.chars() {
        draw_char_5x7(fb, x, y, ch, color);
        x += 6; // 5 pixels glyph width + 1 pixel spacing
    }
}
