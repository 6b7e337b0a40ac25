//! Text rendering onto RGB images.
//!
//! A TrueType/OpenType face is preferred; the built-in 5x8 bitmap face is
//! always available and is used whenever the preferred face cannot be loaded.

use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use std::path::Path;

/// Columns per bitmap glyph; each byte is one column, bit 0 at the top.
const BITMAP_COLUMNS: usize = 5;
const BITMAP_ROWS: u32 = 8;
/// Glyph columns plus one column of spacing.
const BITMAP_ADVANCE: u32 = 6;
const BITMAP_FIRST: u32 = 0x20;

/// Classic 5x8 LCD glyphs for printable ASCII (0x20..=0x7E).
#[rustfmt::skip]
const BITMAP_GLYPHS: [[u8; BITMAP_COLUMNS]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5F, 0x00, 0x00], // !
    [0x00, 0x07, 0x00, 0x07, 0x00], // "
    [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
    [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
    [0x23, 0x13, 0x08, 0x64, 0x62], // %
    [0x36, 0x49, 0x56, 0x20, 0x50], // &
    [0x00, 0x08, 0x07, 0x03, 0x00], // '
    [0x00, 0x1C, 0x22, 0x41, 0x00], // (
    [0x00, 0x41, 0x22, 0x1C, 0x00], // )
    [0x2A, 0x1C, 0x7F, 0x1C, 0x2A], // *
    [0x08, 0x08, 0x3E, 0x08, 0x08], // +
    [0x00, 0x80, 0x70, 0x30, 0x00], // ,
    [0x08, 0x08, 0x08, 0x08, 0x08], // -
    [0x00, 0x00, 0x60, 0x60, 0x00], // .
    [0x20, 0x10, 0x08, 0x04, 0x02], // /
    [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
    [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
    [0x72, 0x49, 0x49, 0x49, 0x46], // 2
    [0x21, 0x41, 0x49, 0x4D, 0x33], // 3
    [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
    [0x27, 0x45, 0x45, 0x45, 0x39], // 5
    [0x3C, 0x4A, 0x49, 0x49, 0x31], // 6
    [0x41, 0x21, 0x11, 0x09, 0x07], // 7
    [0x36, 0x49, 0x49, 0x49, 0x36], // 8
    [0x46, 0x49, 0x49, 0x29, 0x1E], // 9
    [0x00, 0x00, 0x14, 0x00, 0x00], // :
    [0x00, 0x40, 0x34, 0x00, 0x00], // ;
    [0x00, 0x08, 0x14, 0x22, 0x41], // <
    [0x14, 0x14, 0x14, 0x14, 0x14], // =
    [0x00, 0x41, 0x22, 0x14, 0x08], // >
    [0x02, 0x01, 0x59, 0x09, 0x06], // ?
    [0x3E, 0x41, 0x5D, 0x59, 0x4E], // @
    [0x7C, 0x12, 0x11, 0x12, 0x7C], // A
    [0x7F, 0x49, 0x49, 0x49, 0x36], // B
    [0x3E, 0x41, 0x41, 0x41, 0x22], // C
    [0x7F, 0x41, 0x41, 0x41, 0x3E], // D
    [0x7F, 0x49, 0x49, 0x49, 0x41], // E
    [0x7F, 0x09, 0x09, 0x09, 0x01], // F
    [0x3E, 0x41, 0x41, 0x51, 0x73], // G
    [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
    [0x00, 0x41, 0x7F, 0x41, 0x00], // I
    [0x20, 0x40, 0x41, 0x3F, 0x01], // J
    [0x7F, 0x08, 0x14, 0x22, 0x41], // K
    [0x7F, 0x40, 0x40, 0x40, 0x40], // L
    [0x7F, 0x02, 0x1C, 0x02, 0x7F], // M
    [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
    [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
    [0x7F, 0x09, 0x09, 0x09, 0x06], // P
    [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
    [0x7F, 0x09, 0x19, 0x29, 0x46], // R
    [0x26, 0x49, 0x49, 0x49, 0x32], // S
    [0x03, 0x01, 0x7F, 0x01, 0x03], // T
    [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
    [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
    [0x3F, 0x40, 0x38, 0x40, 0x3F], // W
    [0x63, 0x14, 0x08, 0x14, 0x63], // X
    [0x03, 0x04, 0x78, 0x04, 0x03], // Y
    [0x61, 0x59, 0x49, 0x4D, 0x43], // Z
    [0x00, 0x7F, 0x41, 0x41, 0x41], // [
    [0x02, 0x04, 0x08, 0x10, 0x20], // backslash
    [0x00, 0x41, 0x41, 0x41, 0x7F], // ]
    [0x04, 0x02, 0x01, 0x02, 0x04], // ^
    [0x40, 0x40, 0x40, 0x40, 0x40], // _
    [0x00, 0x03, 0x07, 0x08, 0x00], // `
    [0x20, 0x54, 0x54, 0x78, 0x40], // a
    [0x7F, 0x28, 0x44, 0x44, 0x38], // b
    [0x38, 0x44, 0x44, 0x44, 0x28], // c
    [0x38, 0x44, 0x44, 0x28, 0x7F], // d
    [0x38, 0x54, 0x54, 0x54, 0x18], // e
    [0x00, 0x08, 0x7E, 0x09, 0x02], // f
    [0x18, 0xA4, 0xA4, 0x9C, 0x78], // g
    [0x7F, 0x08, 0x04, 0x04, 0x78], // h
    [0x00, 0x44, 0x7D, 0x40, 0x00], // i
    [0x20, 0x40, 0x40, 0x3D, 0x00], // j
    [0x7F, 0x10, 0x28, 0x44, 0x00], // k
    [0x00, 0x41, 0x7F, 0x40, 0x00], // l
    [0x7C, 0x04, 0x78, 0x04, 0x78], // m
    [0x7C, 0x08, 0x04, 0x04, 0x78], // n
    [0x38, 0x44, 0x44, 0x44, 0x38], // o
    [0xFC, 0x18, 0x24, 0x24, 0x18], // p
    [0x18, 0x24, 0x24, 0x18, 0xFC], // q
    [0x7C, 0x08, 0x04, 0x04, 0x08], // r
    [0x48, 0x54, 0x54, 0x54, 0x24], // s
    [0x04, 0x04, 0x3F, 0x44, 0x24], // t
    [0x3C, 0x40, 0x40, 0x20, 0x7C], // u
    [0x1C, 0x20, 0x40, 0x20, 0x1C], // v
    [0x3C, 0x40, 0x30, 0x40, 0x3C], // w
    [0x44, 0x28, 0x10, 0x28, 0x44], // x
    [0x4C, 0x90, 0x90, 0x90, 0x7C], // y
    [0x44, 0x64, 0x54, 0x4C, 0x44], // z
    [0x00, 0x08, 0x36, 0x41, 0x00], // {
    [0x00, 0x00, 0x77, 0x00, 0x00], // |
    [0x00, 0x41, 0x36, 0x08, 0x00], // }
    [0x02, 0x01, 0x02, 0x04, 0x02], // ~
];

fn bitmap_glyph(ch: char) -> &'static [u8; BITMAP_COLUMNS] {
    let code = ch as u32;
    let idx = if (BITMAP_FIRST..BITMAP_FIRST + BITMAP_GLYPHS.len() as u32).contains(&code) {
        code - BITMAP_FIRST
    } else {
        '?' as u32 - BITMAP_FIRST
    };
    &BITMAP_GLYPHS[idx as usize]
}

/// A face used to draw annotation text.
pub enum Typeface {
    /// Scalable font loaded from disk.
    Outline { font: FontVec, scale: PxScale },
    /// Built-in bitmap font, each glyph pixel drawn as a `scale`×`scale` block.
    Bitmap { scale: u32 },
}

impl Typeface {
    /// The built-in face.
    pub fn builtin() -> Self {
        Typeface::Bitmap { scale: 2 }
    }

    /// Load the preferred face from `path`, falling back to [`Typeface::builtin`].
    ///
    /// Never fails: a missing, unreadable or unconfigured font only produces
    /// a warning.
    pub fn load_or_builtin(path: Option<&Path>, size_px: f32) -> Self {
        let Some(path) = path else {
            tracing::warn!("no font configured; using built-in bitmap face");
            return Self::builtin();
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "font unreadable; using built-in bitmap face");
                return Self::builtin();
            }
        };

        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), size_px, "font loaded");
                Typeface::Outline {
                    font,
                    scale: PxScale::from(size_px),
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "font invalid; using built-in bitmap face");
                Self::builtin()
            }
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Typeface::Bitmap { .. })
    }

    /// Horizontal extent of `text` in pixels.
    pub fn text_width(&self, text: &str) -> u32 {
        match self {
            Typeface::Outline { font, scale } => {
                let scaled = font.as_scaled(*scale);
                let mut width = 0.0f32;
                let mut prev: Option<GlyphId> = None;
                for ch in text.chars() {
                    let id = scaled.glyph_id(ch);
                    if let Some(p) = prev {
                        width += scaled.kern(p, id);
                    }
                    width += scaled.h_advance(id);
                    prev = Some(id);
                }
                width.ceil().max(0.0) as u32
            }
            Typeface::Bitmap { scale } => text.chars().count() as u32 * BITMAP_ADVANCE * scale,
        }
    }

    /// Draw `text` with its top-left corner at (`x`, `y`), clipped to the image.
    pub fn draw(&self, img: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        match self {
            Typeface::Outline { font, scale } => draw_outline(img, font, *scale, x, y, text, color),
            Typeface::Bitmap { scale } => draw_bitmap(img, *scale, x, y, text, color),
        }
    }
}

fn draw_outline(
    img: &mut RgbImage,
    font: &FontVec,
    scale: PxScale,
    x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
) {
    let scaled = font.as_scaled(scale);
    let baseline = y as f32 + scaled.ascent();
    let mut caret = x as f32;
    let mut prev: Option<GlyphId> = None;

    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(p) = prev {
            caret += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(scale, point(caret, baseline));
        caret += scaled.h_advance(id);
        prev = Some(id);

        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                blend(img, px, py, color, coverage);
            });
        }
    }
}

fn draw_bitmap(img: &mut RgbImage, scale: u32, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let scale = scale.max(1) as i32;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * BITMAP_ADVANCE as i32 * scale;
        for (col, bits) in bitmap_glyph(ch).iter().enumerate() {
            for row in 0..BITMAP_ROWS {
                if bits & (1 << row) == 0 {
                    continue;
                }
                let bx = origin_x + col as i32 * scale;
                let by = y + row as i32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        blend(img, bx + dx, by + dy, color, 1.0);
                    }
                }
            }
        }
    }
}

/// Mix `color` into the pixel at (`x`, `y`) by `coverage`; out-of-bounds is a no-op.
fn blend(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= img.width() || y as u32 >= img.height() {
        return;
    }
    let c = coverage.clamp(0.0, 1.0);
    let pixel = img.get_pixel_mut(x as u32, y as u32);
    for (dst, src) in pixel.0.iter_mut().zip(color.0.iter()) {
        *dst = (*dst as f32 * (1.0 - c) + *src as f32 * c).round() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_from(f: impl FnOnce() -> Typeface) -> (Typeface, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let face = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
        (face, logs)
    }

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    #[test]
    fn test_bitmap_glyph_fallback_for_non_ascii() {
        assert_eq!(bitmap_glyph('é'), bitmap_glyph('?'));
        assert_eq!(bitmap_glyph(' '), &[0u8; 5]);
    }

    #[test]
    fn test_bitmap_width() {
        let face = Typeface::builtin();
        assert_eq!(face.text_width(""), 0);
        assert_eq!(face.text_width("abc"), 3 * BITMAP_ADVANCE * 2);
    }

    #[test]
    fn test_bitmap_draw_marks_pixels() {
        let mut img = RgbImage::new(40, 20);
        Typeface::builtin().draw(&mut img, 0, 0, "E", WHITE);
        // 'E' has a full left column.
        assert_eq!(*img.get_pixel(0, 0), WHITE);
        assert_eq!(*img.get_pixel(1, 13), WHITE);
        // Nothing beyond the glyph advance.
        assert_eq!(*img.get_pixel(20, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_clips_outside_image() {
        let mut img = RgbImage::new(4, 4);
        Typeface::builtin().draw(&mut img, -10, -10, "Emotion: happy", WHITE);
        Typeface::builtin().draw(&mut img, 100, 100, "x", WHITE);
    }

    #[test]
    fn test_missing_font_falls_back() {
        let face = Typeface::load_or_builtin(Some(Path::new("/nonexistent/arial.ttf")), 20.0);
        assert!(face.is_builtin());
    }

    #[test]
    fn test_invalid_font_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(Typeface::load_or_builtin(Some(&path), 20.0).is_builtin());
    }

    #[test]
    fn test_no_font_configured_warns() {
        let (face, logs) = warnings_from(|| Typeface::load_or_builtin(None, 20.0));
        assert!(face.is_builtin());
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("built-in bitmap face"), "{logs}");
    }

    #[test]
    fn test_missing_font_warns() {
        let (face, logs) =
            warnings_from(|| Typeface::load_or_builtin(Some(Path::new("/nonexistent/a.ttf")), 20.0));
        assert!(face.is_builtin());
        assert!(logs.contains("font unreadable"), "{logs}");
    }
}
