//! Result overlay rendering.
//!
//! Draws the dominant emotion in an opaque band at the top-left of the
//! image, followed by one line per scored label, and saves the result as a
//! new file next to the source.

use crate::artifact::write_atomic;
use crate::typeface::Typeface;
use crate::types::{Emotion, EmotionScores};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Appended to the source file stem to name the annotated copy.
pub const ANNOTATED_SUFFIX: &str = "_annotated";

const BAND_LEFT: u32 = 10;
const BAND_TOP: u32 = 10;
const BAND_BOTTOM: u32 = 40;
const BAND_RIGHT_PADDING: u32 = 9;
const TEXT_X: i32 = 15;
const LABEL_Y: i32 = 12;
const SCORES_TOP: i32 = 50;
const LINE_SPACING: i32 = 22;

const BAND_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to encode annotated image: {0}")]
    Encode(image::ImageError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("source path has no file name: {0}")]
    InvalidPath(PathBuf),
}

/// Path of the annotated copy of `source`: `<stem>_annotated.<ext>`.
///
/// Sources without an extension get `.png`.
pub fn annotated_path(source: &Path) -> Result<PathBuf, AnnotateError> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AnnotateError::InvalidPath(source.to_path_buf()))?;
    let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("png");
    Ok(source.with_file_name(format!("{stem}{ANNOTATED_SUFFIX}.{ext}")))
}

/// Renders emotion results onto images.
pub struct Annotator {
    typeface: Typeface,
}

impl Annotator {
    pub fn new(typeface: Typeface) -> Self {
        Self { typeface }
    }

    /// Annotator using the font at `font_path` when it loads, the built-in face otherwise.
    pub fn with_font(font_path: Option<&Path>, size_px: f32) -> Self {
        Self::new(Typeface::load_or_builtin(font_path, size_px))
    }

    pub fn typeface(&self) -> &Typeface {
        &self.typeface
    }

    /// Write an annotated copy of the image at `image_path` and return its path.
    ///
    /// Score lines follow the iteration order of `scores`. The source file
    /// is only read.
    pub fn annotate(
        &self,
        image_path: &Path,
        dominant: Emotion,
        scores: &EmotionScores,
    ) -> Result<PathBuf, AnnotateError> {
        // Declared content types can disagree with the bytes; trust the bytes.
        let reader = ImageReader::open(image_path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|source| AnnotateError::Io {
                path: image_path.to_path_buf(),
                source,
            })?;
        let source = reader.decode().map_err(|source| AnnotateError::Decode {
            path: image_path.to_path_buf(),
            source,
        })?;
        let mut canvas = source.to_rgb8();
        self.render(&mut canvas, dominant, scores);

        let out = annotated_path(image_path)?;
        let format = out
            .extension()
            .and_then(ImageFormat::from_extension)
            .unwrap_or(ImageFormat::Png);

        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut encoded), format)
            .map_err(AnnotateError::Encode)?;

        write_atomic(&out, &encoded).map_err(|source| AnnotateError::Io {
            path: out.clone(),
            source,
        })?;

        tracing::debug!(
            source = %image_path.display(),
            annotated = %out.display(),
            builtin_font = self.typeface.is_builtin(),
            "annotation written"
        );
        Ok(out)
    }

    fn render(&self, canvas: &mut RgbImage, dominant: Emotion, scores: &EmotionScores) {
        let label = format!("Emotion: {dominant}");
        let band_right = TEXT_X as u32 + self.typeface.text_width(&label) + BAND_RIGHT_PADDING;
        fill_rect(canvas, BAND_LEFT, BAND_TOP, band_right, BAND_BOTTOM, BAND_COLOR);
        self.typeface.draw(canvas, TEXT_X, LABEL_Y, &label, TEXT_COLOR);

        let mut y = SCORES_TOP;
        for (emotion, score) in scores.iter() {
            let line = format!("{emotion}: {score:.2}");
            self.typeface.draw(canvas, TEXT_X, y, &line, TEXT_COLOR);
            y += LINE_SPACING;
        }
    }
}

/// Fill the half-open rectangle [x0, x1) × [y0, y1), clipped to the canvas.
fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(canvas.width());
    let y1 = y1.min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(path: &Path, width: u32, height: u32, shade: u8) {
        RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    fn scores() -> EmotionScores {
        [(Emotion::Happy, 91.23), (Emotion::Sad, 2.11), (Emotion::Neutral, 4.5)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_annotated_path_suffix() {
        assert_eq!(
            annotated_path(Path::new("/up/Ada_20250101_1.jpg")).unwrap(),
            Path::new("/up/Ada_20250101_1_annotated.jpg")
        );
        assert_eq!(
            annotated_path(Path::new("/up/a.b.png")).unwrap(),
            Path::new("/up/a.b_annotated.png")
        );
        assert_eq!(
            annotated_path(Path::new("/up/raw")).unwrap(),
            Path::new("/up/raw_annotated.png")
        );
    }

    #[test]
    fn test_annotate_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("face.png");
        write_image(&src, 200, 200, 128);
        let before = std::fs::read(&src).unwrap();

        let out = Annotator::new(Typeface::builtin())
            .annotate(&src, Emotion::Happy, &scores())
            .unwrap();

        assert_ne!(out, src);
        assert!(out.exists());
        assert_eq!(std::fs::read(&src).unwrap(), before);
    }

    #[test]
    fn test_annotate_draws_band_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("face.png");
        write_image(&src, 200, 200, 128);

        let out = Annotator::new(Typeface::builtin())
            .annotate(&src, Emotion::Happy, &scores())
            .unwrap();
        let img = image::open(&out).unwrap().to_rgb8();

        assert_eq!(img.dimensions(), (200, 200));
        // Band corner is opaque black; outside it the source shade remains.
        assert_eq!(*img.get_pixel(BAND_LEFT, BAND_TOP), BAND_COLOR);
        assert_eq!(*img.get_pixel(5, 5), Rgb([128, 128, 128]));
        // Some white text pixels exist inside the band and in the score area.
        let white_in = |y0: u32, y1: u32| {
            (y0..y1).any(|y| (0..200).any(|x| *img.get_pixel(x, y) == TEXT_COLOR))
        };
        assert!(white_in(BAND_TOP, BAND_BOTTOM));
        assert!(white_in(SCORES_TOP as u32, SCORES_TOP as u32 + 3 * LINE_SPACING as u32));
    }

    #[test]
    fn test_score_lines_follow_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let happy_first: EmotionScores = [(Emotion::Happy, 91.23), (Emotion::Sad, 2.11)]
            .into_iter()
            .collect();
        let sad_first: EmotionScores = [(Emotion::Sad, 2.11), (Emotion::Happy, 91.23)]
            .into_iter()
            .collect();

        let annotator = Annotator::new(Typeface::builtin());
        let render = |name: &str, scores: &EmotionScores| {
            let src = dir.path().join(name);
            write_image(&src, 200, 200, 128);
            let out = annotator.annotate(&src, Emotion::Happy, scores).unwrap();
            image::open(out).unwrap().to_rgb8()
        };
        let a = render("a.png", &happy_first);
        let b = render("b.png", &sad_first);
        assert_ne!(a, b);

        // The first score line is exactly "happy: 91.23" drawn at SCORES_TOP.
        let mut reference = RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]));
        Typeface::builtin().draw(&mut reference, TEXT_X, SCORES_TOP, "happy: 91.23", TEXT_COLOR);
        let first_line = SCORES_TOP as u32..(SCORES_TOP + LINE_SPACING) as u32;
        for y in first_line {
            for x in 0..200 {
                assert_eq!(a.get_pixel(x, y), reference.get_pixel(x, y), "pixel ({x}, {y})");
            }
        }
        // Band area is identical: both share the dominant label.
        for y in BAND_TOP..BAND_BOTTOM {
            for x in 0..200 {
                assert_eq!(a.get_pixel(x, y), b.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_annotate_tiny_image_is_clipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tiny.png");
        write_image(&src, 8, 8, 10);
        let out = Annotator::new(Typeface::builtin())
            .annotate(&src, Emotion::Sad, &scores())
            .unwrap();
        assert_eq!(image::open(out).unwrap().to_rgb8().dimensions(), (8, 8));
    }

    #[test]
    fn test_annotate_jpeg_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("face.jpg");
        write_image(&src, 64, 64, 200);
        let out = Annotator::with_font(None, 20.0)
            .annotate(&src, Emotion::Neutral, &scores())
            .unwrap();
        assert_eq!(out.extension().unwrap(), "jpg");
        assert_eq!(image::guess_format(&std::fs::read(out).unwrap()).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_annotate_png_bytes_behind_jpg_name() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("real.png");
        write_image(&png, 32, 32, 90);
        let src = dir.path().join("declared.jpg");
        std::fs::rename(&png, &src).unwrap();

        let out = Annotator::new(Typeface::builtin())
            .annotate(&src, Emotion::Happy, &scores())
            .unwrap();
        assert_eq!(out, dir.path().join("declared_annotated.jpg"));
    }

    #[test]
    fn test_annotate_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = Annotator::new(Typeface::builtin())
            .annotate(&dir.path().join("gone.png"), Emotion::Happy, &scores())
            .unwrap_err();
        assert!(matches!(err, AnnotateError::Io { .. }));
    }

    #[test]
    fn test_annotate_undecodable_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bad.jpg");
        std::fs::write(&src, b"garbage").unwrap();
        let err = Annotator::new(Typeface::builtin())
            .annotate(&src, Emotion::Happy, &scores())
            .unwrap_err();
        assert!(matches!(err, AnnotateError::Decode { .. }));
        assert!(!annotated_path(&src).unwrap().exists());
    }
}
