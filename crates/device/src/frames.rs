//! Decoding source files into frames and encoding frames for the wire.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use base64::Engine;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader};
use pixoo_core::device::{DEFAULT_FRAME_DURATION_MS, DISPLAY_SIZE, MIN_FRAME_SPEED_MS};
use pixoo_core::{CoreError, CoreResult};

/// Frames of a source file with their display durations.
#[derive(Debug, Clone)]
pub struct SourceFrames {
    pub frames: Vec<DynamicImage>,
    pub durations_ms: Vec<u32>,
}

impl SourceFrames {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn still(image: DynamicImage) -> Self {
        Self {
            frames: vec![image],
            durations_ms: vec![DEFAULT_FRAME_DURATION_MS],
        }
    }
}

/// Load every frame of `path`. Animated GIF and WebP yield all frames;
/// any other supported format yields a single still.
///
/// Blocking; run it on the blocking pool.
pub fn load_frames(path: &Path) -> CoreResult<SourceFrames> {
    let image_err = |e: image::ImageError| CoreError::Image(format!("{}: {e}", path.display()));

    let format = ImageReader::open(path)?
        .with_guessed_format()?
        .format();

    match format {
        Some(ImageFormat::Gif) => {
            let decoder = GifDecoder::new(BufReader::new(File::open(path)?)).map_err(image_err)?;
            collect_animation(decoder).map_err(image_err)
        }
        Some(ImageFormat::WebP) => {
            let decoder =
                WebPDecoder::new(BufReader::new(File::open(path)?)).map_err(image_err)?;
            if decoder.has_animation() {
                collect_animation(decoder).map_err(image_err)
            } else {
                DynamicImage::from_decoder(decoder)
                    .map(SourceFrames::still)
                    .map_err(image_err)
            }
        }
        _ => ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map(SourceFrames::still)
            .map_err(image_err),
    }
}

fn collect_animation<'a>(decoder: impl AnimationDecoder<'a>) -> image::ImageResult<SourceFrames> {
    let frames = decoder.into_frames().collect_frames()?;

    let mut images = Vec::with_capacity(frames.len());
    let mut durations = Vec::with_capacity(frames.len());
    for frame in frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let ms = if denom == 0 { 0 } else { numer / denom };
        durations.push(if ms == 0 { DEFAULT_FRAME_DURATION_MS } else { ms });
        images.push(DynamicImage::ImageRgba8(frame.into_buffer()));
    }

    Ok(SourceFrames {
        frames: images,
        durations_ms: durations,
    })
}

/// Flatten `image` into row-major RGB bytes at the display resolution.
///
/// Alpha is dropped; other sizes are resized with nearest-neighbour so the
/// result is always `64 * 64 * 3` bytes.
pub fn encode_frame(image: &DynamicImage) -> Vec<u8> {
    let rgb = image.to_rgb8();
    let rgb = if rgb.dimensions() == (DISPLAY_SIZE, DISPLAY_SIZE) {
        rgb
    } else {
        image::imageops::resize(&rgb, DISPLAY_SIZE, DISPLAY_SIZE, FilterType::Nearest)
    };
    rgb.into_raw()
}

/// Base64 payload for the per-frame command.
pub fn frame_to_base64(image: &DynamicImage) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_frame(image))
}

/// Integer mean of `durations`, never below the device minimum.
pub fn average_speed(durations: &[u32]) -> u32 {
    if durations.is_empty() {
        return DEFAULT_FRAME_DURATION_MS;
    }
    let total: u64 = durations.iter().map(|&d| u64::from(d)).sum();
    let mean = total / durations.len() as u64;
    u32::try_from(mean).unwrap_or(u32::MAX).max(MIN_FRAME_SPEED_MS)
}
