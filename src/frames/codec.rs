//! Pure image encoding/decoding used by the split and join activities.
//!
//! Animated GIF, APNG and animated WebP sources are split frame by frame;
//! any other image the `image` crate recognizes decodes to a single frame.
//! Intermediate frames are always stored as PNG.

use std::io::Cursor;
use std::time::Duration;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    imageops, AnimationDecoder, Delay, DynamicImage, Frame, ImageError, ImageFormat, RgbaImage,
};

use crate::domain::{OutputFormat, PipelineError, PipelineResult};

/// Quantizer speed for GIF output (1 = best, 30 = fastest)
const GIF_SPEED: i32 = 10;

fn decode_error(err: ImageError) -> PipelineError {
    PipelineError::Decode(err.to_string())
}

/// Decode a source blob into its frames, in source order
pub fn decode_frames(bytes: &[u8]) -> PipelineResult<Vec<RgbaImage>> {
    let format = image::guess_format(bytes).map_err(decode_error)?;

    match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
            animation_frames(decoder)
        }
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
            if decoder.is_apng().map_err(decode_error)? {
                animation_frames(decoder.apng().map_err(decode_error)?)
            } else {
                still_frame(bytes, format)
            }
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
            if decoder.has_animation() {
                animation_frames(decoder)
            } else {
                still_frame(bytes, format)
            }
        }
        _ => still_frame(bytes, format),
    }
}

/// Every frame of an animation, composited onto its full canvas
fn animation_frames<'a>(decoder: impl AnimationDecoder<'a>) -> PipelineResult<Vec<RgbaImage>> {
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(decode_error)?;

    if frames.is_empty() {
        return Err(PipelineError::Decode("animation contains no frames".to_string()));
    }

    Ok(frames.into_iter().map(Frame::into_buffer).collect())
}

fn still_frame(bytes: &[u8], format: ImageFormat) -> PipelineResult<Vec<RgbaImage>> {
    let image = image::load_from_memory_with_format(bytes, format).map_err(decode_error)?;
    Ok(vec![image.to_rgba8()])
}

/// Decode one stored frame
pub fn decode_frame(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Encode one frame as PNG
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Encode the ordered output frames into the final artifact.
///
/// One frame becomes a PNG still; more become a looping GIF with `delay`
/// between frames. Frames smaller than the largest one are anchored at the
/// top-left of a transparent canvas.
pub fn encode_output(
    frames: Vec<DynamicImage>,
    delay: Duration,
) -> PipelineResult<(Vec<u8>, OutputFormat)> {
    let format = OutputFormat::for_frame_count(frames.len());

    match frames.len() {
        0 => Err(PipelineError::Encode("no frames to join".to_string())),
        1 => {
            let bytes = encode_png(&frames[0]).map_err(|e| PipelineError::Encode(e.to_string()))?;
            Ok((bytes, format))
        }
        _ => {
            let bytes = encode_gif(frames, delay)?;
            Ok((bytes, format))
        }
    }
}

fn encode_gif(frames: Vec<DynamicImage>, delay: Duration) -> PipelineResult<Vec<u8>> {
    let width = frames.iter().map(|f| f.width()).max().unwrap_or(0);
    let height = frames.iter().map(|f| f.height()).max().unwrap_or(0);
    let delay = Delay::from_numer_denom_ms(delay.as_millis().min(u32::MAX as u128) as u32, 1);

    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, GIF_SPEED);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        for frame in frames {
            let canvas = fit_to_canvas(frame.to_rgba8(), width, height);
            encoder
                .encode_frame(Frame::from_parts(canvas, 0, 0, delay))
                .map_err(|e| PipelineError::Encode(e.to_string()))?;
        }
    }

    Ok(buf)
}

fn fit_to_canvas(frame: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if frame.dimensions() == (width, height) {
        return frame;
    }

    let mut canvas = RgbaImage::new(width, height);
    imageops::overlay(&mut canvas, &frame, 0, 0);
    canvas
}
