//! Keyframe encoding for result envelopes.
//!
//! Frames arrive as planar YUV420 (I420: full Y plane, then quarter-size U
//! and V planes). The keyframe is the frame converted to RGB (BT.601,
//! studio range), with red outlines around detections, as a base64 JPEG.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::roi::BoundingBox;

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_WIDTH: i32 = 2;

/// An encoded keyframe.
#[derive(Clone, Debug)]
pub struct Keyframe {
    pub jpeg: Vec<u8>,
    pub base64: String,
}

/// Expected byte length of an I420 frame.
pub fn i420_len(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    let chroma = (width as usize / 2) * (height as usize / 2);
    luma + 2 * chroma
}

/// Convert a planar YUV420 frame to RGB.
pub fn i420_to_rgb(frame: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has no pixels ({}x{})", width, height));
    }
    let expected = i420_len(width, height);
    if frame.len() != expected {
        return Err(anyhow!(
            "invalid YUV420 size for {}x{}: expected {} bytes, got {}",
            width,
            height,
            expected,
            frame.len()
        ));
    }

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = ((w / 2).max(1), (h / 2).max(1));
    let y_plane = &frame[..w * h];
    let u_plane = &frame[w * h..w * h + (w / 2) * (h / 2)];
    let v_plane = &frame[w * h + (w / 2) * (h / 2)..];

    let mut rgb = RgbImage::new(width, height);
    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane[y * w + x] as i32;
        let ci = (y / 2).min(ch - 1) * cw + (x / 2).min(cw - 1);
        let (u, v) = match (u_plane.get(ci), v_plane.get(ci)) {
            (Some(&u), Some(&v)) => (u as i32, v as i32),
            _ => (128, 128),
        };

        let c = luma - 16;
        let d = u - 128;
        let e = v - 128;
        let r = (298 * c + 409 * e + 128) >> 8;
        let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
        let b = (298 * c + 516 * d + 128) >> 8;
        *pixel = Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)]);
    }
    Ok(rgb)
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Draw box outlines, clipped to the image.
pub fn draw_boxes(image: &mut RgbImage, boxes: &[BoundingBox]) {
    let (iw, ih) = (image.width() as i32, image.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && x < iw && y < ih {
            image.put_pixel(x as u32, y as u32, OUTLINE);
        }
    };

    for b in boxes {
        let (x1, y1, x2, y2) = (b.x, b.y, b.x + b.w, b.y + b.h);
        for t in 0..OUTLINE_WIDTH {
            for x in x1..=x2 {
                put(x, y1 + t);
                put(x, y2 - t);
            }
            for y in y1..=y2 {
                put(x1 + t, y);
                put(x2 - t, y);
            }
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encoding failed")?;
    Ok(out)
}

/// Build the annotated keyframe for a claimed frame.
pub fn keyframe(
    frame: &[u8],
    width: u32,
    height: u32,
    quality: u8,
    boxes: &[BoundingBox],
) -> Result<Keyframe> {
    let mut rgb = i420_to_rgb(frame, width, height)?;
    draw_boxes(&mut rgb, boxes);
    let jpeg = encode_jpeg(&rgb, quality)?;
    let base64 = STANDARD.encode(&jpeg);
    Ok(Keyframe { jpeg, base64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> Vec<u8> {
        let mut frame = vec![128u8; i420_len(width, height)];
        frame[..(width * height) as usize].fill(200);
        frame
    }

    #[test]
    fn rejects_frames_with_wrong_size() {
        let err = i420_to_rgb(&[0u8; 10], 4, 4).unwrap_err();
        assert!(err.to_string().contains("expected 24 bytes"));
    }

    #[test]
    fn neutral_chroma_gives_gray_pixels() {
        let rgb = i420_to_rgb(&gray_frame(4, 4), 4, 4).unwrap();
        let px = rgb.get_pixel(1, 1);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        // (298 * 184 + 128) >> 8
        assert_eq!(px[0], 214);
    }

    #[test]
    fn outlines_are_red_and_clipped() {
        let mut rgb = RgbImage::new(16, 16);
        draw_boxes(&mut rgb, &[BoundingBox::new(2, 2, 4, 4), BoundingBox::new(12, 12, 10, 10)]);
        assert_eq!(*rgb.get_pixel(2, 2), OUTLINE);
        assert_eq!(*rgb.get_pixel(6, 6), OUTLINE);
        assert_eq!(*rgb.get_pixel(4, 4), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(15, 12), OUTLINE);
    }

    #[test]
    fn keyframe_is_base64_jpeg() {
        let kf = keyframe(&gray_frame(32, 16), 32, 16, 50, &[BoundingBox::new(1, 1, 8, 8)]).unwrap();
        assert_eq!(&kf.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(STANDARD.decode(&kf.base64).unwrap(), kf.jpeg);
    }
}
