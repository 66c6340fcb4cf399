// src/overlay.rs
use image::{Rgb, RgbImage, Rgba, RgbaImage};

const LINE_COLOR: [u8; 3] = [0xFF, 0xFF, 0xFF];
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// A bitmap composited above the live preview.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub image: RgbaImage,
    /// Stacking order; higher layers draw later.
    pub layer: u8,
}

impl Overlay {
    /// Transparent full-frame bitmap with one horizontal and one vertical
    /// line through the center, both drawn at `alpha`.
    pub fn crosshair(width: u32, height: u32, alpha: u8, layer: u8) -> Self {
        let mut image = RgbaImage::from_pixel(width, height, CLEAR);
        let line = Rgba([LINE_COLOR[0], LINE_COLOR[1], LINE_COLOR[2], alpha]);
        if width > 0 && height > 0 {
            let (cx, cy) = (width / 2, height / 2);
            for x in 0..width {
                image.put_pixel(x, cy, line);
            }
            for y in 0..height {
                image.put_pixel(cx, y, line);
            }
        }
        Self { image, layer }
    }

    /// Blends this overlay onto `frame`, stretching it to the frame size with
    /// nearest-neighbour sampling when the two differ.
    pub fn composite_onto(&self, frame: &mut RgbImage) {
        let (ow, oh) = self.image.dimensions();
        let (fw, fh) = frame.dimensions();
        if ow == 0 || oh == 0 || fw == 0 || fh == 0 {
            return;
        }
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            let ox = (x as u64 * ow as u64 / fw as u64) as u32;
            let oy = (y as u64 * oh as u64 / fh as u64) as u32;
            let src = self.image.get_pixel(ox, oy);
            if src[3] != 0 {
                *pixel = blend(*pixel, *src);
            }
        }
    }
}

#[inline]
fn blend(dst: Rgb<u8>, src: Rgba<u8>) -> Rgb<u8> {
    let a = src[3] as u32;
    let mix = |d: u8, s: u8| ((s as u32 * a + d as u32 * (255 - a) + 127) / 255) as u8;
    Rgb([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2])])
}
