//! Fixed pixel operations: orientation, content crop, sharpening
//!
//! None of these read per-image metadata. Orientation in particular is a
//! constant rotation for the studio camera mount; EXIF orientation is ignored.

use image::{imageops, Rgb, RgbImage};

/// Luma above this value counts as content when cropping
pub const CONTENT_THRESHOLD: u8 = 1;

/// 3x3 sharpen kernel, row-major. Sums to 1, so flat regions are unchanged.
pub const SHARPEN_KERNEL: [i32; 9] = [0, -1, 0, -1, 5, -1, 0, -1, 0];

/// Rotate 90 degrees clockwise
pub fn orient(image: &RgbImage) -> RgbImage {
    imageops::rotate90(image)
}

/// ITU-R BT.601 luma, integer arithmetic
fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

/// Bounding box `(x, y, width, height)` of pixels whose luma exceeds the threshold
pub fn content_bounds(image: &RgbImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if luma(pixel) > CONTENT_THRESHOLD {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crop away the uniform dark border. An image with no content is returned as-is.
pub fn crop_to_content(image: RgbImage) -> RgbImage {
    match content_bounds(&image) {
        Some((x, y, width, height)) if (width, height) != image.dimensions() => {
            imageops::crop_imm(&image, x, y, width, height).to_image()
        }
        Some(_) => image,
        None => {
            tracing::debug!("No content pixels found, skipping crop");
            image
        }
    }
}

/// Convolve with `SHARPEN_KERNEL`, clamping reads at the edges
pub fn sharpen(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0i32; 3];
        for ky in 0..3i64 {
            for kx in 0..3i64 {
                let weight = SHARPEN_KERNEL[(ky * 3 + kx) as usize];
                if weight == 0 {
                    continue;
                }
                let sx = (x as i64 + kx - 1).clamp(0, max_x) as u32;
                let sy = (y as i64 + ky - 1).clamp(0, max_y) as u32;
                let sample = image.get_pixel(sx, sy).0;
                for channel in 0..3 {
                    acc[channel] += weight * sample[channel] as i32;
                }
            }
        }
        Rgb(acc.map(|v| v.clamp(0, 255) as u8))
    })
}
