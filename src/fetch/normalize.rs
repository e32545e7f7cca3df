//! Re-encoding of downloaded images into the stored format: baseline JPEG,
//! longest side capped, transparency flattened onto white.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self {
            max_dimension: 1200,
            jpeg_quality: 85,
        }
    }
}

impl ImageNormalizer {
    /// Decode, flatten, downscale and encode. Undecodable payloads are
    /// permanent failures: fetching the same bytes again will not help.
    pub fn normalize(&self, raw: &[u8]) -> Result<Bytes, FetchError> {
        let img = image::load_from_memory(raw)
            .map_err(|e| FetchError::Permanent(format!("undecodable image: {e}")))?;
        let rgb = self.resize(flatten_onto_white(&img));

        let mut out = Vec::with_capacity(raw.len());
        {
            let mut encoder =
                JpegEncoder::new_with_quality(&mut out, self.jpeg_quality.clamp(1, 100));
            encoder
                .encode_image(&rgb)
                .map_err(|e| FetchError::Permanent(format!("jpeg encode failed: {e}")))?;
        }
        Ok(Bytes::from(out))
    }

    fn resize(&self, rgb: RgbImage) -> RgbImage {
        let (w, h) = rgb.dimensions();
        if self.max_dimension == 0 || (w <= self.max_dimension && h <= self.max_dimension) {
            return rgb;
        }
        DynamicImage::ImageRgb8(rgb)
            .resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
            .to_rgb8()
    }
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let (w, h) = img.dimensions();
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
