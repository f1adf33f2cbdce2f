//! Equirectangular HDR source images

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;

use crate::error::{EnvError, EnvResult};

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an [`HdrImage`].
///
/// Allocated from a process-wide counter when the image is built and never
/// reused, so two live or dead images never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        ImageId(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

/// Float RGBA image in equirectangular layout, row 0 at the zenith.
///
/// Not `Clone`: every image is its own identity, even when the pixels match.
/// Share one image between scenes through an `Arc`.
pub struct HdrImage {
    id: ImageId,
    name: String,
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl HdrImage {
    /// Wrap tightly packed RGBA32F pixels.
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<f32>) -> EnvResult<Self> {
        let name = name.into();
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(EnvError::Image {
                path: name.into(),
                message: format!(
                    "{width}x{height} RGBA needs {expected} floats, got {}",
                    pixels.len()
                ),
            });
        }
        Ok(Self {
            id: ImageId::next(),
            name,
            width,
            height,
            pixels,
        })
    }

    /// Uniformly colored image, handy for tests and placeholders.
    pub fn solid(name: impl Into<String>, width: u32, height: u32, color: [f32; 4]) -> EnvResult<Self> {
        let pixels = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(name, width, height, pixels)
    }

    /// Decode a Radiance `.hdr` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> EnvResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| EnvError::io(path, e))?;
        let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Hdr).map_err(
            |e| EnvError::Image {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        )?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        log::info!("HDR image {}: {}x{}", name, img.width(), img.height());
        Self::from_image(img, name)
    }

    pub fn from_image(img: DynamicImage, name: impl Into<String>) -> EnvResult<Self> {
        let (width, height) = (img.width(), img.height());
        Self::new(name, width, height, img.to_rgba32f().into_raw())
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Pixels converted to half floats, ready for an `Rgba16Float` upload.
    ///
    /// Radiance beyond the half-float range saturates at `f16::MAX` instead of
    /// becoming infinite. NaN texels upload as zero.
    pub fn to_rgba16f_bytes(&self) -> Vec<u8> {
        let halves: Vec<half::f16> = self.pixels.iter().map(|&v| to_half(v)).collect();
        bytemuck::cast_slice(&halves).to_vec()
    }
}

fn to_half(value: f32) -> half::f16 {
    if value.is_nan() {
        return half::f16::ZERO;
    }
    let max = half::f16::MAX.to_f32();
    half::f16::from_f32(value.clamp(-max, max))
}

impl fmt::Debug for HdrImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdrImage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Vec<half::f16> {
        bytes
            .chunks_exact(2)
            .map(|pair| half::f16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_ids_are_unique() {
        let a = HdrImage::solid("sky", 2, 1, [1.0; 4]).unwrap();
        let b = HdrImage::solid("sky", 2, 1, [1.0; 4]).unwrap();
        assert_eq!(a.pixels(), b.pixels());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(HdrImage::new("short", 4, 2, vec![0.0; 31]).is_err());
        assert!(HdrImage::new("empty", 0, 2, Vec::new()).is_err());
    }

    #[test]
    fn test_half_float_conversion() {
        let img = HdrImage::solid("sky", 2, 2, [1.0, 0.5, 2.0, 1.0]).unwrap();
        let bytes = img.to_rgba16f_bytes();
        assert_eq!(bytes.len(), 2 * 2 * 8);

        let halves = decode(&bytes);
        assert_eq!(halves[0].to_f32(), 1.0);
        assert_eq!(halves[1].to_f32(), 0.5);
        assert_eq!(halves[2].to_f32(), 2.0);
    }

    #[test]
    fn test_half_float_conversion_saturates() {
        let img = HdrImage::new(
            "sun",
            2,
            1,
            vec![100_000.0, 1.0, -1.0e9, 1.0, f32::NAN, f32::INFINITY, 0.25, 1.0],
        )
        .unwrap();
        let bytes = img.to_rgba16f_bytes();
        let halves = decode(&bytes);

        assert!(halves.iter().all(|h| h.is_finite()));
        assert_eq!(halves[0], half::f16::MAX);
        assert_eq!(halves[1].to_f32(), 1.0);
        assert_eq!(halves[2], half::f16::MIN);
        assert_eq!(halves[4].to_f32(), 0.0);
        assert_eq!(halves[5], half::f16::MAX);
        assert_eq!(halves[6].to_f32(), 0.25);
    }

    #[test]
    fn test_from_image() {
        let img = DynamicImage::new_rgb32f(8, 4);
        let hdr = HdrImage::from_image(img, "black").unwrap();
        assert_eq!((hdr.width(), hdr.height()), (8, 4));
        assert_eq!(hdr.pixels().len(), 8 * 4 * 4);
        assert_eq!(hdr.pixels()[3], 1.0);
    }
}
