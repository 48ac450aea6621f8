use std::cell::RefCell;
use std::fs;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbaImage};
use rondo_core::{classify_mask_shape, CoreError, MaskEdge, RenderBackend, RenderRequest, RenderResult};
use rondo_image::{coverage_hard, coverage_smooth, effective_radius, ImageSize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct RuntimeDescriptor {
    pub rasterizer: String,
}

#[derive(Debug, Clone)]
pub struct CpuRasterBackend {
    descriptor: RuntimeDescriptor,
}

impl Default for CpuRasterBackend {
    fn default() -> Self {
        Self {
            descriptor: RuntimeDescriptor {
                rasterizer: "cpu-coverage".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    fingerprint: String,
    radius: u32,
    edge: MaskEdge,
    emit_mask_png: bool,
}

struct CacheEntry {
    key: CacheKey,
    result: RenderResult,
}

// Single-entry derived-output cache: the surface only ever reflects the most
// recent (image, radius) pair, so one slot is enough.
thread_local! {
    static RESULT_CACHE: RefCell<Option<CacheEntry>> = RefCell::new(None);
}

impl CpuRasterBackend {
    pub fn descriptor(&self) -> &RuntimeDescriptor {
        &self.descriptor
    }

    fn load_source_bytes(&self, request: &RenderRequest) -> Result<Vec<u8>, CoreError> {
        if let Some(bytes) = &request.input_bytes {
            return Ok(bytes.clone());
        }
        if let Some(path) = &request.input_path {
            return fs::read(path).map_err(|e| CoreError::Backend(e.to_string()));
        }
        Err(CoreError::MissingInput)
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl RenderBackend for CpuRasterBackend {
    fn render(&self, request: &RenderRequest, radius: u32) -> Result<RenderResult, CoreError> {
        let source_bytes = self.load_source_bytes(request)?;
        let key = CacheKey {
            fingerprint: fingerprint(&source_bytes),
            radius,
            edge: request.edge,
            emit_mask_png: request.emit_mask_png,
        };
        let cached = RESULT_CACHE.with(|cache| {
            cache
                .borrow()
                .as_ref()
                .filter(|entry| entry.key == key)
                .map(|entry| entry.result.clone())
        });
        if let Some(mut result) = cached {
            result.from_cache = true;
            return Ok(result);
        }

        let decoded = image::load_from_memory(&source_bytes)
            .map_err(|e| CoreError::Decode(e.to_string()))?;
        let source = decoded.to_rgba8();
        let (width, height) = source.dimensions();
        let size = ImageSize { width, height };
        let radius_px = effective_radius(size, radius);

        let mask = render_mask(size, radius_px, request.edge);
        let cutout = apply_mask(&source, &mask)?;
        let cutout_png = encode_png(&DynamicImage::ImageRgba8(cutout))?;
        let mask_png = if request.emit_mask_png {
            Some(encode_png(&DynamicImage::ImageLuma8(mask))?)
        } else {
            None
        };

        let result = RenderResult {
            effective_radius: radius_px,
            shape: classify_mask_shape(width, height, radius_px),
            cutout_png,
            mask_png,
            width,
            height,
            from_cache: false,
        };
        RESULT_CACHE.with(|cache| {
            *cache.borrow_mut() = Some(CacheEntry {
                key,
                result: result.clone(),
            });
        });
        Ok(result)
    }
}

pub fn render_mask(size: ImageSize, radius: f32, edge: MaskEdge) -> GrayImage {
    GrayImage::from_fn(size.width, size.height, |x, y| {
        let coverage = match edge {
            MaskEdge::Smooth => coverage_smooth(size, radius, x, y),
            MaskEdge::Hard => coverage_hard(size, radius, x, y),
        };
        Luma([(coverage * 255.0).round() as u8])
    })
}

pub fn apply_mask(source: &RgbaImage, mask: &GrayImage) -> Result<RgbaImage, CoreError> {
    let (width, height) = source.dimensions();
    if mask.dimensions() != (width, height) {
        return Err(CoreError::Backend(
            "mask dimensions do not match source dimensions".to_string(),
        ));
    }
    let mut cutout = source.clone();
    for y in 0..height {
        for x in 0..width {
            let coverage = mask.get_pixel(x, y)[0] as u16;
            let px = cutout.get_pixel_mut(x, y);
            // Full coverage keeps the source alpha bit-exact, zero clears it.
            px[3] = ((px[3] as u16 * coverage + 127) / 255) as u8;
        }
    }
    Ok(cutout)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CoreError> {
    let mut encoded = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|e| CoreError::Backend(e.to_string()))?;
    Ok(encoded)
}
