use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, Rgba, RgbaImage};
use log::debug;

use crate::artifact::{ArtifactHandle, ArtifactStore};
use crate::error::{ConvertError, ConvertResult};
use crate::source::SourceFile;

/// Native 2D raster capability: decode to a bitmap and encode a surface.
pub trait RasterBackend: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage>;

    /// Encode `surface` as `mime`. Types the backend cannot produce come back
    /// as PNG bytes; `None` means no bytes could be produced at all.
    fn encode(&self, surface: &RgbaImage, mime: &str, quality: f32) -> Option<EncodedImage>;
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// Type actually produced, which may differ from the one requested
    pub mime: String,
}

/// Raster backend with 2D-canvas export semantics: JPEG and PNG through the
/// `image` crate, lossy WebP through libwebp, PNG for everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRaster;

impl RasterBackend for ImageRaster {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage> {
        let img = image::load_from_memory(data).context("Unrecognised or corrupt image data")?;
        Ok(img.to_rgba8())
    }

    fn encode(&self, surface: &RgbaImage, mime: &str, quality: f32) -> Option<EncodedImage> {
        let mut buf = Vec::new();
        let (result, produced) = match mime {
            "image/jpeg" => {
                // JPEG has no alpha channel; the colour channels are kept as-is
                let rgb = image::DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
                let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality));
                (rgb.write_with_encoder(encoder), "image/jpeg")
            }
            "image/webp" => {
                let (width, height) = surface.dimensions();
                let encoder = webp::Encoder::from_rgba(surface.as_raw(), width, height);
                match encoder.encode_simple(false, webp_quality(quality)) {
                    Ok(memory) => {
                        buf.extend_from_slice(&memory);
                        (Ok(()), "image/webp")
                    }
                    Err(e) => {
                        debug!("Raster encode to {} failed: {:?}", mime, e);
                        return None;
                    }
                }
            }
            _ => (surface.write_with_encoder(PngEncoder::new(&mut buf)), "image/png"),
        };

        match result {
            Ok(()) if !buf.is_empty() => Some(EncodedImage {
                bytes: buf,
                mime: produced.to_string(),
            }),
            Ok(()) => None,
            Err(e) => {
                debug!("Raster encode to {} failed: {}", mime, e);
                None
            }
        }
    }
}

/// Map a 0.0-1.0 quality factor onto the JPEG encoder's 1-100 scale
fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Map a 0.0-1.0 quality factor onto libwebp's 0-100 scale
fn webp_quality(quality: f32) -> f32 {
    (quality * 100.0).clamp(0.0, 100.0)
}

/// MIME type requested from the surface for a target format
pub fn raster_mime(format: &str) -> &'static str {
    match format {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// Export quality factor for a target format
pub fn raster_quality(format: &str) -> f32 {
    match format {
        "jpg" | "jpeg" => 0.92,
        "webp" => 0.85,
        _ => 1.0,
    }
}

/// Formats that cannot carry transparency get an opaque white backdrop
fn needs_backdrop(format: &str) -> bool {
    matches!(format, "jpg" | "jpeg")
}

/// Run the decode/draw/encode pipeline synchronously.
///
/// Progress is reported at 10, 40, 70 and 100.
pub fn render(
    backend: &dyn RasterBackend,
    data: &[u8],
    format: &str,
    on_progress: &dyn Fn(u8),
) -> ConvertResult<EncodedImage> {
    on_progress(10);

    let bitmap = backend
        .decode(data)
        .map_err(|e| ConvertError::Decode(format!("{:#}", e)))?;

    on_progress(40);

    let (width, height) = bitmap.dimensions();
    let mut surface = if needs_backdrop(format) {
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
    } else {
        RgbaImage::new(width, height)
    };
    imageops::overlay(&mut surface, &bitmap, 0, 0);

    on_progress(70);

    let encoded = backend
        .encode(&surface, raster_mime(format), raster_quality(format))
        .ok_or_else(|| ConvertError::Encode(format.to_uppercase()))?;

    on_progress(100);
    Ok(encoded)
}

/// Result of a raster conversion
#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub handle: ArtifactHandle,
    pub mime: String,
    pub size: usize,
}

/// Image conversion adapter producing registered artifacts. Each call
/// allocates its own surface, so conversions here never contend with each
/// other or with the transcoding engine.
#[derive(Clone)]
pub struct RasterAdapter {
    backend: Arc<dyn RasterBackend>,
    artifacts: ArtifactStore,
}

impl RasterAdapter {
    pub fn new(backend: Arc<dyn RasterBackend>, artifacts: ArtifactStore) -> Self {
        Self { backend, artifacts }
    }

    /// Convert an image on a blocking worker and register the result.
    ///
    /// BMP and TIFF targets come back as PNG bytes (see [`ImageRaster`]);
    /// the returned `mime` reports what was actually encoded.
    pub async fn convert_image<F>(&self, file: &SourceFile, format: &str, on_progress: F) -> ConvertResult<RasterOutput>
    where
        F: Fn(u8) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let data: Bytes = file.bytes.clone();
        let target = format.to_string();

        let encoded = tokio::task::spawn_blocking(move || render(backend.as_ref(), &data, &target, &on_progress))
            .await
            .map_err(|e| ConvertError::Encode(format!("{} (worker stopped: {})", format.to_uppercase(), e)))??;

        let size = encoded.bytes.len();
        let mime = encoded.mime.clone();
        let handle = self.artifacts.create(encoded.bytes, encoded.mime);
        Ok(RasterOutput { handle, mime, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use parking_lot::Mutex;
    use std::io::Cursor;

    /// 32x16 PNG: left 16 columns opaque red, right 16 fully transparent.
    /// Each half fills whole JPEG MCUs so the check pixels see no bleed.
    fn half_transparent_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(32, 16, |x, _| {
            if x < 16 {
                Rgba([200, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn collect_progress() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |pct| sink.lock().push(pct))
    }

    #[test]
    fn test_jpeg_gets_white_backdrop() {
        let (seen, progress) = collect_progress();
        let encoded = render(&ImageRaster, &half_transparent_png(), "jpg", &progress).unwrap();

        assert_eq!(encoded.mime, "image/jpeg");
        assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(*seen.lock(), [10, 40, 70, 100]);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        let formerly_transparent = decoded.get_pixel(31, 15);
        assert!(formerly_transparent.0.iter().all(|&c| c > 235), "got {:?}", formerly_transparent);
        let opaque = decoded.get_pixel(0, 0);
        assert!(opaque.0[0] > 150 && opaque.0[1] < 60, "got {:?}", opaque);
    }

    #[test]
    fn test_png_keeps_transparency() {
        let encoded = render(&ImageRaster, &half_transparent_png(), "png", &|_| {}).unwrap();
        assert_eq!(encoded.mime, "image/png");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(31, 0).0[3], 0);
        assert_eq!(decoded.get_pixel(0, 0).0, [200, 0, 0, 255]);
    }

    #[test]
    fn test_webp_export() {
        let encoded = render(&ImageRaster, &half_transparent_png(), "webp", &|_| {}).unwrap();
        assert_eq!(encoded.mime, "image/webp");
        assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn test_webp_quality_is_honoured() {
        // Noisy content so the quality factor has something to trade away
        let noisy = RgbaImage::from_fn(64, 64, |x, y| {
            let v = ((x * 37 + y * 91) ^ (x * y)) as u8;
            Rgba([v, v.wrapping_mul(3), v.wrapping_add(89), 255])
        });
        let low = ImageRaster.encode(&noisy, "image/webp", 0.1).unwrap();
        let high = ImageRaster.encode(&noisy, "image/webp", 0.95).unwrap();
        assert_eq!(low.mime, "image/webp");
        assert!(low.bytes.len() < high.bytes.len(), "{} vs {}", low.bytes.len(), high.bytes.len());
    }

    #[test]
    fn test_bmp_and_tiff_fall_back_to_png_bytes() {
        for format in ["bmp", "tiff"] {
            let encoded = render(&ImageRaster, &half_transparent_png(), format, &|_| {}).unwrap();
            assert_eq!(encoded.mime, "image/png");
            assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::Png);
        }
    }

    #[test]
    fn test_undecodable_source() {
        let (seen, progress) = collect_progress();
        let err = render(&ImageRaster, b"definitely not an image", "png", &progress).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));
        assert_eq!(*seen.lock(), [10]);
    }

    struct RefusingBackend;

    impl RasterBackend for RefusingBackend {
        fn decode(&self, data: &[u8]) -> Result<RgbaImage> {
            ImageRaster.decode(data)
        }

        fn encode(&self, _surface: &RgbaImage, _mime: &str, _quality: f32) -> Option<EncodedImage> {
            None
        }
    }

    #[test]
    fn test_encoder_without_output() {
        let err = render(&RefusingBackend, &half_transparent_png(), "webp", &|_| {}).unwrap_err();
        assert!(matches!(err, ConvertError::Encode(ref f) if f == "WEBP"));
    }

    #[tokio::test]
    async fn test_adapter_registers_artifact() {
        let store = ArtifactStore::new();
        let adapter = RasterAdapter::new(Arc::new(ImageRaster), store.clone());
        let file = SourceFile::new("logo.png", Some("image/png".to_string()), half_transparent_png());

        let (seen, progress) = collect_progress();
        let out = adapter.convert_image(&file, "jpg", progress).await.unwrap();

        assert_eq!(out.mime, "image/jpeg");
        assert_eq!(store.live(), 1);
        assert_eq!(store.resolve(&out.handle).unwrap().len(), out.size);
        assert_eq!(seen.lock().last(), Some(&100));
    }

    #[test]
    fn test_quality_table() {
        assert_eq!(jpeg_quality(raster_quality("jpg")), 92);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(raster_quality("png"), 1.0);
        assert_eq!(raster_mime("gif"), "image/png");
        assert!((webp_quality(raster_quality("webp")) - 85.0).abs() < 1e-3);
    }
}
