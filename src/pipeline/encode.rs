//! Image encoding: rendered pages and raw images → base64 [`PageImage`].
//!
//! Rendered PDF pages are PNG-encoded: lossless compression keeps thin
//! traces, pin numbers and small value labels crisp. Single-image inputs are
//! passed through untouched when vision APIs take them as-is (PNG, JPEG,
//! GIF, WebP); BMP and TIFF are decoded and re-encoded as PNG.

use crate::error::SchematicError;
use crate::model::PageImage;
use crate::pipeline::input::MediaKind;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(index: usize, img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", index + 1, data.len());

    Ok(PageImage {
        index,
        mime_type: "image/png".to_string(),
        data,
    })
}

/// Wrap an already-encoded image without decoding it.
pub fn passthrough(bytes: &[u8], kind: MediaKind) -> PageImage {
    PageImage {
        index: 0,
        mime_type: kind.mime_type().to_string(),
        data: STANDARD.encode(bytes),
    }
}

/// Turn a single-image document into its one page.
///
/// BMP and TIFF go through a PNG re-encode; every other accepted format is
/// passed through.
pub fn single_image(bytes: &[u8], format: ImageFormat) -> Result<PageImage, SchematicError> {
    match format {
        ImageFormat::Bmp | ImageFormat::Tiff => {
            let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
                SchematicError::RasterisationFailed {
                    page: 1,
                    detail: format!("cannot decode {}: {}", format.to_mime_type(), e),
                }
            })?;
            debug!("Transcoding {} input to PNG", format.to_mime_type());
            encode_page(0, &img).map_err(|e| SchematicError::RasterisationFailed {
                page: 1,
                detail: e.to_string(),
            })
        }
        _ => Ok(passthrough(bytes, MediaKind::Image(format))),
    }
}
