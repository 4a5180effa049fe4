//! Input resolution: turn a path, URL or byte buffer into a [`Document`].
//!
//! The media kind is decided from magic bytes, never from the file
//! extension: a `%PDF` header means a multi-page document, anything the
//! PNG, JPEG, GIF, WebP, BMP or TIFF is a single image, everything else is
//! rejected before a run starts.

use crate::error::SchematicError;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Declared kind of an input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Multi-page PDF; rasterised page by page.
    Pdf,
    /// A single raster image; passed through without decoding.
    Image(ImageFormat),
}

impl MediaKind {
    /// MIME type of the raw bytes.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Pdf => "application/pdf",
            MediaKind::Image(format) => format.to_mime_type(),
        }
    }
}

/// A document ready for rasterisation.
#[derive(Debug, Clone)]
pub struct Document {
    /// Display name, usually the file name; becomes the project name.
    pub name: String,
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Wrap raw bytes, detecting the media kind.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SchematicError> {
        let name = name.into();
        let kind = detect_media_kind(&name, &bytes)?;
        Ok(Self { name, kind, bytes })
    }

    /// Project name: the file name without its extension.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
            .to_string()
    }
}

/// Raster formats accepted as a single-image document.
pub const SUPPORTED_IMAGE_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// Decide the media kind from the leading bytes.
pub fn detect_media_kind(name: &str, bytes: &[u8]) -> Result<MediaKind, SchematicError> {
    if bytes.is_empty() {
        return Err(SchematicError::UnsupportedDocument {
            name: name.to_string(),
            detail: "file is empty".into(),
        });
    }
    if bytes.starts_with(b"%PDF") {
        return Ok(MediaKind::Pdf);
    }
    match image::guess_format(bytes) {
        Ok(format) if SUPPORTED_IMAGE_FORMATS.contains(&format) => Ok(MediaKind::Image(format)),
        Ok(format) => Err(SchematicError::UnsupportedDocument {
            name: name.to_string(),
            detail: format!("{} images are not accepted", format.to_mime_type()),
        }),
        Err(_) => {
            let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
            Err(SchematicError::UnsupportedDocument {
                name: name.to_string(),
                detail: format!("unrecognised leading bytes {:?}", magic),
            })
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL to a [`Document`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, SchematicError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<Document, SchematicError> {
    if path_str.trim().is_empty() {
        return Err(SchematicError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => SchematicError::PermissionDenied { path: path.clone() },
        _ => SchematicError::FileNotFound { path: path.clone() },
    })?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path_str)
        .to_string();

    debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
    Document::from_bytes(name, bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, SchematicError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SchematicError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            SchematicError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            SchematicError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(SchematicError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SchematicError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Document::from_bytes(filename_from_url(url), bytes.to_vec())
}

/// Last path segment of the URL, or a generic fallback.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded-document".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/manual.pdf"));
        assert!(is_url("http://example.com/board.png"));
        assert!(!is_url("/tmp/manual.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detects_pdf() {
        let kind = detect_media_kind("a.pdf", b"%PDF-1.7\n...").unwrap();
        assert_eq!(kind, MediaKind::Pdf);
        assert_eq!(kind.mime_type(), "application/pdf");
    }

    #[test]
    fn detects_png_regardless_of_extension() {
        let kind = detect_media_kind("scan.pdf", PNG_MAGIC).unwrap();
        assert_eq!(kind, MediaKind::Image(ImageFormat::Png));
        assert_eq!(kind.mime_type(), "image/png");
    }

    #[test]
    fn rejects_text_and_empty_input() {
        let err = detect_media_kind("notes.txt", b"hello world").unwrap_err();
        assert!(err.is_input_error());
        assert!(detect_media_kind("empty.png", b"").is_err());
    }

    #[test]
    fn rejects_image_formats_outside_the_accepted_set() {
        // ICO header: reserved 0, type 1, one image.
        let ico = [0, 0, 1, 0, 1, 0, 16, 16, 0, 0, 1, 0, 32, 0];
        let err = detect_media_kind("favicon.ico", &ico).unwrap_err();
        assert!(matches!(err, SchematicError::UnsupportedDocument { .. }));

        let err = detect_media_kind("frame.qoi", b"qoif\0\0\0\x10\0\0\0\x10\x04\x00").unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn accepts_bmp_and_tiff() {
        let bmp = detect_media_kind("board.bmp", b"BM\x36\0\0\0\0\0\0\0").unwrap();
        assert_eq!(bmp, MediaKind::Image(ImageFormat::Bmp));
        let tiff = detect_media_kind("board.tif", b"II*\0\x08\0\0\0").unwrap();
        assert_eq!(tiff, MediaKind::Image(ImageFormat::Tiff));
    }

    #[test]
    fn stem_strips_extension() {
        let doc = Document::from_bytes("amp-manual.pdf", b"%PDF-1.4".to_vec()).unwrap();
        assert_eq!(doc.stem(), "amp-manual");
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/docs/amp.pdf"), "amp.pdf");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded-document");
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, SchematicError::FileNotFound { .. }));
    }
}
