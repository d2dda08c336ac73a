use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed reading {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image resource is empty")]
    Empty,
    #[error("unsupported image type '{0}'")]
    UnsupportedType(String),
    #[error("image could not be decoded: {0}")]
    Undecodable(String),
    #[error("malformed data URI: {0}")]
    MalformedDataUri(String),
}

/// Raw image input as handed over by the presentation layer.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageResource {
    pub bytes: Vec<u8>,
    pub declared_mime: Option<String>,
    pub name: Option<String>,
}

impl ImageResource {
    pub fn from_bytes(bytes: Vec<u8>, declared_mime: Option<&str>) -> Self {
        Self {
            bytes,
            declared_mime: declared_mime.map(str::to_string),
            name: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CodecError> {
        let bytes = std::fs::read(path).map_err(|source| CodecError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            bytes,
            declared_mime: mime_for_path(path).map(str::to_string),
            name: path
                .file_name()
                .and_then(|value| value.to_str())
                .map(str::to_string),
        })
    }
}

impl fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResource")
            .field("bytes", &self.bytes.len())
            .field("declared_mime", &self.declared_mime)
            .field("name", &self.name)
            .finish()
    }
}

/// Self-describing `data:<mime>;base64,<payload>` image.
///
/// Only produced by [`normalize`] or [`CanonicalImage::from_data_uri`], so a
/// value always carries a supported MIME type and a readable header.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalImage {
    mime: String,
    data_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<(u32, u32)>,
}

impl CanonicalImage {
    pub fn from_data_uri(uri: &str) -> Result<Self, CodecError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| CodecError::MalformedDataUri("missing data: scheme".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| CodecError::MalformedDataUri("missing payload separator".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| CodecError::MalformedDataUri("payload is not base64".to_string()))?
            .trim()
            .to_ascii_lowercase();
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|err| CodecError::MalformedDataUri(err.to_string()))?;
        normalize(&ImageResource::from_bytes(bytes, Some(&mime)))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn payload(&self) -> &str {
        self.data_uri
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn bytes(&self) -> Result<Vec<u8>, CodecError> {
        BASE64
            .decode(self.payload().as_bytes())
            .map_err(|err| CodecError::MalformedDataUri(err.to_string()))
    }

    /// Short content id, stable for identical payloads.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payload().as_bytes());
        hex::encode(&hasher.finalize()[..6])
    }

    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl fmt::Debug for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalImage")
            .field("mime", &self.mime)
            .field("digest", &self.digest())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Turns a raw resource into a [`CanonicalImage`].
///
/// The bytes pass through untouched; only the header is decoded to confirm
/// the image is readable. The sniffed format decides the MIME type, a
/// declared type just has to be one we accept.
pub fn normalize(resource: &ImageResource) -> Result<CanonicalImage, CodecError> {
    if resource.bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    if let Some(declared) = resource.declared_mime.as_deref() {
        if !is_supported_mime(declared) {
            return Err(CodecError::UnsupportedType(declared.trim().to_string()));
        }
    }

    let format = image::guess_format(&resource.bytes)
        .map_err(|err| CodecError::Undecodable(err.to_string()))?;
    let mime = mime_for_format(format)
        .ok_or_else(|| CodecError::UnsupportedType(format!("{format:?}").to_ascii_lowercase()))?;
    let dimensions = ImageReader::with_format(Cursor::new(resource.bytes.as_slice()), format)
        .into_dimensions()
        .map_err(|err| CodecError::Undecodable(err.to_string()))?;

    Ok(CanonicalImage {
        mime: mime.to_string(),
        data_uri: format!("data:{mime};base64,{}", BASE64.encode(&resource.bytes)),
        dimensions: Some(dimensions),
    })
}

pub fn is_supported_mime(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered == "image/jpg" || SUPPORTED_MIME_TYPES.contains(&lowered.as_str())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn mime_for_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::{normalize, CanonicalImage, ImageResource};

    pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        encode(width, height, rgb, ImageFormat::Png)
    }

    pub fn encode(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(rgb));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, format)
            .expect("fixture image encodes");
        out.into_inner()
    }

    pub fn canonical(rgb: [u8; 3]) -> CanonicalImage {
        normalize(&ImageResource::from_bytes(
            png_bytes(4, 4, rgb),
            Some("image/png"),
        ))
        .expect("fixture image normalizes")
    }
}
