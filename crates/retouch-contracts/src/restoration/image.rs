use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// An encoded image threaded between restoration steps.
///
/// Immutable once built; clones share the underlying bytes. Two references are
/// equal when both the media type and the bytes match.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRef {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageRef {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let Some(mime_type) = mime_for_path(path) else {
            bail!("unsupported image type ({})", path.display());
        };
        let bytes = std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        if bytes.is_empty() {
            bail!("image file is empty ({})", path.display());
        }
        Ok(Self::new(mime_type, bytes))
    }

    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("image base64 decode failed")?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(raw: &str) -> Result<Self> {
        let Some(rest) = raw.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, payload)) = rest.split_once(',') else {
            bail!("data URL has no payload");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("data URL is not base64 encoded");
        };
        if !mime_type.starts_with("image/") {
            bail!("data URL media type is not an image ({mime_type})");
        }
        Self::from_base64(mime_type, payload)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mime_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    pub fn short_digest(&self) -> String {
        self.digest()[..12].to_string()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("digest", &self.short_digest())
            .finish()
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_data_url(&raw).map_err(|err| D::Error::custom(format!("{err:#}")))
    }
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
        "heic" | "heif" => Some("image/heic"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{extension_for_mime, mime_for_path, ImageRef};

    #[test]
    fn data_url_carries_mime_and_payload() -> anyhow::Result<()> {
        let image = ImageRef::new("image/jpeg", vec![0xff, 0xd8, 0xff, 0x00]);
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let parsed = ImageRef::from_data_url(&url)?;
        assert_eq!(parsed, image);
        assert_eq!(parsed.extension(), "jpg");
        Ok(())
    }

    #[test]
    fn data_url_rejects_non_images_and_plain_text() {
        assert!(ImageRef::from_data_url("data:text/plain;base64,aGk=").is_err());
        assert!(ImageRef::from_data_url("data:image/png,raw").is_err());
        assert!(ImageRef::from_data_url("https://example.com/a.png").is_err());
    }

    #[test]
    fn equality_is_by_value() {
        let a = ImageRef::new("image/png", vec![1, 2, 3]);
        let b = ImageRef::new("image/png", vec![1, 2, 3]);
        let c = ImageRef::new("image/webp", vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.short_digest().len(), 12);
    }

    #[test]
    fn from_path_reads_bytes_and_infers_mime() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("Grandma.JPG");
        std::fs::write(&path, [9u8, 8, 7])?;

        let image = ImageRef::from_path(&path)?;
        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.bytes(), &[9u8, 8, 7]);

        let unsupported = temp.path().join("notes.txt");
        std::fs::write(&unsupported, "hi")?;
        assert!(ImageRef::from_path(&unsupported).is_err());

        let empty = temp.path().join("empty.png");
        std::fs::write(&empty, b"")?;
        assert!(ImageRef::from_path(&empty).is_err());
        Ok(())
    }

    #[test]
    fn serde_uses_data_url_strings() -> anyhow::Result<()> {
        let image = ImageRef::new("image/png", vec![137, 80, 78, 71]);
        let encoded = serde_json::to_value(&image)?;
        assert_eq!(encoded, serde_json::json!("data:image/png;base64,iVBORw=="));
        let decoded: ImageRef = serde_json::from_value(encoded)?;
        assert_eq!(decoded, image);
        Ok(())
    }

    #[test]
    fn mime_and_extension_tables_agree() {
        assert_eq!(mime_for_path(Path::new("a.webp")), Some("image/webp"));
        assert_eq!(mime_for_path(Path::new("a")), None);
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
