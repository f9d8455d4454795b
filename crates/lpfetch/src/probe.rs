//! Headless stand-ins for an image element and its decoder

use lowprofile::{LoadError, Materializer, ResourceLocator, VisualTarget};
use parking_lot::Mutex;
use serde::Serialize;

/// What the probe learned about a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    /// Sniffed image format, `"unknown"` if none matched
    pub format: &'static str,
    /// Payload length in bytes
    pub bytes: usize,
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xff\xd8\xff", "jpeg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"BM", "bmp"),
];

/// Sniff the image format from the leading bytes
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("webp");
    }
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, format)| *format)
}

/// Materializer that reports format and size instead of decoding pixels
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteProbe {
    /// Reject payloads with no recognizable image signature
    pub strict: bool,
}

impl Materializer<Probe> for ByteProbe {
    fn materialize(&self, bytes: &[u8]) -> Result<Probe, LoadError> {
        match sniff(bytes) {
            Some(format) => Ok(Probe {
                format,
                bytes: bytes.len(),
            }),
            None if self.strict => Err(LoadError::DecodeFailure(
                "no image signature".to_string(),
            )),
            None => Ok(Probe {
                format: "unknown",
                bytes: bytes.len(),
            }),
        }
    }
}

/// A target that always wants the same locator
#[derive(Debug)]
pub struct HeadlessTarget {
    locator: ResourceLocator,
    value: Mutex<Option<Probe>>,
}

impl HeadlessTarget {
    pub fn new(locator: ResourceLocator) -> Self {
        Self {
            locator,
            value: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn value(&self) -> Option<Probe> {
        self.value.lock().clone()
    }
}

impl VisualTarget for HeadlessTarget {
    type Renderable = Probe;

    fn current_locator(&self) -> Option<ResourceLocator> {
        Some(self.locator.clone())
    }

    fn set_renderable(&self, value: Option<Probe>) {
        *self.value.lock() = value;
    }
}
