//! Codec collaborator: extension allow-listing, format check and dimension probing.
//! No decoding beyond headers, no transformation.

use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

use super::paths::LogicalName;
use super::types::Dimensions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("extension '{0}' is not allowed")]
    ExtensionNotAllowed(String),
    #[error("content does not match extension '{ext}': {detail}")]
    FormatMismatch { ext: String, detail: String },
    #[error("cannot probe image: {0}")]
    Probe(String),
}

pub trait Codec: Send + Sync {
    /// Whether a name carries an allowed extension. Used where no bytes are involved (rename).
    fn accepts_name(&self, name: &LogicalName) -> Result<(), CodecError>;

    /// Check `bytes` against the extension of `name`.
    fn validate_format(&self, name: &LogicalName, bytes: &[u8]) -> Result<(), CodecError>;

    fn probe(&self, bytes: &[u8]) -> Result<Dimensions, CodecError>;
}

/// Header-only codec backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageCodec {
    allowed_exts: Vec<String>,
}

impl ImageCodec {
    /// Extensions are compared case-insensitively, with or without the leading dot.
    pub fn new<I, S>(allowed_exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_exts = allowed_exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { allowed_exts }
    }

    fn ext_of(name: &LogicalName) -> String {
        name.ext_part().trim_start_matches('.').to_ascii_lowercase()
    }
}

impl Codec for ImageCodec {
    fn accepts_name(&self, name: &LogicalName) -> Result<(), CodecError> {
        let ext = Self::ext_of(name);
        if ext.is_empty() || !self.allowed_exts.iter().any(|a| a == &ext) {
            return Err(CodecError::ExtensionNotAllowed(name.ext_part().to_string()));
        }
        Ok(())
    }

    fn validate_format(&self, name: &LogicalName, bytes: &[u8]) -> Result<(), CodecError> {
        self.accepts_name(name)?;
        let ext = Self::ext_of(name);
        let expected = ImageFormat::from_extension(&ext).ok_or_else(|| CodecError::FormatMismatch {
            ext: ext.clone(),
            detail: "no image format for extension".into(),
        })?;
        let actual = image::guess_format(bytes).map_err(|e| CodecError::FormatMismatch { ext: ext.clone(), detail: e.to_string() })?;
        if actual != expected {
            return Err(CodecError::FormatMismatch { ext, detail: format!("content is {:?}", actual) });
        }
        Ok(())
    }

    fn probe(&self, bytes: &[u8]) -> Result<Dimensions, CodecError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CodecError::Probe(e.to_string()))?;
        let (width, height) = reader.into_dimensions().map_err(|e| CodecError::Probe(e.to_string()))?;
        Ok(Dimensions { width, height })
    }
}
