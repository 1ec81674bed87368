use image::ImageFormat;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("No file provided")]
    Empty,
    #[error("File too large (limit is {limit} bytes)")]
    TooLarge { limit: usize },
    #[error("Unsupported image format")]
    UnsupportedFormat,
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Empty => "missing_file",
            UploadError::TooLarge { .. } => "file_too_large",
            UploadError::UnsupportedFormat => "unsupported_format",
        }
    }
}

/// A size-checked image whose format was sniffed from its magic bytes,
/// plus the opaque metadata string the caller wants forwarded.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    bytes: Vec<u8>,
    format: ImageFormat,
    meta: Option<String>,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, meta: Option<String>, max_bytes: usize) -> Result<Self, UploadError> {
        Self::validate_size(&bytes, max_bytes)?;
        let format = image::guess_format(&bytes).map_err(|_| UploadError::UnsupportedFormat)?;
        Self::extract_file_extension(format)?;
        Ok(Self {
            bytes,
            format,
            meta: meta.filter(|m| !m.is_empty()),
        })
    }

    pub fn validate_size(bytes: &[u8], max_bytes: usize) -> Result<(), UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > max_bytes {
            return Err(UploadError::TooLarge { limit: max_bytes });
        }
        Ok(())
    }

    pub fn extract_file_extension(format: ImageFormat) -> Result<&'static str, UploadError> {
        match format {
            ImageFormat::Jpeg => Ok("jpg"),
            ImageFormat::Png => Ok("png"),
            ImageFormat::WebP => Ok("webp"),
            ImageFormat::Gif => Ok("gif"),
            ImageFormat::Bmp => Ok("bmp"),
            ImageFormat::Tiff => Ok("tiff"),
            _ => Err(UploadError::UnsupportedFormat),
        }
    }

    pub fn file_name(&self) -> String {
        let extension = Self::extract_file_extension(self.format).unwrap_or("jpg");
        format!("upload.{}", extension)
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn meta(&self) -> Option<&str> {
        self.meta.as_deref()
    }

    pub fn into_parts(self) -> (Vec<u8>, Option<String>) {
        (self.bytes, self.meta)
    }
}

#[cfg(test)]
pub(crate) const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];
