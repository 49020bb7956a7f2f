//! External collaborator that decodes QR codes found in photos.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised while decoding a photo.
    pub enum QrDecodeError {
        /// No QR code was found in the image.
        NotFound => "no QR code found in photo",
        /// The decoder failed.
        Decoder { message: String } => "QR decoder failed: {message}",
    }
}

/// Port for QR decoding (`decode(photo) -> text`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QrDecoder: Send + Sync {
    /// Decode the first QR code in `photo`.
    async fn decode(&self, photo: &[u8]) -> Result<String, QrDecodeError>;
}

/// Fixture decoder that treats the photo bytes as the UTF-8 payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureQrDecoder;

#[async_trait]
impl QrDecoder for FixtureQrDecoder {
    async fn decode(&self, photo: &[u8]) -> Result<String, QrDecodeError> {
        let text = std::str::from_utf8(photo)
            .map_err(|error| QrDecodeError::decoder(error.to_string()))?
            .trim();
        if text.is_empty() {
            return Err(QrDecodeError::not_found());
        }
        Ok(text.to_owned())
    }
}
