//! Placeholder QR decoder for deployments without an image backend.

use async_trait::async_trait;

use crate::domain::ports::{QrDecodeError, QrDecoder};

/// Decoder that rejects every photo, asking users to send the link instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableQrDecoder;

#[async_trait]
impl QrDecoder for UnavailableQrDecoder {
    async fn decode(&self, _photo: &[u8]) -> Result<String, QrDecodeError> {
        Err(QrDecodeError::decoder(
            "photo decoding is not enabled; send the QR code link as text",
        ))
    }
}
