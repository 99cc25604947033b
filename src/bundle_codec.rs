//! Canonical bundle wire format (spec.md §6): canonical JSON → gzip → Base64.
//! The proposer's signature is computed over the pre-gzip canonical JSON;
//! the gzip+Base64 text is what actually gets uploaded to the content store.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use crate::model::BundleBody;
use crate::util::Base64Bytes;

#[derive(Debug, thiserror::Error)]
pub enum BundleCodecError {
    #[error("failed to serialize bundle body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("gzip encode failed: {0}")]
    Gzip(std::io::Error),
    #[error("gzip decode failed: {0}")]
    Gunzip(std::io::Error),
    #[error("base64 decode failed: {0}")]
    Base64(base64::DecodeError),
}

/// The canonical pre-gzip JSON of a bundle body. This is what gets signed.
pub fn canonical_json(body: &BundleBody) -> Result<Vec<u8>, BundleCodecError> {
    Ok(serde_json::to_vec(body)?)
}

/// gzip + Base64 the canonical JSON, producing the content-store payload.
pub fn encode(body: &BundleBody) -> Result<String, BundleCodecError> {
    let json = canonical_json(body)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(BundleCodecError::Gzip)?;
    let gzipped = encoder.finish().map_err(BundleCodecError::Gzip)?;
    Ok(Base64Bytes::encode(gzipped).to_string())
}

/// Reverses [`encode`]: Base64-decode, gunzip, parse JSON. Used by tests and
/// by operators replaying a bundle from its content-store payload.
pub fn decode(payload: &str) -> Result<BundleBody, BundleCodecError> {
    let gzipped = Base64Bytes::from(payload.as_bytes())
        .decode()
        .map_err(BundleCodecError::Base64)?;
    let mut decoder = GzDecoder::new(gzipped.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(BundleCodecError::Gunzip)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_bundle_body() {
        let body = BundleBody {
            bundle: vec![],
            nonce: 42,
        };
        let encoded = encode(&body).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.nonce, 42);
        assert!(decoded.bundle.is_empty());
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(decode("not base64 at all!!").is_err());
    }
}
