//! Cached payloads.

use crate::core::error::{RegistryError, RegistryResult};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// A generated payload in plain and gzip form.
///
/// Built once per key per generation and never mutated; a regeneration
/// produces a new value.
#[derive(Debug)]
pub struct CacheValue {
    payload: String,
    gzipped: Option<Bytes>,
    generation: u64,
}

impl CacheValue {
    /// Build a value, compressing non-empty payloads.
    pub fn new(payload: String, generation: u64) -> RegistryResult<Self> {
        let gzipped = if payload.is_empty() {
            None
        } else {
            Some(gzip(payload.as_bytes())?)
        };
        Ok(Self {
            payload,
            gzipped,
            generation,
        })
    }

    /// A value standing for "no payload" (missing entity or failed generation).
    pub fn empty(generation: u64) -> Self {
        Self {
            payload: String::new(),
            gzipped: None,
            generation,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn gzipped(&self) -> Option<&Bytes> {
        self.gzipped.as_ref()
    }

    /// Generation number assigned when this value was built.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

fn gzip(data: &[u8]) -> RegistryResult<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|e| RegistryError::Compression {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_matches_payload() {
        let value = CacheValue::new("{\"applications\":[]}".to_string(), 3).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(value.gzipped().unwrap().as_ref())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, value.payload());
        assert_eq!(value.generation(), 3);
    }

    #[test]
    fn test_empty_payload_has_no_gzip() {
        let value = CacheValue::new(String::new(), 1).unwrap();
        assert!(value.is_empty());
        assert!(value.gzipped().is_none());
        assert!(CacheValue::empty(2).is_empty());
    }
}
