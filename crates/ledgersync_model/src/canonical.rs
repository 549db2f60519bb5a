//! Canonical encoding and content hashing.
//!
//! Entities are encoded as CBOR with struct fields in declaration order and
//! timestamps as RFC 3339 text, so identical entities always produce
//! identical bytes. The content hash is the lowercase hex SHA-256 of those
//! bytes; sync equality is decided by this hash, never by timestamps alone.

use crate::error::{ModelError, ModelResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encodes a value to its canonical CBOR form.
pub fn encode_canonical<T: Serialize + ?Sized>(value: &T) -> ModelResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ModelError::Encoding(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn decode_canonical<T: DeserializeOwned>(bytes: &[u8]) -> ModelResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ModelError::Decoding(e.to_string()))
}

/// Returns the lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        amount: i64,
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = Sample { name: "rent".into(), amount: 120_000 };
        let b = Sample { name: "rent".into(), amount: 120_000 };
        assert_eq!(encode_canonical(&a).unwrap(), encode_canonical(&b).unwrap());
    }

    #[test]
    fn decode_roundtrip() {
        let a = Sample { name: "coffee".into(), amount: -450 };
        let bytes = encode_canonical(&a).unwrap();
        assert_eq!(decode_canonical::<Sample>(&bytes).unwrap(), a);
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(matches!(
            decode_canonical::<Sample>(&[0xFF, 0x00]),
            Err(ModelError::Decoding(_))
        ));
    }
}
