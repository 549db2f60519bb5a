//! CBOR encoding of remote documents.

use crate::error::{ProtocolError, ProtocolResult};
use crate::PROTOCOL_VERSION;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A remote document that records the protocol version it was written with.
pub trait Versioned {
    /// Version recorded in the document.
    fn protocol_version(&self) -> u32;
}

/// Encodes a document to CBOR.
pub fn encode_document<T: Serialize>(document: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(document, &mut bytes)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a document from CBOR and checks its protocol version.
pub fn decode_document<T: DeserializeOwned + Versioned>(bytes: &[u8]) -> ProtocolResult<T> {
    let document: T =
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    let found = document.protocol_version();
    if found != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            found,
        });
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::Changeset;
    use crate::event::tests::{ts, upsert_event};
    use crate::index::RemoteIndex;

    #[test]
    fn changeset_document_roundtrip() {
        let cs = Changeset::new(1, "device-a", ts(1), vec![upsert_event(1, "aa")]);
        let bytes = encode_document(&cs).unwrap();
        let back: Changeset = decode_document(&bytes).unwrap();
        assert_eq!(back, cs);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut index = RemoteIndex::empty(ts(0));
        index.protocol_version = 1;
        let bytes = encode_document(&index).unwrap();
        assert_eq!(
            decode_document::<RemoteIndex>(&bytes),
            Err(ProtocolError::UnsupportedVersion {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(
            decode_document::<RemoteIndex>(b"not cbor at all"),
            Err(ProtocolError::Decode(_))
        ));
    }
}
