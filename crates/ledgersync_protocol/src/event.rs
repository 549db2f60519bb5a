//! Change events.

use chrono::SecondsFormat;
use ledgersync_model::{EntityId, EntityType, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// The entity was created or updated.
    Upsert,
    /// The entity was deleted.
    Delete,
}

impl Operation {
    /// Returns the stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        }
    }
}

/// One local mutation, as recorded in the outbox and shipped in changesets.
///
/// # Fields
///
/// - `base_updated_at`: the entity's `updated_at` before this mutation;
///   `None` for the first creation. It is the optimistic-concurrency anchor.
/// - `payload`/`payload_hash`: present only for upserts. The hash is
///   computed once when the event is recorded.
/// - `deleted_at`: present only for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// Device that produced the event.
    pub device_id: String,
    /// When the event was recorded.
    pub created_at: Timestamp,
    /// Type of the mutated entity.
    pub entity_type: EntityType,
    /// Upsert or delete.
    pub operation: Operation,
    /// The mutated entity.
    pub entity_id: EntityId,
    /// `updated_at` of the entity before this mutation.
    pub base_updated_at: Option<Timestamp>,
    /// `updated_at` of the entity after this mutation.
    pub entity_updated_at: Timestamp,
    /// Canonical entity bytes, for upserts.
    #[serde(default, with = "payload_bytes")]
    pub payload: Option<Vec<u8>>,
    /// Content hash of `payload`.
    pub payload_hash: Option<String>,
    /// Deletion instant, for deletes.
    pub deleted_at: Option<Timestamp>,
}

impl ChangeEvent {
    /// Returns the signature line that feeds the changeset digest.
    ///
    /// The line covers the event id, operation, payload hash, deletion
    /// instant, base instant and entity instant, with absent values empty.
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.event_id,
            self.operation.as_str(),
            self.payload_hash.as_deref().unwrap_or(""),
            fmt_opt(self.deleted_at),
            fmt_opt(self.base_updated_at),
            fmt_ts(self.entity_updated_at),
        )
    }

    /// Whether `other` describes the same mutation of the same entity.
    ///
    /// Compares operation, payload hash and deletion instant, which is the
    /// outbox deduplication rule.
    #[must_use]
    pub fn same_mutation(&self, other: &ChangeEvent) -> bool {
        self.entity_type == other.entity_type
            && self.entity_id == other.entity_id
            && self.operation == other.operation
            && self.payload_hash == other.payload_hash
            && self.deleted_at == other.deleted_at
    }
}

fn fmt_ts(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fmt_opt(ts: Option<Timestamp>) -> String {
    ts.map(fmt_ts).unwrap_or_default()
}

/// Serializes payloads as a byte string instead of an integer array.
mod payload_bytes {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&Bytes(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        d.deserialize_option(OptionVisitor)
    }

    struct Bytes<'a>(&'a [u8]);

    impl serde::Serialize for Bytes<'_> {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_bytes(self.0)
        }
    }

    struct OptionVisitor;

    impl<'de> Visitor<'de> for OptionVisitor {
        type Value = Option<Vec<u8>>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("optional byte string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_bytes(BytesVisitor).map(Some)
        }
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("byte string or byte array")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    pub(crate) fn upsert_event(n: u8, hash: &str) -> ChangeEvent {
        ChangeEvent {
            event_id: Uuid::from_bytes([n; 16]),
            device_id: "device-a".into(),
            created_at: ts(100),
            entity_type: EntityType::Transaction,
            operation: Operation::Upsert,
            entity_id: EntityId::from_bytes([9; 16]),
            base_updated_at: Some(ts(50)),
            entity_updated_at: ts(100),
            payload: Some(vec![0xA1, 0x01, 0x02]),
            payload_hash: Some(hash.into()),
            deleted_at: None,
        }
    }

    #[test]
    fn signature_layout() {
        let e = upsert_event(1, "abc");
        assert_eq!(
            e.signature(),
            "01010101-0101-0101-0101-010101010101|upsert|abc||\
             1970-01-01T00:00:50.000000Z|1970-01-01T00:01:40.000000Z"
        );
    }

    #[test]
    fn same_mutation_ignores_event_identity() {
        let a = upsert_event(1, "abc");
        let b = upsert_event(2, "abc");
        let c = upsert_event(3, "def");
        assert!(a.same_mutation(&b));
        assert!(!a.same_mutation(&c));
    }

    #[test]
    fn payload_survives_json_and_cbor() {
        let e = upsert_event(1, "abc");

        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(serde_json::from_str::<ChangeEvent>(&json).unwrap(), e);

        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&e, &mut cbor).unwrap();
        let back: ChangeEvent = ciborium::de::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn missing_payload_decodes_as_none() {
        let mut e = upsert_event(1, "abc");
        e.operation = Operation::Delete;
        e.payload = None;
        e.payload_hash = None;
        e.deleted_at = Some(ts(120));

        let json = serde_json::to_value(&e).unwrap();
        let mut obj = json.as_object().unwrap().clone();
        obj.remove("payload");
        let back: ChangeEvent = serde_json::from_value(obj.into()).unwrap();
        assert_eq!(back.payload, None);
    }
}
