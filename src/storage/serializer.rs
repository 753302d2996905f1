//! Document serialization seam
//!
//! The storage core treats documents as opaque: anything with a symmetric
//! byte encoding can be stored. The default serializer round-trips
//! `serde_json::Value` documents, which is what the event-stream layer
//! feeds through.

use serde_json::Value;

use super::errors::{StorageError, StorageResult};

/// Symmetric document codec: `decode(encode(doc)) == doc`.
pub trait Serializer {
    /// The document type this serializer handles.
    type Doc;

    /// Encode a document into its stored byte form.
    fn encode(&self, doc: &Self::Doc) -> StorageResult<Vec<u8>>;

    /// Decode a document from its stored byte form.
    fn decode(&self, bytes: &[u8]) -> StorageResult<Self::Doc>;
}

/// JSON codec over `serde_json::Value` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    type Doc = Value;

    fn encode(&self, doc: &Value) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(doc).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let serializer = JsonSerializer;
        let doc = json!({"type": "OrderPlaced", "amount": 42});

        let bytes = serializer.encode(&doc).unwrap();
        assert_eq!(serializer.decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let serializer = JsonSerializer;
        assert!(matches!(
            serializer.decode(b"{{nope").unwrap_err(),
            StorageError::Serialization(_)
        ));
    }

    #[test]
    fn test_unicode_payloads_roundtrip() {
        let serializer = JsonSerializer;
        for text in ["foo-üöälß", "bar-日本語"] {
            let doc = json!({ "text": text });
            let bytes = serializer.encode(&doc).unwrap();
            assert_eq!(serializer.decode(&bytes).unwrap(), doc);
        }
    }
}
