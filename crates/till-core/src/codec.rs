//! CBOR encoding for values stored in SQLite blobs.
//!
//! Payloads and sale items are stored as CBOR so the schema of a blob
//! follows the Rust type, not a hand-maintained column list.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entity::SaleItem;
use crate::error::CoreError;
use crate::mutation::MutationPayload;

/// Encode any serializable value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode CBOR bytes into a value.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// Encode a mutation payload for the log.
pub fn encode_payload(payload: &MutationPayload) -> Result<Vec<u8>, CoreError> {
    to_cbor(payload)
}

/// Decode a mutation payload from the log.
pub fn decode_payload(bytes: &[u8]) -> Result<MutationPayload, CoreError> {
    from_cbor(bytes)
}

/// Encode sale items for the `sales.items` column.
pub fn encode_items(items: &[SaleItem]) -> Result<Vec<u8>, CoreError> {
    to_cbor(&items)
}

/// Decode sale items from the `sales.items` column.
pub fn decode_items(bytes: &[u8]) -> Result<Vec<SaleItem>, CoreError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    from_cbor(bytes)
}
