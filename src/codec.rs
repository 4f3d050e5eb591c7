use serde::Serialize;
use serde::de::DeserializeOwned;
use anyhow::Context;
use crate::Result;

/// Encodes a replica state or a delta as CBOR, so that it can cross a process boundary.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_cbor::to_vec(value).context("failed to encode CBOR payload")
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_cbor::from_slice(bytes).context("failed to decode CBOR payload")
}
