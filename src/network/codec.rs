//! JSON conversion of protocol objects to and from bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::consensus::types::PeerInfo;
use crate::utils::{Result, SimplexError};

/// Short name of `T` for error messages (`Vote`, not `simplex_consensus::consensus::types::Vote`).
fn type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

pub fn to_bytes<T: Serialize + ?Sized>(object: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(object).map_err(|e| {
        SimplexError::IllegalState(format!(
            "Unexpected error when converting '{}' to a byte array: {e}",
            type_name::<T>()
        ))
    })
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        SimplexError::IllegalState(format!(
            "Unexpected error when converting from a byte array to '{}': {e}",
            type_name::<T>()
        ))
    })
}

/// Decode the details of a peer connect/disconnect event.
pub fn peer_info_from_json(json: &str) -> Result<PeerInfo> {
    let info: PeerInfo = serde_json::from_str(json).map_err(|e| {
        SimplexError::IllegalState(format!(
            "Unexpected error when getting peer information from JSON string: {e}"
        ))
    })?;
    info.validate()?;
    Ok(info)
}
