//! Group attribute reading and array opening.

use std::sync::Arc;

use serde_json::Map;
use tracing::debug;

use super::{ArrayMetadata, ZarrArray};
use crate::error::FormatError;
use crate::store::StoreHandle;

/// Read the `.zattrs` attribute map of the group at `handle`.
///
/// A group without a `.zattrs` file has an empty attribute map; this is not
/// an error. Malformed JSON is.
pub async fn read_attributes(
    handle: &StoreHandle,
) -> Result<Map<String, serde_json::Value>, FormatError> {
    debug!("Reading group attributes at {}", handle);
    let Some(bytes) = handle.get(".zattrs").await.map_err(FormatError::Io)? else {
        return Ok(Map::new());
    };
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| FormatError::InvalidMetadata(format!(".zattrs at {}: {}", handle, e)))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(FormatError::InvalidMetadata(format!(
            ".zattrs at {} is not a JSON object",
            handle
        ))),
    }
}

/// Open the Zarr array at `handle`, reading and validating its `.zarray`.
pub async fn open_array(handle: &StoreHandle) -> Result<Arc<ZarrArray>, FormatError> {
    debug!("Opening Zarr array at {}", handle);
    let bytes = handle
        .get(".zarray")
        .await
        .map_err(FormatError::Io)?
        .ok_or_else(|| {
            FormatError::InvalidMetadata(format!("no .zarray found at {}", handle))
        })?;
    let metadata = ArrayMetadata::from_json(&bytes)?;
    Ok(Arc::new(ZarrArray::new(handle.clone(), metadata)))
}
