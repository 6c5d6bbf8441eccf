use std::sync::Arc;

use tracing::info;
use url::Url;

use super::{FilesystemStore, HttpStore, S3Options, S3Store, StoreHandle};
use crate::error::FormatError;

/// Resolve an NGFF root URI to a [`StoreHandle`].
///
/// Recognized forms:
/// - `file:///path/to/image.zarr` or a plain filesystem path,
/// - `http(s)://host[:port]/path/to/image.zarr`,
/// - `s3://host[:port]/bucket/key/prefix/image.zarr?opts` where `opts` are
///   the credential/region options of [`S3Options`].
///
/// The path must contain a `.zarr` directory segment; the handle addresses
/// the group the URI names, which may sit below the `.zarr` directory (label
/// images, for example). S3 URIs carrying user-info are rejected: credentials
/// belong in named profiles or instance metadata, not in URIs.
pub async fn parse_root_uri(uri: &str) -> Result<StoreHandle, FormatError> {
    let handle = if uri.starts_with("http://") || uri.starts_with("https://") {
        parse_http_uri(uri)?
    } else if uri.starts_with("s3://") {
        parse_s3_uri(uri).await?
    } else if let Some(path) = uri.strip_prefix("file://") {
        parse_file_uri(path)?
    } else if uri.contains("://") {
        let scheme = uri.split("://").next().unwrap_or_default();
        return Err(FormatError::InvalidUri(format!(
            "unsupported URI scheme: {}",
            scheme
        )));
    } else {
        parse_file_uri(uri)?
    };
    info!("Resolved NGFF root {} -> {}", uri, handle);
    Ok(handle)
}

/// Index of the first `.zarr` segment, or an error naming the URI.
fn zarr_segment_index(segments: &[&str], uri: &str) -> Result<usize, FormatError> {
    segments
        .iter()
        .position(|s| s.ends_with(".zarr"))
        .ok_or_else(|| {
            FormatError::InvalidUri(format!("no .zarr segment in path: {}", uri))
        })
}

fn parse_file_uri(path: &str) -> Result<StoreHandle, FormatError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let zarr = zarr_segment_index(&segments, path)?;

    // Root the store at the parent of the .zarr directory so the handle
    // prefix starts with the .zarr segment itself.
    let mut root = if path.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };
    root.push_str(&segments[..zarr].join("/"));
    let prefix = segments[zarr..].join("/");

    Ok(StoreHandle::new(
        Arc::new(FilesystemStore::new(root)),
        prefix,
    ))
}

fn parse_http_uri(uri: &str) -> Result<StoreHandle, FormatError> {
    let url = Url::parse(uri).map_err(|e| FormatError::InvalidUri(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| FormatError::InvalidUri(format!("no host in URI: {}", uri)))?;

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    zarr_segment_index(&segments, uri)?;

    let base = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };
    Ok(StoreHandle::new(
        Arc::new(HttpStore::new(base)),
        segments.join("/"),
    ))
}

async fn parse_s3_uri(uri: &str) -> Result<StoreHandle, FormatError> {
    let url = Url::parse(uri).map_err(|e| FormatError::InvalidUri(e.to_string()))?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(FormatError::InvalidUri(
            "found unsupported user information in S3 URI. If you are trying to pass \
             S3 credentials, use either named profiles or instance credentials."
                .to_string(),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| FormatError::InvalidUri(format!("no host in S3 URI: {}", uri)))?;
    let endpoint = match url.port() {
        Some(port) => format!("https://{}:{}", host, port),
        None => format!("https://{}", host),
    };

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let (bucket, rest) = segments
        .split_first()
        .ok_or_else(|| FormatError::InvalidUri(format!("no bucket in S3 URI: {}", uri)))?;
    zarr_segment_index(rest, uri)?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let options = S3Options::from_query_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let store = S3Store::connect(&endpoint, bucket, &options).await?;
    Ok(StoreHandle::new(Arc::new(store), rest.join("/")))
}
