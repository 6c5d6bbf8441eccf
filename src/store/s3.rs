use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ObjectStore;
use crate::error::{FormatError, IoError};

/// Credential and region selection for an S3 root, parsed from the URI query
/// string.
///
/// Exactly one credential source applies:
/// - `anonymous=true` — anonymous access,
/// - `accessKeyId` + `secretAccessKey` — static credentials,
/// - `profile=<name>` — a named profile,
/// - none of the above — the default chain (profile, then instance profile).
///
/// Credentials supplied through process environment variables are rejected
/// outright; see `reject_ambient_credentials`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Options {
    pub anonymous: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl S3Options {
    /// Collect recognized options from `key=value` query pairs.
    ///
    /// Unrecognized keys are ignored.
    pub fn from_query_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut options = S3Options::default();
        for (key, value) in pairs {
            match key {
                "anonymous" => options.anonymous = value == "true",
                "accessKeyId" => options.access_key_id = Some(value.to_string()),
                "secretAccessKey" => options.secret_access_key = Some(value.to_string()),
                "profile" => options.profile = Some(value.to_string()),
                "region" => options.region = Some(value.to_string()),
                _ => {}
            }
        }
        options
    }
}

/// Fail if AWS credentials are present in the process environment.
///
/// Ambient credentials would be silently shared across every image served by
/// the process; callers must use per-URI options, named profiles, or
/// instance credentials instead.
pub fn reject_ambient_credentials() -> Result<(), FormatError> {
    for var in [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
    ] {
        if std::env::var_os(var).is_some() {
            return Err(FormatError::InvalidCredentials(format!(
                "AWS credentials supplied by environment variables are not supported \
                 ({} is set). Please use either named profiles or instance profile \
                 credentials.",
                var
            )));
        }
    }
    Ok(())
}

/// Process-wide S3 clients, one per endpoint/bucket pair.
///
/// Clients hold connection pools and credential state worth sharing across
/// every buffer that reads from the same bucket.
static CLIENTS: OnceLock<Mutex<HashMap<String, Client>>> = OnceLock::new();

async fn client_for(
    endpoint: &str,
    bucket: &str,
    options: &S3Options,
) -> Result<Client, FormatError> {
    reject_ambient_credentials()?;

    let cache_key = format!("{}/{}", endpoint, bucket);
    let clients = CLIENTS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut clients = clients.lock().await;
    if let Some(client) = clients.get(&cache_key) {
        debug!("Reusing S3 client for {}", cache_key);
        return Ok(client.clone());
    }
    info!("Creating S3 client for {}", cache_key);

    let region = options
        .region
        .clone()
        .unwrap_or_else(|| "us-east-1".to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region))
        .endpoint_url(endpoint.to_string());

    if options.anonymous {
        debug!("Using anonymous credentials");
        loader = loader.no_credentials();
    } else if let (Some(access_key_id), Some(secret_access_key)) =
        (&options.access_key_id, &options.secret_access_key)
    {
        debug!("Using static credentials");
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key_id.clone(),
            secret_access_key.clone(),
            None,
            None,
            "ngff-uri",
        ));
    } else if let Some(profile) = &options.profile {
        debug!("Using profile credentials: {}", profile);
        loader = loader.credentials_provider(
            aws_config::profile::ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build(),
        );
    }
    // Otherwise the default chain applies: profile, then instance profile.

    let sdk_config = loader.load().await;

    // Path-style addressing keeps bucket names out of DNS, which S3-compatible
    // services generally require.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    let client = Client::from_conf(s3_config);
    clients.insert(cache_key, client.clone());
    Ok(client)
}

/// S3-backed store for one bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
    identifier: String,
}

impl S3Store {
    /// Connect to `bucket` behind `endpoint` (e.g. `https://host:port`).
    ///
    /// Clients are cached per endpoint/bucket pair and shared process-wide.
    pub async fn connect(
        endpoint: &str,
        bucket: &str,
        options: &S3Options,
    ) -> Result<Self, FormatError> {
        let client = client_for(endpoint, bucket, options).await?;
        let identifier = format!("{}/{}", endpoint, bucket);
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            identifier,
        })
    }

    /// The bucket this store reads from.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IoError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);
                if no_such_key || status_is_404 {
                    return Ok(None);
                }
                return Err(IoError::S3(e.to_string()));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();
        Ok(Some(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
