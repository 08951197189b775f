//! AWS SigV4 query presigning for object-store requests.
//!
//! Signing is done locally from the bucket credentials; the object store
//! verifies the signature (and the embedded expiry) independently. The
//! signature covers the HTTP method, the exact object path, the query
//! parameters and the signed headers, so a presigned URL authorizes exactly
//! one operation on exactly one key within its window - nothing else.

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::signing::{hex_encode, hmac_sha256};

/// Errors from URL construction or signing setup.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("storage configuration error: {0}")]
    Configuration(String),
}

/// A presigned request: the URL to call and the headers the caller must send
/// verbatim (they are covered by the signature).
#[derive(Debug, Clone)]
pub struct PresignedRequest {
    pub url: Url,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub expires_at: DateTime<Utc>,
}

/// Signs object-store requests with AWS SigV4.
#[derive(Debug, Clone)]
pub struct StorageSigner {
    access_key_id: String,
    secret_access_key: String,
    endpoint: Url,
    region: String,
    bucket: String,
    path_style: bool,
}

impl StorageSigner {
    pub fn new(
        endpoint: &str,
        region: impl Into<String>,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Result<Self, SignError> {
        let endpoint = Url::parse(endpoint).map_err(|e| SignError::Configuration(e.to_string()))?;
        let path_style = is_path_style_default(&endpoint);

        Ok(Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            endpoint,
            region: region.into(),
            bucket: bucket.into(),
            path_style,
        })
    }

    /// Set whether to use path-style URLs.
    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    /// Build the object URL for the given key.
    pub fn build_url(&self, key: &str) -> Result<Url, SignError> {
        if self.path_style {
            // Path-style: https://endpoint/bucket/key
            let mut url = self.endpoint.clone();
            url.set_path(&format!("{}/{}", self.bucket, key));
            Ok(url)
        } else {
            // Virtual-hosted style: https://bucket.endpoint/key
            let host = self
                .endpoint
                .host_str()
                .ok_or_else(|| SignError::Configuration("endpoint has no host".into()))?;
            let mut url = self.endpoint.clone();
            url.set_host(Some(&format!("{}.{}", self.bucket, host)))
                .map_err(|e| SignError::Configuration(format!("invalid host: {e}")))?;
            url.set_path(&format!("/{key}"));
            Ok(url)
        }
    }

    /// Presign a PUT of the given key.
    ///
    /// `extra_headers` (e.g. `cache-control`, `content-type`) become signed
    /// headers: the store rejects the upload if the client changes them.
    pub fn presign_put(
        &self,
        key: &str,
        expires_in: std::time::Duration,
        extra_headers: &[(&str, &str)],
    ) -> Result<PresignedRequest, SignError> {
        let now = Utc::now();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = &timestamp[0..8];
        let expires_secs = expires_in.as_secs();

        // Derive the signing key on demand
        let key_chain = SigningKey::derive(&self.secret_access_key, date, &self.region, "s3");
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);

        let url = self.build_url(key)?;
        let hostname = url
            .host_str()
            .ok_or_else(|| SignError::Configuration("URL missing host".into()))?;
        let host = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };

        let mut headers: Vec<(String, String)> = vec![("host".to_string(), host)];
        for (name, value) in extra_headers {
            headers.push((name.to_lowercase(), value.to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let mut query_params: Vec<(String, String)> = vec![
            ("X-Amz-Algorithm".into(), "AWS4-HMAC-SHA256".into()),
            ("X-Amz-Content-Sha256".into(), "UNSIGNED-PAYLOAD".into()),
            (
                "X-Amz-Credential".into(),
                format!("{}/{}", self.access_key_id, scope),
            ),
            ("X-Amz-Date".into(), timestamp.clone()),
            ("X-Amz-Expires".into(), expires_secs.to_string()),
            ("X-Amz-SignedHeaders".into(), signed_headers.clone()),
        ];

        // SigV4 requires the query sorted alphabetically
        query_params.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_uri = percent_encode_path(url.path());
        let canonical_query: String = query_params
            .iter()
            .map(|(name, value)| format!("{}={}", percent_encode(name), percent_encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let canonical_request = format!(
            "PUT\n{}\n{}\n{}\n\n{}\nUNSIGNED-PAYLOAD",
            canonical_uri, canonical_query, canonical_headers, signed_headers
        );

        use sha2::Digest;
        let digest = sha2::Sha256::digest(canonical_request.as_bytes());
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            timestamp,
            scope,
            hex_encode(&digest)
        );

        let signature = key_chain.sign(string_to_sign.as_bytes());

        let mut url = url.clone();
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &query_params {
                query.append_pair(name, value);
            }
            query.append_pair("X-Amz-Signature", &signature.to_string());
        }

        Ok(PresignedRequest {
            url,
            method: "PUT".to_string(),
            headers,
            expires_at: now + Duration::seconds(expires_secs as i64),
        })
    }
}

/// Determine if path-style URLs should be used by default for this endpoint.
///
/// True for IP addresses and localhost, since virtual-hosted style URLs
/// require DNS resolution of `{bucket}.{host}`.
fn is_path_style_default(endpoint: &Url) -> bool {
    use url::Host;
    match endpoint.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        Some(Host::Domain(domain)) => domain == "localhost",
        None => false,
    }
}

/// AWS SigV4 signing key.
struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Derive a signing key for the given date, region, and service.
    fn derive(secret_key: &str, date: &str, region: &str, service: &str) -> Self {
        let date_key = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
        let region_key = hmac_sha256(&date_key, region.as_bytes());
        let service_key = hmac_sha256(&region_key, service.as_bytes());
        let signing_key = hmac_sha256(&service_key, b"aws4_request");

        Self(signing_key)
    }

    /// Sign a message with this key.
    fn sign(&self, message: &[u8]) -> Signature {
        Signature(hmac_sha256(&self.0, message))
    }
}

/// AWS SigV4 signature.
struct Signature(Vec<u8>);

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex_encode(&self.0))
    }
}

/// Percent-encode a string for SigV4 canonical form.
fn percent_encode(s: &str) -> String {
    use std::fmt::Write;

    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                write!(result, "%{:02X}", byte).expect("writing to a String cannot fail");
            }
        }
    }
    result
}

/// Percent-encode a URL path (preserving slashes).
fn percent_encode_path(path: &str) -> String {
    path.split('/')
        .map(percent_encode)
        .collect::<Vec<_>>()
        .join("/")
}
