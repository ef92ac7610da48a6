//! AWS Signature Version 4
//!
//! Two flavours are needed: `Authorization`-header signing for the JSON
//! control-plane calls, and query-string presigning for the signaling
//! WebSocket (browsers and most WebSocket clients cannot set headers on
//! the upgrade request, so the relay accepts a presigned URL instead).

use crate::config::Credentials;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_FORMAT: &str = "%Y%m%d";

/// Signs requests for one service in one region
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    /// Create a signer
    pub fn new(credentials: Credentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    /// Compute the headers that authenticate a request
    ///
    /// `headers` are additional headers that must be covered by the
    /// signature (e.g. `content-type`); `host` and `x-amz-date` are always
    /// signed. Returns the headers to add to the request, in order:
    /// `x-amz-date`, optional `x-amz-security-token`, `authorization`.
    pub fn sign_headers(
        &self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let host = host_header(url)?;

        let mut signed: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        signed.push(("host".to_string(), host));
        signed.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            signed.push(("x-amz-security-token".to_string(), token.clone()));
        }
        signed.sort();

        let canonical_headers: String = signed
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        let signed_headers = signed
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri(url),
            canonical_query(&query),
            canonical_headers,
            signed_headers,
            hex_sha256(payload)
        );

        let scope = self.scope(&now);
        let signature = self.signature(&canonical_request, &amz_date, &scope, &now);

        let mut out = vec![("x-amz-date".to_string(), amz_date)];
        if let Some(token) = &self.credentials.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out.push((
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
            ),
        ));

        Ok(out)
    }

    /// Presign `url` so that a plain GET (or WebSocket upgrade) is accepted
    ///
    /// Existing query parameters are kept and covered by the signature.
    pub fn presign_url(&self, url: &Url, expires: Duration, now: DateTime<Utc>) -> Result<Url> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let scope = self.scope(&now);
        let host = host_header(url)?;

        let mut query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        query.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
        query.push((
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.credentials.access_key_id, scope),
        ));
        query.push(("X-Amz-Date".to_string(), amz_date.clone()));
        query.push(("X-Amz-Expires".to_string(), expires.as_secs().to_string()));
        query.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
        if let Some(token) = &self.credentials.session_token {
            query.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }

        let canonical_query = canonical_query(&query);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri(url),
            canonical_query,
            host,
            hex_sha256(b"")
        );

        let signature = self.signature(&canonical_request, &amz_date, &scope, &now);

        let presigned = format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            url.scheme(),
            host,
            url.path(),
            canonical_query,
            signature
        );

        Url::parse(&presigned)
            .map_err(|e| Error::InvalidConfig(format!("Invalid presigned URL: {}", e)))
    }

    fn scope(&self, now: &DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            now.format(DATE_FORMAT),
            self.region,
            self.service
        )
    }

    fn signature(
        &self,
        canonical_request: &str,
        amz_date: &str,
        scope: &str,
        now: &DateTime<Utc>,
    ) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            &now.format(DATE_FORMAT).to_string(),
            &self.region,
            &self.service,
        );

        hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()))
    }
}

/// Derive the per-day signing key
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidConfig(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        uri_encode(path, false)
    }
}

fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding as SigV4 defines it; `/` is kept in paths
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
