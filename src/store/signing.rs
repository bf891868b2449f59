//! V4 signed URLs for Cloud Storage objects
//!
//! Signing needs the service account's RSA private key, so only key-based
//! credentials can produce signed URLs.

use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use yup_oauth2::ServiceAccountKey;

use super::ObjectId;
use crate::error::{GcsVfsError, Result};

/// Longest lifetime the service accepts for a V4 signature (7 days)
pub const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Unreserved characters stay literal; everything else is escaped
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same as [`QUERY_VALUE`] but keeps path separators
const PATH_SEGMENTS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Signs object URLs with a service-account key
pub struct UrlSigner {
    client_email: String,
    key_pair: RsaKeyPair,
    rng: SystemRandom,
}

impl UrlSigner {
    pub fn from_key(key: &ServiceAccountKey) -> Result<Self> {
        let der = pem_to_der(&key.private_key)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der).map_err(|e| {
            GcsVfsError::CredentialParse(format!("service account private key rejected: {}", e))
        })?;
        Ok(Self {
            client_email: key.client_email.clone(),
            key_pair,
            rng: SystemRandom::new(),
        })
    }

    /// Sign a GET URL for `id` valid for `ttl` from now
    pub fn sign(&self, endpoint: &str, id: &ObjectId, ttl: Duration) -> Result<String> {
        self.sign_at(endpoint, id, ttl, Utc::now())
    }

    fn sign_at(
        &self,
        endpoint: &str,
        id: &ObjectId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let request = CanonicalRequest::new(&self.client_email, endpoint, id, ttl, now)?;
        let string_to_sign = request.string_to_sign();

        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &self.rng,
                string_to_sign.as_bytes(),
                &mut signature,
            )
            .map_err(|_| GcsVfsError::Backend("failed to sign URL".to_string()))?;

        Ok(format!(
            "{}://{}{}?{}&X-Goog-Signature={}",
            request.scheme,
            request.host,
            request.path,
            request.query,
            hex::encode(signature)
        ))
    }
}

/// The parts of a V4 canonical request for a signed GET
struct CanonicalRequest {
    scheme: String,
    host: String,
    path: String,
    query: String,
    timestamp: String,
    scope: String,
}

impl CanonicalRequest {
    fn new(
        client_email: &str,
        endpoint: &str,
        id: &ObjectId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if ttl.as_secs() == 0 || ttl > MAX_SIGNED_URL_TTL {
            return Err(GcsVfsError::NotSupported(format!(
                "signed URL lifetime must be between 1s and {}s",
                MAX_SIGNED_URL_TTL.as_secs()
            )));
        }

        let (scheme, host) = endpoint
            .split_once("://")
            .ok_or_else(|| GcsVfsError::Backend(format!("endpoint without scheme: {}", endpoint)))?;
        let host = host.trim_end_matches('/').to_string();

        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));
        let credential = format!("{}/{}", client_email, scope);

        // Parameters must appear sorted by name
        let params = [
            ("X-Goog-Algorithm", ALGORITHM.to_string()),
            ("X-Goog-Credential", credential),
            ("X-Goog-Date", timestamp.clone()),
            ("X-Goog-Expires", ttl.as_secs().to_string()),
            ("X-Goog-SignedHeaders", "host".to_string()),
        ];
        let query = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, utf8_percent_encode(value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&");

        let path = format!(
            "/{}/{}",
            id.bucket,
            utf8_percent_encode(&id.key, PATH_SEGMENTS)
        );

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            path,
            query,
            timestamp,
            scope,
        })
    }

    fn canonical(&self) -> String {
        format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.path, self.query, self.host
        )
    }

    fn string_to_sign(&self) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA256, self.canonical().as_bytes());
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.timestamp,
            self.scope,
            hex::encode(digest.as_ref())
        )
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    if body.is_empty() {
        return Err(GcsVfsError::CredentialParse(
            "service account private key is empty".to_string(),
        ));
    }
    base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| GcsVfsError::CredentialParse(format!("private key is not valid PEM: {}", e)))
}
