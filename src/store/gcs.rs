//! Cloud Storage JSON API backend
//!
//! Talks to `storage.googleapis.com` (or an override such as a local
//! emulator) with bearer tokens from the configured [`TokenProvider`].
//! Uploads larger than one chunk use a resumable session; downloads are
//! fetched as ranged requests of one chunk each.
//!
//! [`TokenProvider`]: crate::auth::TokenProvider

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::DateTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};
use yup_oauth2::ServiceAccountKey;

use super::signing::UrlSigner;
use super::{
    ByteStream, ListEntry, ListPage, NewObject, ObjectId, ObjectMeta, ObjectStore, ObjectWriter,
};
use crate::auth::{SharedTokenProvider, DEVSTORAGE_FULL_CONTROL};
use crate::error::{GcsVfsError, Result};

/// Default service location
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Resumable upload chunks must be multiples of this size
const UPLOAD_GRANULARITY: usize = 256 * 1024;

/// Object names are sent as single, fully escaped path segments
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Settings for a [`GcsStore`]
pub struct GcsStoreConfig {
    /// Endpoint override; `None` targets the default service location
    pub endpoint: Option<String>,
    pub token_provider: SharedTokenProvider,
    /// Key used to sign URLs, when the credentials carry one
    pub signing_key: Option<ServiceAccountKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    bucket: String,
    name: String,
    size: Option<String>,
    updated: Option<String>,
    generation: Option<String>,
    content_type: Option<String>,
    kms_key_name: Option<String>,
}

impl ObjectResource {
    fn into_meta(self) -> ObjectMeta {
        let updated = self
            .updated
            .as_deref()
            .and_then(|u| DateTime::parse_from_rfc3339(u).ok())
            .map(SystemTime::from)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        ObjectMeta {
            id: ObjectId::new(self.bucket, self.name),
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            updated,
            generation: self.generation.and_then(|g| g.parse().ok()).unwrap_or(0),
            content_type: self.content_type,
            kms_key_name: self.kms_key_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    prefixes: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    rewrite_token: Option<String>,
    resource: Option<ObjectResource>,
}

/// Shared HTTP state, also held by open writers and read streams
struct GcsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: SharedTokenProvider,
}

impl GcsClient {
    fn bucket_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}",
            self.base_url,
            utf8_percent_encode(bucket, OBJECT_NAME)
        )
    }

    fn object_url(&self, id: &ObjectId) -> String {
        format!(
            "{}/o/{}",
            self.bucket_url(&id.bucket),
            utf8_percent_encode(&id.key, OBJECT_NAME)
        )
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.base_url,
            utf8_percent_encode(bucket, OBJECT_NAME)
        )
    }

    /// Build a request with the current bearer token attached
    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let request = self.http.request(method, url);
        let token = self
            .tokens
            .get_token(&[DEVSTORAGE_FULL_CONTROL])
            .await
            .map_err(|e| GcsVfsError::Backend(format!("Failed to obtain access token: {}", e)))?;
        Ok(match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(request: RequestBuilder, what: &str) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| GcsVfsError::Backend(format!("GCS {} request failed: {}", what, e)))
    }

    /// Turn a non-success response into an error carrying the body
    async fn check(response: Response, what: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(GcsVfsError::NotFound(format!("GCS {}: {}", what, body)));
        }
        Err(GcsVfsError::Backend(format!(
            "GCS {} returned {}: {}",
            what, status, body
        )))
    }

    async fn resource(response: Response, what: &str) -> Result<ObjectMeta> {
        let resource: ObjectResource = response
            .json()
            .await
            .map_err(|e| GcsVfsError::Backend(format!("GCS {} response: {}", what, e)))?;
        Ok(resource.into_meta())
    }

    async fn upload_media(&self, object: &NewObject, data: Bytes) -> Result<ObjectMeta> {
        let mut query = vec![
            ("uploadType", "media".to_string()),
            ("name", object.id.key.clone()),
        ];
        if let Some(kms) = &object.kms_key_name {
            query.push(("kmsKeyName", kms.clone()));
        }

        let request = self
            .request(Method::POST, &self.upload_url(&object.id.bucket))
            .await?
            .query(&query)
            .header(
                header::CONTENT_TYPE,
                object
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )
            .body(data);

        let response = Self::check(Self::send(request, "insert").await?, "insert").await?;
        Self::resource(response, "insert").await
    }

    /// Open a resumable upload session and return its URI
    async fn start_session(&self, object: &NewObject) -> Result<String> {
        let mut query = vec![
            ("uploadType", "resumable".to_string()),
            ("name", object.id.key.clone()),
        ];
        if let Some(kms) = &object.kms_key_name {
            query.push(("kmsKeyName", kms.clone()));
        }

        let mut metadata = serde_json::json!({ "name": object.id.key });
        if let Some(content_type) = &object.content_type {
            metadata["contentType"] = serde_json::Value::String(content_type.clone());
        }

        let request = self
            .request(Method::POST, &self.upload_url(&object.id.bucket))
            .await?
            .query(&query)
            .json(&metadata);

        let response = Self::check(Self::send(request, "resumable start").await?, "resumable start")
            .await?;
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                GcsVfsError::Backend("GCS resumable start: missing session location".to_string())
            })
    }
}

/// Cloud Storage backend
pub struct GcsStore {
    client: Arc<GcsClient>,
    signer: Option<UrlSigner>,
}

impl GcsStore {
    pub fn new(config: GcsStoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            // Resumable uploads answer 308 without a redirect target
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GcsVfsError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = config
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        let signer = config
            .signing_key
            .as_ref()
            .map(UrlSigner::from_key)
            .transpose()?;

        debug!("GCS store targeting {}", base_url);

        Ok(Self {
            client: Arc::new(GcsClient {
                http,
                base_url,
                tokens: config.token_provider,
            }),
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.client.base_url
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        trace!("bucket_exists: {}", bucket);
        let url = self.client.bucket_url(bucket);
        let request = self.client.request(Method::GET, &url).await?;
        match GcsClient::check(GcsClient::send(request, "buckets.get").await?, "buckets.get").await {
            Ok(_) => Ok(true),
            Err(GcsVfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, id: &ObjectId) -> Result<Option<ObjectMeta>> {
        trace!("get: {}", id);
        let request = self
            .client
            .request(Method::GET, &self.client.object_url(id))
            .await?;
        match GcsClient::check(GcsClient::send(request, "objects.get").await?, "objects.get").await {
            Ok(response) => GcsClient::resource(response, "objects.get").await.map(Some),
            Err(GcsVfsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
        page_token: Option<&str>,
    ) -> Result<ListPage> {
        trace!(
            "list: bucket={} prefix={:?} delimited={} token={:?}",
            bucket,
            prefix,
            delimited,
            page_token
        );

        let mut query: Vec<(&str, &str)> = Vec::new();
        if !prefix.is_empty() {
            query.push(("prefix", prefix));
        }
        if delimited {
            query.push(("delimiter", "/"));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let url = format!("{}/o", self.client.bucket_url(bucket));
        let request = self.client.request(Method::GET, &url).await?.query(&query);
        let response =
            GcsClient::check(GcsClient::send(request, "objects.list").await?, "objects.list")
                .await?;
        let listing: ListResponse = response
            .json()
            .await
            .map_err(|e| GcsVfsError::Backend(format!("GCS objects.list response: {}", e)))?;

        let mut entries: Vec<ListEntry> = listing
            .items
            .into_iter()
            .map(|item| ListEntry::Object(item.into_meta()))
            .chain(listing.prefixes.into_iter().map(ListEntry::Prefix))
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(ListPage {
            entries,
            next_page_token: listing.next_page_token,
        })
    }

    async fn create(&self, object: &NewObject, data: Bytes) -> Result<ObjectMeta> {
        debug!("create: {} ({} bytes)", object.id, data.len());
        self.client.upload_media(object, data).await
    }

    async fn open_writer(&self, object: &NewObject) -> Result<Box<dyn ObjectWriter>> {
        // Round the chunk size down to the upload granularity
        let chunk_size = (object.chunk_size / UPLOAD_GRANULARITY).max(1) * UPLOAD_GRANULARITY;
        Ok(Box::new(GcsWriter {
            client: self.client.clone(),
            object: object.clone(),
            chunk_size,
            buffer: BytesMut::new(),
            session: None,
            offset: 0,
        }))
    }

    fn read(&self, id: &ObjectId, chunk_size: usize) -> ByteStream {
        let client = self.client.clone();
        let url = self.client.object_url(id);
        let chunk_size = chunk_size.max(1) as u64;

        Box::pin(try_stream! {
            let mut offset: u64 = 0;
            loop {
                let range = format!("bytes={}-{}", offset, offset + chunk_size - 1);
                let request = client
                    .request(Method::GET, &url)
                    .await?
                    .query(&[("alt", "media")])
                    .header(header::RANGE, range);
                let response = GcsClient::send(request, "objects.get media").await?;

                if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
                    break;
                }
                let ranged = response.status() == StatusCode::PARTIAL_CONTENT;
                let response = GcsClient::check(response, "objects.get media").await?;
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| GcsVfsError::Backend(format!("GCS read body error: {}", e)))?;

                let len = body.len() as u64;
                if len > 0 {
                    yield body;
                }
                // A full response or a short range means the object is exhausted
                if !ranged || len < chunk_size {
                    break;
                }
                offset += len;
            }
        })
    }

    async fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        trace!("read_range: {} offset={} len={}", id, offset, len);
        if len == 0 {
            return Ok(Bytes::new());
        }
        let request = self
            .client
            .request(Method::GET, &self.client.object_url(id))
            .await?
            .query(&[("alt", "media")])
            .header(
                header::RANGE,
                format!("bytes={}-{}", offset, offset.saturating_add(len - 1)),
            );
        let response = GcsClient::send(request, "objects.get media").await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        let ranged = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = GcsClient::check(response, "objects.get media")
            .await?
            .bytes()
            .await
            .map_err(|e| GcsVfsError::Backend(format!("GCS read body error: {}", e)))?;
        if ranged {
            return Ok(body);
        }
        // Server ignored the range and sent the whole object
        let start = (offset as usize).min(body.len());
        let end = (offset.saturating_add(len) as usize).min(body.len());
        Ok(body.slice(start..end))
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        debug!("delete: {}", id);
        let request = self
            .client
            .request(Method::DELETE, &self.client.object_url(id))
            .await?;
        match GcsClient::check(GcsClient::send(request, "objects.delete").await?, "objects.delete")
            .await
        {
            Ok(_) => Ok(true),
            Err(GcsVfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn copy(
        &self,
        source: &ObjectId,
        destination: &ObjectId,
        kms_key_name: Option<&str>,
    ) -> Result<ObjectMeta> {
        debug!("copy: {} -> {}", source, destination);
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.client.object_url(source),
            utf8_percent_encode(&destination.bucket, OBJECT_NAME),
            utf8_percent_encode(&destination.key, OBJECT_NAME)
        );

        let mut rewrite_token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(kms) = kms_key_name {
                query.push(("destinationKmsKeyName", kms.to_string()));
            }
            if let Some(token) = &rewrite_token {
                query.push(("rewriteToken", token.clone()));
            }

            let request = self
                .client
                .request(Method::POST, &url)
                .await?
                .query(&query)
                .json(&serde_json::json!({}));
            let response =
                GcsClient::check(GcsClient::send(request, "objects.rewrite").await?, "objects.rewrite")
                    .await?;
            let rewrite: RewriteResponse = response.json().await.map_err(|e| {
                GcsVfsError::Backend(format!("GCS objects.rewrite response: {}", e))
            })?;

            if rewrite.done {
                return rewrite
                    .resource
                    .map(ObjectResource::into_meta)
                    .ok_or_else(|| {
                        GcsVfsError::Backend("GCS objects.rewrite: missing resource".to_string())
                    });
            }

            trace!("rewrite of {} continuing", source);
            rewrite_token = Some(rewrite.rewrite_token.ok_or_else(|| {
                GcsVfsError::Backend("GCS objects.rewrite: missing rewrite token".to_string())
            })?);
        }
    }

    async fn sign_url(&self, id: &ObjectId, ttl: Duration) -> Result<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            GcsVfsError::NotSupported(
                "signed URLs require service account key credentials".to_string(),
            )
        })?;
        signer.sign(&self.client.base_url, id, ttl)
    }
}

/// Chunked uploader; switches to a resumable session once the buffer
/// outgrows one chunk
struct GcsWriter {
    client: Arc<GcsClient>,
    object: NewObject,
    chunk_size: usize,
    buffer: BytesMut,
    session: Option<String>,
    offset: u64,
}

impl GcsWriter {
    async fn put_chunk(&mut self, chunk: Bytes, total: Option<u64>) -> Result<Response> {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                let session = self.client.start_session(&self.object).await?;
                self.session = Some(session.clone());
                session
            }
        };

        let len = chunk.len() as u64;
        let total_str = total.map_or_else(|| "*".to_string(), |t| t.to_string());
        let range = if len == 0 {
            format!("bytes */{}", total_str)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.offset + len - 1,
                total_str
            )
        };

        trace!("upload chunk {} for {}", range, self.object.id);
        let request = self
            .client
            .request(Method::PUT, &session)
            .await?
            .header(header::CONTENT_RANGE, range)
            .body(chunk);
        let response = GcsClient::send(request, "resumable upload").await?;
        self.offset += len;
        Ok(response)
    }
}

#[async_trait]
impl ObjectWriter for GcsWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);

        while self.buffer.len() > self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size).freeze();
            let response = self.put_chunk(chunk, None).await?;
            if response.status().as_u16() != 308 {
                GcsClient::check(response, "resumable upload").await?;
                return Err(GcsVfsError::Backend(
                    "GCS resumable upload finished before the last chunk".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<ObjectMeta> {
        let remaining = std::mem::take(&mut self.buffer).freeze();

        if self.session.is_none() {
            return self.client.upload_media(&self.object, remaining).await;
        }

        let total = self.offset + remaining.len() as u64;
        let response = self.put_chunk(remaining, Some(total)).await?;
        let response = GcsClient::check(response, "resumable upload").await?;
        GcsClient::resource(response, "resumable upload").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;

    fn store(endpoint: Option<&str>) -> GcsStore {
        GcsStore::new(GcsStoreConfig {
            endpoint: endpoint.map(|e| e.to_string()),
            token_provider: Arc::new(StaticTokenProvider::anonymous()),
            signing_key: None,
        })
        .unwrap()
    }

    #[test]
    fn test_urls_escape_object_names() {
        let store = store(None);
        assert_eq!(store.base_url(), DEFAULT_ENDPOINT);
        let url = store.client.object_url(&ObjectId::new("npd-test", "docs/q1 report.pdf"));
        assert_eq!(
            url,
            "https://storage.googleapis.com/storage/v1/b/npd-test/o/docs%2Fq1%20report.pdf"
        );
        assert_eq!(
            store.client.upload_url("npd-test"),
            "https://storage.googleapis.com/upload/storage/v1/b/npd-test/o"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let store = store(Some("http://localhost:4443/"));
        assert_eq!(store.base_url(), "http://localhost:4443");
    }

    #[test]
    fn test_object_resource_conversion() {
        let resource: ObjectResource = serde_json::from_str(
            r#"{
                "bucket": "npd-test",
                "name": "report.tmp",
                "size": "10",
                "generation": "1700000000000000",
                "updated": "2024-03-01T12:30:05.123Z",
                "contentType": "text/plain",
                "kmsKeyName": "projects/p/keys/k/cryptoKeyVersions/1"
            }"#,
        )
        .unwrap();
        let meta = resource.into_meta();
        assert_eq!(meta.id, ObjectId::new("npd-test", "report.tmp"));
        assert_eq!(meta.size, 10);
        assert_eq!(meta.generation, 1_700_000_000_000_000);
        assert!(meta.updated > SystemTime::UNIX_EPOCH);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert!(meta.kms_key_name.is_some());
    }

    #[test]
    fn test_list_response_defaults() {
        let listing: ListResponse = serde_json::from_str(r#"{"kind": "storage#objects"}"#).unwrap();
        assert!(listing.items.is_empty());
        assert!(listing.prefixes.is_empty());
        assert!(listing.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_writer_rounds_chunk_size() {
        let store = store(None);
        let object = NewObject::new(ObjectId::new("b", "k")).with_chunk_size(300 * 1024);
        let writer = store.open_writer(&object).await.unwrap();
        // Nothing is sent until data exceeds a chunk; dropping abandons the upload
        drop(writer);

        let object = NewObject::new(ObjectId::new("b", "k")).with_chunk_size(1);
        assert!(store.open_writer(&object).await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_url_requires_key() {
        let store = store(None);
        let err = store
            .sign_url(&ObjectId::new("b", "k"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GcsVfsError::NotSupported(_)));
    }
}
