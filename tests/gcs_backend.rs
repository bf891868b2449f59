//! Cloud Storage backend tests
//!
//! A small axum server stands in for the JSON API so the resumable upload
//! protocol and ranged downloads can be checked byte for byte.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::TryStreamExt;
use parking_lot::Mutex;

use gcs_vfs::auth::StaticTokenProvider;
use gcs_vfs::store::gcs::{GcsStore, GcsStoreConfig};
use gcs_vfs::store::{NewObject, ObjectId, ObjectStore, ObjectWriter};

const BUCKET: &str = "npd-test";
const CHUNK: usize = 256 * 1024;

#[derive(Default)]
struct StubState {
    objects: HashMap<(String, String), Vec<u8>>,
    sessions: HashMap<u64, (String, String, Vec<u8>)>,
    next_session: u64,
    /// `Content-Range` of every upload request, in order
    content_ranges: Vec<String>,
    /// `Range` of every media download, in order
    ranges: Vec<String>,
    media_uploads: usize,
}

struct Stub {
    base_url: String,
    state: Mutex<StubState>,
}

fn resource(bucket: &str, name: &str, size: usize) -> serde_json::Value {
    serde_json::json!({
        "bucket": bucket,
        "name": name,
        "size": size.to_string(),
        "generation": "1",
        "updated": "2024-03-01T12:30:05.000Z",
    })
}

async fn insert(
    State(stub): State<Arc<Stub>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let name = query.get("name").cloned().unwrap_or_default();
    let mut state = stub.state.lock();
    match query.get("uploadType").map(String::as_str) {
        Some("media") => {
            state.media_uploads += 1;
            let size = body.len();
            state.objects.insert((bucket.clone(), name.clone()), body.to_vec());
            Json(resource(&bucket, &name, size)).into_response()
        }
        Some("resumable") => {
            state.next_session += 1;
            let id = state.next_session;
            state.sessions.insert(id, (bucket, name, Vec::new()));
            let location = format!("{}/session/{}", stub.base_url, id);
            (StatusCode::OK, [(header::LOCATION, location)]).into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Accepts chunks only at the current offset; `*` totals keep the session open
async fn upload_chunk(
    State(stub): State<Arc<Stub>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut state = stub.state.lock();
    state.content_ranges.push(range.clone());
    let Some((bucket, name, mut data)) = state.sessions.remove(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some((span, total)) = range.strip_prefix("bytes ").and_then(|r| r.split_once('/')) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if span != "*" {
        let parsed = span
            .split_once('-')
            .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
        match parsed {
            Some((start, end)) if start == data.len() && end + 1 - start == body.len() => {}
            _ => return StatusCode::BAD_REQUEST.into_response(),
        }
    }
    data.extend_from_slice(&body);

    if total == "*" {
        let committed = format!("bytes=0-{}", data.len() - 1);
        state.sessions.insert(id, (bucket, name, data));
        return (StatusCode::PERMANENT_REDIRECT, [(header::RANGE, committed)]).into_response();
    }
    if total.parse::<usize>().ok() != Some(data.len()) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let size = data.len();
    state.objects.insert((bucket.clone(), name.clone()), data);
    Json(resource(&bucket, &name, size)).into_response()
}

async fn get_object(
    State(stub): State<Arc<Stub>>,
    Path((bucket, name)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = stub.state.lock();
    let Some(data) = state.objects.get(&(bucket.clone(), name.clone())).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if query.get("alt").map(String::as_str) != Some("media") {
        return Json(resource(&bucket, &name, data.len())).into_response();
    }

    let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::OK, data).into_response();
    };
    state.ranges.push(range.to_string());
    let parsed = range
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
    match parsed {
        Some((start, _)) if start >= data.len() => {
            StatusCode::RANGE_NOT_SATISFIABLE.into_response()
        }
        Some((start, end)) => {
            let end = end.min(data.len() - 1);
            (StatusCode::PARTIAL_CONTENT, data[start..=end].to_vec()).into_response()
        }
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Start the stub and a store pointed at it
async fn start() -> Result<(Arc<Stub>, GcsStore)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let stub = Arc::new(Stub {
        base_url: base_url.clone(),
        state: Mutex::new(StubState::default()),
    });

    let app = Router::new()
        .route("/upload/storage/v1/b/{bucket}/o", post(insert))
        .route("/session/{id}", put(upload_chunk))
        .route("/storage/v1/b/{bucket}/o/{object}", get(get_object))
        .with_state(stub.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });

    let store = GcsStore::new(GcsStoreConfig {
        endpoint: Some(base_url),
        token_provider: Arc::new(StaticTokenProvider::new("test-token")),
        signing_key: None,
    })?;
    Ok((stub, store))
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Uploads larger than a chunk go through a resumable session with
/// contiguous ranges; only the last one names the total
#[tokio::test]
async fn test_resumable_upload_ranges() -> Result<()> {
    let (stub, store) = start().await?;
    let data = payload(600_000);

    // Rounded down to the 256 KiB granularity
    let object = NewObject::new(ObjectId::new(BUCKET, "big.bin")).with_chunk_size(300_000);
    let mut writer = store.open_writer(&object).await?;
    for piece in data.chunks(100_000) {
        writer.write(piece).await?;
    }
    let meta = writer.close().await?;

    assert_eq!(meta.size, 600_000);
    let state = stub.state.lock();
    assert_eq!(
        state.content_ranges,
        vec![
            "bytes 0-262143/*".to_string(),
            "bytes 262144-524287/*".to_string(),
            "bytes 524288-599999/600000".to_string(),
        ]
    );
    assert_eq!(state.media_uploads, 0);
    assert_eq!(
        state.objects.get(&(BUCKET.to_string(), "big.bin".to_string())),
        Some(&data)
    );
    Ok(())
}

/// An upload of exactly two chunks keeps the second for the closing request
#[tokio::test]
async fn test_upload_of_chunk_multiple() -> Result<()> {
    let (stub, store) = start().await?;
    let data = payload(2 * CHUNK);

    let object = NewObject::new(ObjectId::new(BUCKET, "even.bin")).with_chunk_size(CHUNK);
    let mut writer = store.open_writer(&object).await?;
    writer.write(&data).await?;
    writer.close().await?;

    let state = stub.state.lock();
    assert_eq!(
        state.content_ranges,
        vec![
            "bytes 0-262143/*".to_string(),
            "bytes 262144-524287/524288".to_string(),
        ]
    );
    assert_eq!(
        state.objects.get(&(BUCKET.to_string(), "even.bin".to_string())),
        Some(&data)
    );
    Ok(())
}

/// Content that fits in one chunk is sent as a single media upload
#[tokio::test]
async fn test_small_upload_is_single_request() -> Result<()> {
    let (stub, store) = start().await?;

    let object = NewObject::new(ObjectId::new(BUCKET, "small.txt")).with_chunk_size(CHUNK);
    let mut writer = store.open_writer(&object).await?;
    writer.write(b"testing...").await?;
    let meta = writer.close().await?;

    assert_eq!(meta.size, 10);
    let state = stub.state.lock();
    assert!(state.content_ranges.is_empty());
    assert_eq!(state.media_uploads, 1);
    Ok(())
}

/// Downloads stop at the first short range
#[tokio::test]
async fn test_ranged_download_stops_on_short_range() -> Result<()> {
    let (stub, store) = start().await?;
    let data = payload(600_000);
    stub.state
        .lock()
        .objects
        .insert((BUCKET.to_string(), "big.bin".to_string()), data.clone());

    let chunks: Vec<Bytes> = store
        .read(&ObjectId::new(BUCKET, "big.bin"), CHUNK)
        .try_collect()
        .await?;

    let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![262_144, 262_144, 75_712]);
    assert_eq!(chunks.concat(), data);
    assert_eq!(
        stub.state.lock().ranges,
        vec![
            "bytes=0-262143".to_string(),
            "bytes=262144-524287".to_string(),
            "bytes=524288-786431".to_string(),
        ]
    );
    Ok(())
}

/// An object of exactly whole chunks ends on an unsatisfiable range
#[tokio::test]
async fn test_ranged_download_ends_on_416() -> Result<()> {
    let (stub, store) = start().await?;
    let data = payload(2 * CHUNK);
    stub.state
        .lock()
        .objects
        .insert((BUCKET.to_string(), "even.bin".to_string()), data.clone());
    stub.state
        .lock()
        .objects
        .insert((BUCKET.to_string(), "empty".to_string()), Vec::new());

    let chunks: Vec<Bytes> = store
        .read(&ObjectId::new(BUCKET, "even.bin"), CHUNK)
        .try_collect()
        .await?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks.concat(), data);
    assert_eq!(stub.state.lock().ranges.len(), 3);

    let empty: Vec<Bytes> = store
        .read(&ObjectId::new(BUCKET, "empty"), CHUNK)
        .try_collect()
        .await?;
    assert!(empty.is_empty());
    Ok(())
}

/// Ranged reads clamp to the object and come back empty past its end
#[tokio::test]
async fn test_read_range() -> Result<()> {
    let (stub, store) = start().await?;
    stub.state
        .lock()
        .objects
        .insert((BUCKET.to_string(), "a.txt".to_string()), b"0123456789".to_vec());

    let id = ObjectId::new(BUCKET, "a.txt");
    assert_eq!(&store.read_range(&id, 2, 3).await?[..], b"234");
    assert_eq!(&store.read_range(&id, 8, 100).await?[..], b"89");
    assert!(store.read_range(&id, 10, 5).await?.is_empty());
    Ok(())
}
