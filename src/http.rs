//! HTTP API for piece retrieval and ingestion
//!
//! Consumer routes (wire-compatible with existing retrieval clients):
//! - `GET /{type}/{id}` - Retrieve the padded piece (range-capable) or a tar
//!   archive when the stored object is a directory
//! - `GET /{type}/{id}/{spt}/allocated/{offset}/{size}` - Probe whether an id
//!   is allocated, without transferring content
//!
//! Unknown ids answer `416 Range Not Satisfiable` on both routes, as the
//! retrieval protocol expects; ids that fail to parse answer `400`.
//!
//! Producer and status routes:
//! - `POST /piece` - Allocate an id for deal metadata (JSON body)
//! - `PUT /piece/{id}` - Upload the raw payload for an allocated id
//! - `GET /piece/{id}/status` - Stored deal record for an id
//! - `GET /health` - Store summary
//!
//! ## Example Usage
//!
//! ```bash
//! # Allocate an id
//! curl -X POST -H "Content-Type: application/json" \
//!      --data @deal.json http://localhost:9091/piece
//!
//! # Upload the payload
//! curl -X PUT --data-binary @piece.bin http://localhost:9091/piece/0
//!
//! # Retrieve it, padded
//! curl http://localhost:9091/sector/0 > piece.padded
//!
//! # Ranged retrieval
//! curl -H "Range: bytes=0-127" http://localhost:9091/sector/0
//! ```

use std::convert::Infallible;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::deal::PieceDealInfo;
use crate::error::StoreError;
use crate::fr32::PADDED_GROUP;
use crate::index::{IndexStore, PieceState};
use crate::pad_reader::PadReader;

/// HTTP server state
pub struct HttpServer {
    index: Arc<IndexStore>,
    blobs: Arc<BlobStore>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(index: Arc<IndexStore>, blobs: Arc<BlobStore>, bind_addr: SocketAddr) -> Self {
        Self {
            index,
            blobs,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StoreError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                });

                // Once response bytes are on the wire a failed transfer can
                // only be logged; the status cannot change retroactively.
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers. Exposed so tests can drive the service
    /// without a socket.
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let result = match (method, segments.as_slice()) {
            (Method::GET, ["health"]) => self.handle_health().await,

            (Method::POST, ["piece"]) => self.handle_allocate(req).await,

            (Method::PUT, ["piece", id]) => match id.parse::<u64>() {
                Ok(id) => self.handle_upload(req, id).await,
                Err(_) => Ok(text(StatusCode::BAD_REQUEST, "Invalid piece id")),
            },

            (Method::GET, ["piece", id, "status"]) => match id.parse::<u64>() {
                Ok(id) => self.handle_status(id).await,
                Err(_) => Ok(text(StatusCode::BAD_REQUEST, "Invalid piece id")),
            },

            // Trailing segments carry sector-protocol detail this store does
            // not interpret; only the id matters.
            (Method::GET, [_, id, _, "allocated", _, _]) => match id.parse::<u64>() {
                Ok(id) => Ok(self.handle_probe(id).await),
                Err(_) => Ok(text(StatusCode::BAD_REQUEST, "Invalid piece id")),
            },

            (Method::GET, [_, id]) => match id.parse::<u64>() {
                Ok(id) => self.handle_get(&req, id).await,
                Err(_) => Ok(text(StatusCode::BAD_REQUEST, "Invalid piece id")),
            },

            _ => Ok(text(StatusCode::NOT_FOUND, "Not Found")),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Request error");
                text(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}"))
            }
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<Response<Full<Bytes>>, StoreError> {
        let summary = self.index.summary().await;
        Ok(json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "pieces": summary.next_id,
                "ready": summary.ready,
                "pending": summary.pending,
            }),
        ))
    }

    /// POST /piece - Allocate an id for deal metadata
    async fn handle_allocate<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, StoreError>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Ok(text(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read body: {e}"),
                ))
            }
        };

        let deal: PieceDealInfo = match serde_json::from_slice(&body) {
            Ok(deal) => deal,
            Err(e) => {
                return Ok(text(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid deal metadata: {e}"),
                ))
            }
        };
        if let Err(e) = deal.validate() {
            return Ok(text(StatusCode::BAD_REQUEST, e.to_string()));
        }

        let id = self.index.allocate(deal).await?;
        info!(id, "Allocated piece");

        Ok(json_response(
            StatusCode::CREATED,
            serde_json::json!({ "id": id }),
        ))
    }

    /// PUT /piece/{id} - Upload the raw payload for an allocated id
    async fn handle_upload<B>(
        &self,
        req: Request<B>,
        id: u64,
    ) -> Result<Response<Full<Bytes>>, StoreError>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let record = match self.index.lookup(id).await {
            Some(record) => record,
            None => return Ok(text(StatusCode::NOT_FOUND, "Unknown piece id")),
        };
        if record.state == PieceState::Ready {
            return Ok(text(StatusCode::CONFLICT, "Piece already has a payload"));
        }

        let data = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Ok(text(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read body: {e}"),
                ))
            }
        };

        let mut file = match self.blobs.create(id).await {
            Ok(file) => file,
            Err(StoreError::PieceExists(_)) => {
                return Ok(text(StatusCode::CONFLICT, "Piece payload already exists"))
            }
            Err(e) => return Err(e),
        };
        file.write_all(&data).await?;
        file.flush().await?;

        // The record becomes retrievable only after the payload is fully on
        // disk.
        self.index.mark_ready(id).await?;

        info!(id, size = data.len(), "Stored piece payload");

        Ok(json_response(
            StatusCode::CREATED,
            serde_json::json!({ "id": id, "size": data.len() }),
        ))
    }

    /// GET /piece/{id}/status - Stored deal record for an id
    async fn handle_status(&self, id: u64) -> Result<Response<Full<Bytes>>, StoreError> {
        match self.index.lookup(id).await {
            Some(record) => {
                let body = serde_json::to_string(&record)?;
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap())
            }
            None => Ok(text(StatusCode::NOT_FOUND, "Unknown piece id")),
        }
    }

    /// GET /{type}/{id}/{spt}/allocated/{offset}/{size} - Probe allocation
    /// existence. A pending record is still an allocation, so it probes
    /// positive even though retrieval would refuse it.
    async fn handle_probe(&self, id: u64) -> Response<Full<Bytes>> {
        if self.index.lookup(id).await.is_some() {
            empty(StatusCode::OK)
        } else {
            empty(StatusCode::RANGE_NOT_SATISFIABLE)
        }
    }

    /// GET /{type}/{id} - Retrieve the padded piece or a directory archive
    async fn handle_get<B>(
        &self,
        req: &Request<B>,
        id: u64,
    ) -> Result<Response<Full<Bytes>>, StoreError> {
        let record = match self.index.lookup(id).await {
            Some(record) => record,
            None => return Ok(empty(StatusCode::RANGE_NOT_SATISFIABLE)),
        };
        if record.state != PieceState::Ready {
            // Not yet available reads the same as never allocated.
            debug!(id, "Piece payload still pending");
            return Ok(empty(StatusCode::RANGE_NOT_SATISFIABLE));
        }

        let stat = self.blobs.stat(id).await?;

        if stat.is_dir {
            if req.headers().contains_key(header::RANGE) {
                warn!(id, "Range not supported on directories");
                return Ok(text(
                    StatusCode::BAD_REQUEST,
                    "Range not supported on directories",
                ));
            }

            let path = self.blobs.dir_path(id)?;
            let archive = run_blocking(move || Ok(tar_directory(&path)?)).await?;

            info!(id, size = archive.len(), "Serving piece directory as archive");

            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/x-tar")
                .header(header::CONTENT_LENGTH, archive.len())
                .body(Full::new(Bytes::from(archive)))
                .unwrap());
        }

        let padded_len = record.deal.padded_size();
        let last_modified = http_date(stat.modified);

        if let Some(since) = req
            .headers()
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
        {
            if unmodified_since(stat.modified, since) {
                return Ok(Response::builder()
                    .status(StatusCode::NOT_MODIFIED)
                    .header(header::LAST_MODIFIED, &last_modified)
                    .body(Full::new(Bytes::new()))
                    .unwrap());
            }
        }

        let range_header = req
            .headers()
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let Some(range_value) = range_header else {
            let parts = self.read_piece(id, padded_len, vec![(0, padded_len)]).await?;
            let body = parts.into_iter().next().unwrap_or_default();

            info!(id, size = body.len(), "Serving full piece");

            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, body.len())
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::LAST_MODIFIED, &last_modified)
                .body(Full::new(Bytes::from(body)))
                .unwrap());
        };

        let ranges = match parse_ranges(&range_value, padded_len) {
            Some(ranges) => ranges,
            None => {
                debug!(id, range = %range_value, "Unsatisfiable range");
                return Ok(Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{padded_len}"))
                    .body(Full::new(Bytes::new()))
                    .unwrap());
            }
        };

        let parts = self.read_piece(id, padded_len, ranges.clone()).await?;

        if let [(start, end)] = ranges.as_slice() {
            let body = parts.into_iter().next().unwrap_or_default();
            let content_range = format!("bytes {}-{}/{}", start, end - 1, padded_len);

            info!(id, range = %content_range, size = body.len(), "Serving partial piece");

            return Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, body.len())
                .header(header::CONTENT_RANGE, content_range)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::LAST_MODIFIED, &last_modified)
                .body(Full::new(Bytes::from(body)))
                .unwrap());
        }

        let boundary = Uuid::new_v4().simple().to_string();
        let body = multipart_body(&boundary, &ranges, parts, padded_len);

        info!(id, parts = ranges.len(), size = body.len(), "Serving multipart piece ranges");

        Ok(Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/byteranges; boundary={boundary}"),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::LAST_MODIFIED, &last_modified)
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }

    /// Reads padded-domain byte ranges of a stored piece on a blocking task.
    async fn read_piece(
        &self,
        id: u64,
        padded_len: u64,
        ranges: Vec<(u64, u64)>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let blobs = self.blobs.clone();
        run_blocking(move || {
            let file = blobs.open_sync(id)?;
            let mut reader = PadReader::new(file, padded_len);

            let mut parts = Vec::with_capacity(ranges.len());
            for (start, end) in ranges {
                reader.seek(SeekFrom::Start(start))?;
                let len = (end - start) as usize;
                let mut part = Vec::with_capacity(len);
                let mut group = [0u8; PADDED_GROUP];
                while part.len() < len {
                    let n = reader.read(&mut group)?;
                    if n == 0 {
                        break;
                    }
                    let take = n.min(len - part.len());
                    part.extend_from_slice(&group[..take]);
                }
                parts.push(part);
            }
            Ok(parts)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e,
        ))),
    }
}

/// Archives a directory-backed piece into memory.
fn tar_directory(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", path)?;
    builder.into_inner()
}

/// Parse an HTTP Range header against the padded piece length.
/// Supports `bytes=start-end`, `bytes=start-`, `bytes=-suffix`, and
/// comma-separated combinations of those.
///
/// Returns `(start, end)` pairs where `end` is exclusive, or `None` when any
/// part of the header is malformed or unsatisfiable.
fn parse_ranges(header: &str, total: u64) -> Option<Vec<(u64, u64)>> {
    let range_str = header.strip_prefix("bytes=")?;

    let mut ranges = Vec::new();
    for part in range_str.split(',') {
        let part = part.trim();

        if let Some(suffix) = part.strip_prefix('-') {
            // Suffix range: bytes=-500 means the last 500 bytes
            let suffix: u64 = suffix.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            ranges.push((total.saturating_sub(suffix), total));
            continue;
        }

        let (start, end) = part.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() {
            // Open-ended range: bytes=1000-
            total
        } else {
            // Closed range: end is inclusive in HTTP, exclusive here
            end.parse::<u64>().ok()?.checked_add(1)?
        };

        if start >= total || end > total || start >= end {
            return None;
        }
        ranges.push((start, end));
    }

    if ranges.is_empty() {
        None
    } else {
        Some(ranges)
    }
}

fn multipart_body(
    boundary: &str,
    ranges: &[(u64, u64)],
    parts: Vec<Vec<u8>>,
    total: u64,
) -> Vec<u8> {
    let mut body = Vec::new();
    for ((start, end), part) in ranges.iter().zip(parts) {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(
            format!("Content-Range: bytes {}-{}/{}\r\n\r\n", start, end - 1, total).as_bytes(),
        );
        body.extend_from_slice(&part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn http_date(t: SystemTime) -> String {
    DateTime::<Utc>::from(t)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// HTTP dates carry second precision, so the comparison truncates to whole
/// seconds.
fn unmodified_since(modified: SystemTime, header: &str) -> bool {
    match DateTime::parse_from_rfc2822(header) {
        Ok(since) => DateTime::<Utc>::from(modified).timestamp() <= since.timestamp(),
        Err(_) => false,
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn text(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(message.into())))
        .unwrap()
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(value.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_range() {
        assert_eq!(parse_ranges("bytes=0-127", 256), Some(vec![(0, 128)]));
        assert_eq!(parse_ranges("bytes=5-5", 128), Some(vec![(5, 6)]));
    }

    #[test]
    fn open_and_suffix_ranges() {
        assert_eq!(parse_ranges("bytes=100-", 256), Some(vec![(100, 256)]));
        assert_eq!(parse_ranges("bytes=-1", 128), Some(vec![(127, 128)]));
        // A suffix longer than the piece clamps to the whole piece.
        assert_eq!(parse_ranges("bytes=-4096", 128), Some(vec![(0, 128)]));
    }

    #[test]
    fn multiple_ranges() {
        assert_eq!(
            parse_ranges("bytes=0-0, 127-127", 128),
            Some(vec![(0, 1), (127, 128)])
        );
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        for header in [
            "bytes=",
            "bytes=abc",
            "bytes=128-",
            "bytes=10-5",
            "bytes=0-200",
            "bytes=-0",
            "0-10",
            "bytes=0-0,999-",
        ] {
            assert_eq!(parse_ranges(header, 128), None, "header {header:?}");
        }
    }

    #[test]
    fn multipart_layout() {
        let body = multipart_body(
            "b0",
            &[(0, 1), (127, 128)],
            vec![vec![0xaa], vec![0xbb]],
            128,
        );
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("--b0\r\n"));
        assert!(text.contains("Content-Range: bytes 0-0/128"));
        assert!(text.contains("Content-Range: bytes 127-127/128"));
        assert!(text.ends_with("--b0--\r\n"));
    }

    #[test]
    fn http_date_round_trip() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        let formatted = http_date(t);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");

        assert!(unmodified_since(t, &formatted));
        assert!(unmodified_since(t, "Mon, 07 Nov 1994 00:00:00 GMT"));
        assert!(!unmodified_since(t, "Sat, 05 Nov 1994 00:00:00 GMT"));
        assert!(!unmodified_since(t, "not a date"));
    }
}
