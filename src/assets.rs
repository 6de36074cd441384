//! Embedded-Asset Streamer (spec.md §4.5, ~10% of core).
//!
//! Grounded on `original_source/src/remote/remote.h`'s `remote_sendEmbedded`
//! and `builtInUrls[]` route table: a fixed handful of single-page-app
//! assets, linked into the firmware image rather than served from a
//! filesystem. The original streams a `HttpdConnData` CGI in ≤1024-byte
//! chunks across repeated calls because its HTTP stack is callback-driven
//! and cannot hold a whole response in memory at once; axum's request
//! handlers return one assembled response body per call, so `AssetStream`'s
//! `next()` iterator is kept (and unit-tested) as the faithful chunking
//! primitive, while the axum route handler drains it fully before
//! responding — the same content and headers, adapted to a runtime that
//! doesn't need re-entrant streaming to avoid blocking.
//!
//! Asset bytes themselves come from `rust_embed::RustEmbed`, the same
//! build-time-baked-in-binary pattern `mayara-server` uses for its web
//! frontend.

use std::borrow::Cow;

use rust_embed::RustEmbed;

use crate::error::AssetError;

#[derive(RustEmbed)]
#[folder = "web/"]
struct WebAssets;

/// gzip's magic number (RFC 1952 §2.3.1): ID1, ID2, CM=8 (DEFLATE). The
/// original detects this the same way, byte-for-byte, on the embedded
/// asset's first three bytes rather than trusting a file extension.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= GZIP_MAGIC.len() && data[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// Content-Type derived from the URL suffix (§4.5), mirroring the original's
/// small built-in `httpdGetMimetype` table rather than pulling in a generic
/// MIME-sniffing crate for five fixed routes.
fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("ico") => "image/x-icon",
        Some("js") => "application/javascript",
        _ => "application/octet-stream",
    }
}

/// One chunk of a streamed asset. `More` means further chunks follow;
/// `Done` carries the final (possibly empty) chunk, matching the original's
/// `CGI_MORE`/`CGI_DONE` return values from `remote_sendEmbedded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetChunk {
    More(Vec<u8>),
    Done(Vec<u8>),
}

/// Re-entrant chunked read over one embedded asset (§4.5, L-asset-chunking).
pub struct AssetStream {
    data: Cow<'static, [u8]>,
    content_type: &'static str,
    gzip: bool,
    sent: usize,
    chunk_size: usize,
}

impl AssetStream {
    /// Opens `path` for chunked reading. `path` is looked up against the
    /// embedded asset set with a leading `/` stripped and `/` mapped to
    /// `index.html`, matching the original's route table where `/` and
    /// `/index.html` share one backing file.
    pub fn open(path: &str, chunk_size: usize) -> Result<Self, AssetError> {
        let key = Self::route_key(path);
        let file = WebAssets::get(key).ok_or(AssetError::NotFound)?;
        let data = file.data;
        let gzip = is_gzip(&data);
        Ok(Self {
            data,
            content_type: content_type_for(key),
            gzip,
            sent: 0,
            chunk_size: chunk_size.max(1),
        })
    }

    fn route_key(path: &str) -> &str {
        match path.trim_start_matches('/') {
            "" => "index.html",
            other => other,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Returns the next chunk of at most `chunk_size` bytes. Once a `Done`
    /// chunk has been returned, further calls keep returning empty `Done`
    /// chunks rather than panicking — the original's equivalent state
    /// (`connData->cgiData` cleared) simply never gets called again once
    /// the HTTP layer sees `CGI_DONE`.
    pub fn next(&mut self) -> AssetChunk {
        let remaining = self.data.len() - self.sent;
        let take = remaining.min(self.chunk_size);
        let start = self.sent;
        self.sent += take;
        let chunk = self.data[start..self.sent].to_vec();
        if self.sent >= self.data.len() {
            AssetChunk::Done(chunk)
        } else {
            AssetChunk::More(chunk)
        }
    }

    /// Drains every remaining chunk into one contiguous buffer — the shape
    /// the axum handler needs, since it returns one response body per call
    /// rather than re-entering across chunks.
    pub fn drain(mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() - self.sent);
        loop {
            match self.next() {
                AssetChunk::More(chunk) => out.extend_from_slice(&chunk),
                AssetChunk::Done(chunk) => {
                    out.extend_from_slice(&chunk);
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_index_html_resolve_to_the_same_asset() {
        let root = AssetStream::open("/", 1024).unwrap().drain();
        let named = AssetStream::open("/index.html", 1024).unwrap().drain();
        assert_eq!(root, named);
        assert!(!root.is_empty());
    }

    #[test]
    fn unknown_route_is_not_found() {
        assert_eq!(AssetStream::open("/nope.bin", 1024).unwrap_err(), AssetError::NotFound);
    }

    #[test]
    fn favicon_is_detected_as_gzip() {
        let stream = AssetStream::open("/favicon.ico", 1024).unwrap();
        assert!(stream.is_gzip());
        assert_eq!(stream.content_type(), "image/x-icon");
    }

    #[test]
    fn script_js_is_not_gzip() {
        let stream = AssetStream::open("/script.js", 1024).unwrap();
        assert!(!stream.is_gzip());
        assert_eq!(stream.content_type(), "application/javascript");
    }

    #[test]
    fn chunking_respects_chunk_size_and_terminates_with_done() {
        let mut stream = AssetStream::open("/index.html", 32).unwrap();
        let total = stream.total_len();
        let mut seen = 0;
        let mut chunks = 0;
        loop {
            match stream.next() {
                AssetChunk::More(c) => {
                    assert_eq!(c.len(), 32);
                    seen += c.len();
                    chunks += 1;
                }
                AssetChunk::Done(c) => {
                    seen += c.len();
                    chunks += 1;
                    break;
                }
            }
        }
        assert_eq!(seen, total);
        assert!(chunks >= 1);
    }

    #[test]
    fn gzip_magic_detection_is_exact() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08, 0x00]));
        assert!(!is_gzip(&[0x1f, 0x8b, 0x09]));
        assert!(!is_gzip(&[0x1f]));
        assert!(!is_gzip(&[]));
    }
}
