//! In-memory tus server with fault injection.
//!
//! Implements `Transport` directly, so the real client and driver run
//! against it without sockets. Faults are keyed by the 1-based number of
//! the PATCH request they hit.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tuskit_client::{
    ChecksumAlgorithm, Request, Response, Transport, TransportError, TusClient,
};
use tuskit_protocol::{Headers, Method, decode_checksum};

pub const ENDPOINT: &str = "http://tus.test/files/";

#[derive(Debug, Clone)]
pub enum Fault {
    /// Apply the chunk, then lose the response.
    DropResponse,
    /// Apply only the first `n` bytes, then lose the response.
    PartialThenDrop(usize),
    /// Lose the request before it reaches the upload.
    ConnectionReset,
    /// Answer 503 without applying.
    Unavailable,
    /// Answer 409 without an `Upload-Offset`.
    ConflictWithoutOffset,
    /// Answer 460 regardless of the digest.
    ChecksumMismatch,
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Logged {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body_len: usize,
}

impl Logged {
    pub fn offset(&self) -> Option<u64> {
        self.headers.get("Upload-Offset").and_then(|v| v.parse().ok())
    }
}

struct Upload {
    data: Vec<u8>,
    length: Option<u64>,
    metadata: Option<String>,
    concat: Option<String>,
}

struct State {
    uploads: HashMap<String, Upload>,
    next_id: u64,
    patches: usize,
    faults: HashMap<usize, Fault>,
    /// `(upload id, offset)` pairs whose first response was already lost.
    flaky: Option<HashSet<(String, u64)>>,
    cancel_after: Option<(usize, CancellationToken)>,
    extensions: String,
    max_size: Option<u64>,
    log: Vec<Logged>,
}

pub struct MemoryServer {
    state: Mutex<State>,
}

fn id_of(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                uploads: HashMap::new(),
                next_id: 1,
                patches: 0,
                faults: HashMap::new(),
                flaky: None,
                cancel_after: None,
                extensions:
                    "creation,creation-defer-length,termination,checksum,concatenation".into(),
                max_size: None,
                log: Vec::new(),
            }),
        })
    }

    pub fn client(self: &Arc<Self>) -> TusClient {
        TusClient::new(Arc::clone(self) as Arc<dyn Transport>)
    }

    pub fn set_extensions(&self, extensions: &str) {
        self.state.lock().unwrap().extensions = extensions.to_string();
    }

    pub fn set_max_size(&self, max: u64) {
        self.state.lock().unwrap().max_size = Some(max);
    }

    pub fn fault_on_patch(&self, patch: usize, fault: Fault) {
        self.state.lock().unwrap().faults.insert(patch, fault);
    }

    /// Applies every chunk but loses the first response for each
    /// `(upload, offset)`.
    pub fn drop_first_response_per_offset(&self) {
        self.state.lock().unwrap().flaky = Some(HashSet::new());
    }

    /// Cancels `token` once `patches` PATCH requests have been handled.
    pub fn cancel_after_patches(&self, patches: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((patches, token));
    }

    /// Appends bytes behind the client's back, like another writer would.
    pub fn append_directly(&self, location: &str, bytes: &[u8]) {
        let mut st = self.state.lock().unwrap();
        if let Some(upload) = st.uploads.get_mut(&id_of(location)) {
            upload.data.extend_from_slice(bytes);
        }
    }

    /// Drops stored bytes past `len`, like a server restoring a backup.
    pub fn truncate(&self, location: &str, len: usize) {
        let mut st = self.state.lock().unwrap();
        if let Some(upload) = st.uploads.get_mut(&id_of(location)) {
            upload.data.truncate(len);
        }
    }

    pub fn stored(&self, location: &str) -> Option<Vec<u8>> {
        let st = self.state.lock().unwrap();
        st.uploads.get(&id_of(location)).map(|u| u.data.clone())
    }

    pub fn log(&self) -> Vec<Logged> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn requests(&self, method: Method) -> Vec<Logged> {
        self.log().into_iter().filter(|l| l.method == method).collect()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    fn handle(&self, request: Request) -> Result<Response, TransportError> {
        let mut st = self.state.lock().unwrap();
        st.log.push(Logged {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body_len: request.body.as_ref().map_or(0, Vec::len),
        });

        if request.method != Method::Options
            && request.headers.get("Tus-Resumable") != Some("1.0.0")
        {
            return Ok(Response::new(412).header("Tus-Version", "1.0.0"));
        }

        match request.method {
            Method::Options => Ok(st.options()),
            Method::Post => Ok(st.create(&request)),
            Method::Head => Ok(st.head(&request)),
            Method::Patch => {
                st.patches += 1;
                let number = st.patches;
                let fault = st.faults.remove(&number);
                let result = st.patch(request, fault);
                if let Some((after, token)) = &st.cancel_after
                    && number >= *after
                {
                    token.cancel();
                }
                result
            }
            Method::Get => Ok(st.get(&request)),
            Method::Delete => Ok(st.delete(&request)),
        }
    }
}

impl State {
    fn options(&self) -> Response {
        let mut resp = Response::new(204)
            .header("Tus-Resumable", "1.0.0")
            .header("Tus-Version", "1.0.0")
            .header("Tus-Extension", self.extensions.clone())
            .header("Tus-Checksum-Algorithm", "md5,sha1,sha256");
        if let Some(max) = self.max_size {
            resp.headers.insert("Tus-Max-Size", max.to_string());
        }
        resp
    }

    fn create(&mut self, request: &Request) -> Response {
        let headers = &request.headers;
        let concat = headers.get("Upload-Concat").map(str::to_string);

        let (data, length) = match concat.as_deref().and_then(|c| c.strip_prefix("final;")) {
            Some(parts) => {
                let mut data = Vec::new();
                for part in parts.split_whitespace() {
                    match self.uploads.get(&id_of(part)) {
                        Some(u) if u.length == Some(u.data.len() as u64) => {
                            data.extend_from_slice(&u.data)
                        }
                        _ => return Response::new(400).body("partial upload not finished"),
                    }
                }
                let len = data.len() as u64;
                (data, Some(len))
            }
            None => {
                let length = if headers.get("Upload-Defer-Length") == Some("1") {
                    None
                } else {
                    match headers.get("Upload-Length").and_then(|v| v.parse::<u64>().ok()) {
                        Some(len) => Some(len),
                        None => return Response::new(400).body("missing Upload-Length"),
                    }
                };
                (Vec::new(), length)
            }
        };

        if let (Some(max), Some(len)) = (self.max_size, length)
            && len > max
        {
            return Response::new(413);
        }

        let id = self.next_id.to_string();
        self.next_id += 1;
        self.uploads.insert(
            id.clone(),
            Upload {
                data,
                length,
                metadata: headers.get("Upload-Metadata").map(str::to_string),
                concat,
            },
        );
        Response::new(201)
            .header("Tus-Resumable", "1.0.0")
            .header("Location", format!("/files/{id}"))
    }

    fn head(&self, request: &Request) -> Response {
        let Some(upload) = self.uploads.get(&id_of(&request.url)) else {
            return Response::new(404);
        };
        let mut resp = Response::new(200)
            .header("Tus-Resumable", "1.0.0")
            .header("Cache-Control", "no-store")
            .header("Upload-Offset", upload.data.len().to_string());
        match upload.length {
            Some(len) => resp.headers.insert("Upload-Length", len.to_string()),
            None => resp.headers.insert("Upload-Defer-Length", "1"),
        }
        if let Some(meta) = &upload.metadata {
            resp.headers.insert("Upload-Metadata", meta.clone());
        }
        if let Some(concat) = &upload.concat {
            resp.headers.insert("Upload-Concat", concat.clone());
        }
        resp
    }

    fn patch(&mut self, request: Request, fault: Option<Fault>) -> Result<Response, TransportError> {
        match fault {
            Some(Fault::ConnectionReset) => {
                return Err(TransportError::Other("connection reset by peer".into()));
            }
            Some(Fault::Unavailable) => return Ok(Response::new(503)),
            Some(Fault::ConflictWithoutOffset) => return Ok(Response::new(409)),
            Some(Fault::ChecksumMismatch) => return Ok(Response::new(460)),
            _ => {}
        }

        let headers = &request.headers;
        if headers.get("Content-Type") != Some("application/offset+octet-stream") {
            return Ok(Response::new(415));
        }
        let id = id_of(&request.url);
        let Some(upload) = self.uploads.get_mut(&id) else {
            return Ok(Response::new(404));
        };
        let Some(offset) = headers.get("Upload-Offset").and_then(|v| v.parse::<u64>().ok()) else {
            return Ok(Response::new(400));
        };
        let current = upload.data.len() as u64;
        if offset != current {
            return Ok(Response::new(409).header("Upload-Offset", current.to_string()));
        }

        if let Some(declared) = headers.get("Upload-Length").and_then(|v| v.parse::<u64>().ok()) {
            match upload.length {
                None => upload.length = Some(declared),
                Some(len) if len != declared => return Ok(Response::new(400)),
                Some(_) => {}
            }
        }

        let body = request.body.unwrap_or_default();
        if let Some(len) = upload.length
            && offset + body.len() as u64 > len
        {
            return Ok(Response::new(413));
        }

        if let Some(raw) = headers.get("Upload-Checksum") {
            let Ok((name, digest)) = decode_checksum(raw) else {
                return Ok(Response::new(400));
            };
            let Ok(algo) = name.parse::<ChecksumAlgorithm>() else {
                return Ok(Response::new(400));
            };
            if algo.digest(&body) != digest {
                return Ok(Response::new(460));
            }
        }

        if let Some(Fault::PartialThenDrop(n)) = fault {
            upload.data.extend_from_slice(&body[..n.min(body.len())]);
            return Err(TransportError::Other("connection reset mid-body".into()));
        }

        upload.data.extend_from_slice(&body);
        let new_offset = upload.data.len() as u64;

        if matches!(fault, Some(Fault::DropResponse)) {
            return Err(TransportError::Timeout);
        }
        if let Some(seen) = &mut self.flaky
            && seen.insert((id, offset))
        {
            return Err(TransportError::Timeout);
        }

        Ok(Response::new(204)
            .header("Tus-Resumable", "1.0.0")
            .header("Upload-Offset", new_offset.to_string()))
    }

    fn get(&self, request: &Request) -> Response {
        match self.uploads.get(&id_of(&request.url)) {
            Some(upload) => {
                let mut resp = Response::new(200)
                    .header("Upload-Offset", upload.data.len().to_string())
                    .body(upload.data.clone());
                if let Some(len) = upload.length {
                    resp.headers.insert("Upload-Length", len.to_string());
                }
                resp
            }
            None => Response::new(404),
        }
    }

    fn delete(&mut self, request: &Request) -> Response {
        match self.uploads.remove(&id_of(&request.url)) {
            Some(_) => Response::new(204).header("Tus-Resumable", "1.0.0"),
            None => Response::new(404),
        }
    }
}

impl Transport for MemoryServer {
    fn send(
        &self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + '_>> {
        let result = self.handle(request);
        Box::pin(async move { result })
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31) ^ (i >> 8) ^ (i >> 16)) as u8)
        .collect()
}
