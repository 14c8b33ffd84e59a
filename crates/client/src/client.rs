//! Protocol client: one method per server interaction.
//!
//! `TusClient` owns no upload state. Every method is a single round-trip
//! except [`TusClient::upload`] (the chunk loop in [`crate::driver`]) and
//! the composite operations built on top of it.

use std::sync::Arc;

use tracing::{debug, info, warn};
use tuskit_protocol::constants::{
    CONTENT_TYPE, LOCATION, OFFSET_OCTET_STREAM, TUS_RESUMABLE, UPLOAD_CHECKSUM, UPLOAD_CONCAT,
    UPLOAD_DEFER_LENGTH, UPLOAD_EXPIRES, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET, status,
};
use tuskit_protocol::{
    Concat, Extension, Headers, Metadata, Method, ProtocolError, ServerCapabilities, TUS_VERSION,
    decode_metadata, encode_checksum, encode_metadata,
};
use tuskit_transfer::{ByteSource, ChecksumAlgorithm};

use crate::driver::UploadDriver;
use crate::error::{Rejection, TusError, UploadError};
use crate::http::{HttpConfig, ReqwestTransport};
use crate::transport::{Request, Response, Transport};
use crate::types::{
    AppendOutcome, Download, OffsetInfo, TransferOptions, UploadLength, UploadOptions,
    UploadResult,
};

/// Client for a tus 1.0.0 server.
#[derive(Clone)]
pub struct TusClient {
    transport: Arc<dyn Transport>,
    headers: Headers,
}

impl TusClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            headers: Headers::new(),
        }
    }

    /// Client over [`ReqwestTransport`].
    pub fn with_http(config: &HttpConfig) -> Result<Self, TusError> {
        Ok(Self::new(Arc::new(ReqwestTransport::with_config(config)?)))
    }

    /// Adds a header to every request this client sends.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builds a request with the client headers and `Tus-Resumable` set.
    fn request(&self, method: Method, url: &str) -> Request {
        let mut request = Request::new(method, url);
        request.headers.extend(&self.headers);
        request.header(TUS_RESUMABLE, TUS_VERSION)
    }

    async fn send(&self, request: Request) -> Result<Response, TusError> {
        let method = request.method;
        let resp = self.transport.send(request).await?;
        if status::is_transient(resp.status) {
            debug!(%method, status = resp.status, "transient server status");
            return Err(crate::transport::TransportError::Unavailable {
                status: resp.status,
            }
            .into());
        }
        Ok(resp)
    }

    /// Queries the server's protocol version, extensions and limits.
    pub async fn discover(&self, endpoint: &str) -> Result<ServerCapabilities, TusError> {
        // The capability probe is the one request sent without Tus-Resumable.
        let mut request = Request::new(Method::Options, endpoint);
        request.headers.extend(&self.headers);

        let resp = self.send(request).await?;
        if !status::is_success(resp.status) {
            return Err(Rejection::from_response(&resp).into());
        }
        let caps = ServerCapabilities::from_headers(&resp.headers)?;
        debug!(
            endpoint,
            version = %caps.version,
            extensions = caps.extensions.len(),
            max_size = ?caps.max_size,
            "discovered server capabilities"
        );
        Ok(caps)
    }

    /// Creates an upload resource and returns its absolute location.
    pub async fn create(
        &self,
        endpoint: &str,
        length: UploadLength,
        metadata: &Metadata,
    ) -> Result<String, TusError> {
        self.create_with(endpoint, length, metadata, None).await
    }

    /// Creates a `partial` resource for later concatenation.
    pub async fn create_partial(
        &self,
        endpoint: &str,
        length: u64,
        metadata: &Metadata,
    ) -> Result<String, TusError> {
        self.create_with(endpoint, UploadLength::Known(length), metadata, Some(Concat::Partial))
            .await
    }

    /// Creates the final resource out of `parts`, in order.
    pub async fn concatenate(
        &self,
        endpoint: &str,
        parts: &[String],
        metadata: &Metadata,
    ) -> Result<String, TusError> {
        if parts.is_empty() {
            return Err(TusError::InvalidOptions(
                "concatenation needs at least one part".into(),
            ));
        }
        let mut request = self
            .request(Method::Post, endpoint)
            .header(UPLOAD_CONCAT, Concat::Final(parts.to_vec()).encode());
        if !metadata.is_empty() {
            request.headers.insert(UPLOAD_METADATA, encode_metadata(metadata)?);
        }

        let resp = self.send(request).await?;
        let location = self.created_location(endpoint, &resp)?;
        info!(location = %location, parts = parts.len(), "concatenated upload");
        Ok(location)
    }

    async fn create_with(
        &self,
        endpoint: &str,
        length: UploadLength,
        metadata: &Metadata,
        concat: Option<Concat>,
    ) -> Result<String, TusError> {
        let mut request = self.request(Method::Post, endpoint);
        match length {
            UploadLength::Known(len) => request.headers.insert(UPLOAD_LENGTH, len.to_string()),
            UploadLength::Deferred => request.headers.insert(UPLOAD_DEFER_LENGTH, "1"),
        }
        if !metadata.is_empty() {
            request.headers.insert(UPLOAD_METADATA, encode_metadata(metadata)?);
        }
        if let Some(concat) = concat {
            request.headers.insert(UPLOAD_CONCAT, concat.encode());
        }

        let resp = self.send(request).await?;
        let location = self.created_location(endpoint, &resp)?;
        info!(location = %location, length = ?length, "created upload");
        Ok(location)
    }

    fn created_location(&self, endpoint: &str, resp: &Response) -> Result<String, TusError> {
        if !status::is_success(resp.status) {
            return Err(Rejection::from_response(resp).into());
        }
        let raw = resp
            .headers
            .get(LOCATION)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(ProtocolError::MissingHeader(LOCATION))?;
        resolve_location(endpoint, raw)
    }

    /// Reads the server's acknowledged offset for `location`.
    pub async fn probe(&self, location: &str) -> Result<OffsetInfo, TusError> {
        let resp = self.send(self.request(Method::Head, location)).await?;
        if !status::is_success(resp.status) {
            return Err(Rejection::from_response(&resp).into());
        }

        // Only the offset and length steer the upload; a descriptive header
        // the client cannot read must not block it.
        let headers = &resp.headers;
        let metadata = match headers.get(UPLOAD_METADATA).map(decode_metadata) {
            Some(Ok(metadata)) => metadata,
            Some(Err(e)) => {
                warn!(location, error = %e, "ignoring unreadable upload metadata");
                Metadata::new()
            }
            None => Metadata::new(),
        };
        let concat = match headers.get(UPLOAD_CONCAT).map(Concat::decode) {
            Some(Ok(concat)) => Some(concat),
            Some(Err(e)) => {
                warn!(location, error = %e, "ignoring unreadable concatenation header");
                None
            }
            None => None,
        };

        Ok(OffsetInfo {
            offset: headers.require_u64(UPLOAD_OFFSET)?,
            length: headers.get_u64(UPLOAD_LENGTH)?,
            deferred: headers.get(UPLOAD_DEFER_LENGTH).map(str::trim) == Some("1"),
            metadata,
            expires: headers.get(UPLOAD_EXPIRES).map(str::to_string),
            concat,
        })
    }

    /// Sends one chunk starting at `offset` and classifies the answer.
    ///
    /// `declare_length` sets `Upload-Length` on a deferred-length resource.
    /// Only contract violations come back as `Err`; everything the upload
    /// loop can act on is an [`AppendOutcome`].
    pub async fn append(
        &self,
        location: &str,
        offset: u64,
        data: Vec<u8>,
        checksum: Option<ChecksumAlgorithm>,
        declare_length: Option<u64>,
    ) -> Result<AppendOutcome, ProtocolError> {
        let mut request = self
            .request(Method::Patch, location)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(UPLOAD_OFFSET, offset.to_string());
        if let Some(algo) = checksum {
            request
                .headers
                .insert(UPLOAD_CHECKSUM, encode_checksum(algo.as_str(), &algo.digest(&data)));
        }
        if let Some(total) = declare_length {
            request.headers.insert(UPLOAD_LENGTH, total.to_string());
        }
        let request = request.body(data);

        let resp = match self.transport.send(request).await {
            Ok(resp) => resp,
            Err(e) => return Ok(AppendOutcome::TransportFailure(e)),
        };
        classify_append(&resp)
    }

    /// Uploads `source` to an existing resource, resuming from the
    /// server's offset. Returns the final offset.
    pub async fn upload(
        &self,
        location: &str,
        source: Arc<dyn ByteSource>,
        options: &UploadOptions,
    ) -> Result<u64, UploadError> {
        UploadDriver::new(self, location, source, options).run().await
    }

    /// Creates a resource sized for `source` and uploads it.
    pub async fn upload_new(
        &self,
        endpoint: &str,
        source: Arc<dyn ByteSource>,
        metadata: &Metadata,
        options: &UploadOptions,
    ) -> Result<UploadResult, TusError> {
        options.validate().map_err(TusError::InvalidOptions)?;
        let location = self
            .create(endpoint, UploadLength::Known(source.len()), metadata)
            .await?;
        // A fresh resource starts at zero; no need to ask.
        let options = UploadOptions {
            known_offset: Some(options.known_offset.unwrap_or(0)),
            ..options.clone()
        };
        let offset = self.upload(&location, source, &options).await?;
        Ok(UploadResult { location, offset })
    }

    /// Discovers the server, then uploads `source` as a new resource the
    /// best way the server allows.
    pub async fn transfer(
        &self,
        endpoint: &str,
        source: Arc<dyn ByteSource>,
        metadata: &Metadata,
        options: &TransferOptions,
    ) -> Result<UploadResult, TusError> {
        let caps = self.discover(endpoint).await?;
        if !caps.allows_length(source.len()) {
            warn!(
                length = source.len(),
                max_size = ?caps.max_size,
                "upload larger than the server allows"
            );
            return Err(Rejection::TooLarge.into());
        }

        let upload = if options.checksum {
            options.upload.clone().negotiated(&caps)
        } else {
            UploadOptions {
                checksum: None,
                ..options.upload.clone()
            }
        };

        if options.parallel > 1 {
            if caps.supports(&Extension::Concatenation) {
                return self
                    .upload_parallel(endpoint, source, options.parallel, metadata, &upload)
                    .await;
            }
            debug!("server lacks the concatenation extension, uploading sequentially");
        }
        self.upload_new(endpoint, source, metadata, &upload).await
    }

    /// Downloads the bytes of a finished upload.
    pub async fn download(&self, location: &str) -> Result<Download, TusError> {
        let resp = self.send(self.request(Method::Get, location)).await?;
        if !status::is_success(resp.status) {
            return Err(Rejection::from_response(&resp).into());
        }
        debug!(location, bytes = resp.body.len(), "downloaded upload");
        Ok(Download {
            headers: resp.headers,
            body: resp.body,
        })
    }

    /// Deletes an upload (`termination` extension).
    pub async fn remove(&self, location: &str) -> Result<bool, TusError> {
        let resp = self.send(self.request(Method::Delete, location)).await?;
        if !status::is_success(resp.status) {
            return Err(Rejection::from_response(&resp).into());
        }
        info!(location, "deleted upload");
        Ok(true)
    }
}

fn classify_append(resp: &Response) -> Result<AppendOutcome, ProtocolError> {
    let outcome = match resp.status {
        s if status::is_success(s) => {
            AppendOutcome::Accepted(resp.headers.require_u64(UPLOAD_OFFSET)?)
        }
        status::CONFLICT => AppendOutcome::Conflict(resp.headers.get_u64(UPLOAD_OFFSET)?),
        s if status::is_transient(s) => {
            AppendOutcome::TransportFailure(crate::transport::TransportError::Unavailable {
                status: s,
            })
        }
        _ => AppendOutcome::Rejected(Rejection::from_response(resp)),
    };
    Ok(outcome)
}

/// Resolves a `Location` value against the endpoint it came from.
pub fn resolve_location(endpoint: &str, location: &str) -> Result<String, TusError> {
    let invalid = |reason: String| TusError::InvalidLocation {
        location: location.to_string(),
        reason,
    };
    let base = reqwest::Url::parse(endpoint).map_err(|e| invalid(format!("bad endpoint: {e}")))?;
    let resolved = base.join(location).map_err(|e| invalid(e.to_string()))?;
    Ok(resolved.into())
}
