/// Protocol version spoken by this client.
pub const TUS_VERSION: &str = "1.0.0";

/// Content type required on every append request.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

// Header names, spelled exactly as they go on the wire.
pub const TUS_RESUMABLE: &str = "Tus-Resumable";
pub const TUS_VERSION_HEADER: &str = "Tus-Version";
pub const TUS_EXTENSION: &str = "Tus-Extension";
pub const TUS_MAX_SIZE: &str = "Tus-Max-Size";
pub const TUS_CHECKSUM_ALGORITHM: &str = "Tus-Checksum-Algorithm";
pub const UPLOAD_LENGTH: &str = "Upload-Length";
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const UPLOAD_METADATA: &str = "Upload-Metadata";
pub const UPLOAD_DEFER_LENGTH: &str = "Upload-Defer-Length";
pub const UPLOAD_CHECKSUM: &str = "Upload-Checksum";
pub const UPLOAD_CONCAT: &str = "Upload-Concat";
pub const UPLOAD_EXPIRES: &str = "Upload-Expires";
pub const LOCATION: &str = "Location";
pub const CONTENT_TYPE: &str = "Content-Type";

/// HTTP methods used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Post,
    Head,
    Patch,
    Get,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Get => "GET",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status codes with protocol-specific meaning.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    pub const LOCKED: u16 = 423;
    /// Non-standard status returned when `Upload-Checksum` does not match.
    pub const CHECKSUM_MISMATCH: u16 = 460;

    /// 2xx.
    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }

    /// The resource no longer exists on the server.
    pub fn is_gone(status: u16) -> bool {
        status == NOT_FOUND || status == GONE
    }

    /// Server-side conditions that leave the append outcome unknown.
    pub fn is_transient(status: u16) -> bool {
        status == LOCKED || (500..600).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_wire_names() {
        assert_eq!(Method::Patch.as_str(), "PATCH");
        assert_eq!(Method::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn status_classes() {
        assert!(status::is_success(204));
        assert!(!status::is_success(301));
        assert!(status::is_gone(404));
        assert!(status::is_gone(410));
        assert!(!status::is_gone(409));
        assert!(status::is_transient(503));
        assert!(status::is_transient(423));
        assert!(!status::is_transient(460));
    }
}
