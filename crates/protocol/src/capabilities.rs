use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    TUS_CHECKSUM_ALGORITHM, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    TUS_VERSION_HEADER,
};
use crate::error::ProtocolError;
use crate::headers::Headers;

/// Optional protocol feature advertised in `Tus-Extension`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Extension {
    Creation,
    CreationWithUpload,
    CreationDeferLength,
    Termination,
    Checksum,
    ChecksumTrailer,
    Concatenation,
    ConcatenationUnfinished,
    Expiration,
    Other(String),
}

impl Extension {
    pub fn as_str(&self) -> &str {
        match self {
            Extension::Creation => "creation",
            Extension::CreationWithUpload => "creation-with-upload",
            Extension::CreationDeferLength => "creation-defer-length",
            Extension::Termination => "termination",
            Extension::Checksum => "checksum",
            Extension::ChecksumTrailer => "checksum-trailer",
            Extension::Concatenation => "concatenation",
            Extension::ConcatenationUnfinished => "concatenation-unfinished",
            Extension::Expiration => "expiration",
            Extension::Other(name) => name,
        }
    }
}

impl FromStr for Extension {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "creation" => Extension::Creation,
            "creation-with-upload" => Extension::CreationWithUpload,
            "creation-defer-length" => Extension::CreationDeferLength,
            "termination" => Extension::Termination,
            "checksum" => Extension::Checksum,
            "checksum-trailer" => Extension::ChecksumTrailer,
            "concatenation" => Extension::Concatenation,
            "concatenation-unfinished" => Extension::ConcatenationUnfinished,
            "expiration" => Extension::Expiration,
            other => Extension::Other(other.to_string()),
        })
    }
}

impl From<String> for Extension {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(ext) => ext,
            Err(never) => match never {},
        }
    }
}

impl From<Extension> for String {
    fn from(ext: Extension) -> Self {
        ext.as_str().to_string()
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what a server supports, as reported by the capability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Version the server answered with.
    pub version: String,
    /// Every version the server is able to speak (`Tus-Version`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_versions: Vec<String>,
    #[serde(default)]
    pub extensions: BTreeSet<Extension>,
    /// Largest upload the server accepts; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// Lower-cased names from `Tus-Checksum-Algorithm`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checksum_algorithms: Vec<String>,
}

impl ServerCapabilities {
    /// Builds the snapshot from the headers of a capability probe response.
    pub fn from_headers(headers: &Headers) -> Result<Self, ProtocolError> {
        let supported_versions = headers.get_list(TUS_VERSION_HEADER);

        let version = headers
            .get(TUS_RESUMABLE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| supported_versions.first().cloned())
            .ok_or(ProtocolError::MissingHeader(TUS_RESUMABLE))?;

        let speaks_ours = if supported_versions.is_empty() {
            version == TUS_VERSION
        } else {
            supported_versions.iter().any(|v| v == TUS_VERSION)
        };
        if !speaks_ours {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let extensions = headers
            .get_list(TUS_EXTENSION)
            .into_iter()
            .map(Extension::from)
            .collect();

        let checksum_algorithms = headers
            .get_list(TUS_CHECKSUM_ALGORITHM)
            .into_iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();

        Ok(Self {
            version,
            supported_versions,
            extensions,
            max_size: headers.get_u64(TUS_MAX_SIZE)?,
            checksum_algorithms,
        })
    }

    pub fn supports(&self, extension: &Extension) -> bool {
        self.extensions.contains(extension)
    }

    /// Whether an upload of `length` bytes fits under `Tus-Max-Size`.
    pub fn allows_length(&self, length: u64) -> bool {
        self.max_size.is_none_or(|max| length <= max)
    }

    pub fn supports_checksum_algorithm(&self, name: &str) -> bool {
        self.checksum_algorithms
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
    }
}
