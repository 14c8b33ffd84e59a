//! Wire vocabulary for the tus 1.0.0 resumable upload protocol.
//!
//! Pure types and codecs only; nothing here performs I/O.

pub mod capabilities;
pub mod constants;
pub mod error;
pub mod fields;
pub mod headers;
pub mod metadata;

// Re-export primary types for convenience.
pub use capabilities::{Extension, ServerCapabilities};
pub use constants::{Method, TUS_VERSION};
pub use error::ProtocolError;
pub use fields::{Concat, decode_checksum, encode_checksum};
pub use headers::Headers;
pub use metadata::{Metadata, decode_metadata, encode_metadata};
