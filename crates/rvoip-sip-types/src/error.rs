//! Errors for URI and SDP parsing/formatting.

/// Errors raised while parsing or formatting SIP URIs and SDP bodies.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SipTypesError {
    #[error("malformed SIP URI: {0}")]
    MalformedUri(String),

    #[error("malformed SDP: {0}")]
    MalformedSdp(String),

    #[error("unsupported SDP attribute value: {0}")]
    UnsupportedAttribute(String),

    #[error("missing required SDP field: {0}")]
    MissingField(&'static str),
}

/// Crate-local result alias, matching the teacher's per-crate `XResult<T>` convention.
pub type Result<T> = std::result::Result<T, SipTypesError>;
