use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The stream name identifies the checkpoint row and cannot be empty.
    #[error("`stream_name` cannot be empty")]
    EmptyStreamName,
    /// A numeric field is outside its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
