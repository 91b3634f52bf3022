use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command execution failed: {0}")]
    Exec(String),

    #[error("image not present locally: {0}")]
    ImageNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<HostdError> for tonic::Status {
    fn from(err: HostdError) -> Self {
        match err {
            HostdError::ImageNotFound(_) => tonic::Status::not_found(err.to_string()),
            HostdError::InvalidConfig(_) => tonic::Status::invalid_argument(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}
