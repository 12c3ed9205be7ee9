use thiserror::Error;
use std::io;

/// Errors of the noise security upgrade.
#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("noise protocol error: {0}")]
    Noise(snow::Error),

    #[error("AEAD tag verification failed")]
    MacFailure,

    #[error("remote identity could not be authenticated")]
    AuthenticationFailed,

    #[error("malformed handshake payload: {0}")]
    InvalidPayload(#[from] prost::DecodeError),

    #[error("invalid public key in handshake payload")]
    InvalidKey,

    #[error("signing the handshake payload failed")]
    SigningFailed,

    #[error("noise record of {0} bytes exceeds the wire limit")]
    OversizedRecord(usize),
}

impl From<snow::Error> for NoiseError {
    fn from(e: snow::Error) -> Self {
        match e {
            snow::Error::Decrypt => NoiseError::MacFailure,
            e => NoiseError::Noise(e),
        }
    }
}

impl From<NoiseError> for io::Error {
    fn from(e: NoiseError) -> Self {
        match e {
            NoiseError::Io(e) => e,
            NoiseError::MacFailure => io::Error::new(io::ErrorKind::InvalidData, e),
            NoiseError::AuthenticationFailed => io::Error::new(io::ErrorKind::PermissionDenied, e),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
