use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("frame payload is empty")]
    EmptyPayload,

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error("cannot fingerprint a {width}x{height} image")]
    Fingerprint { width: u32, height: u32 },
}
