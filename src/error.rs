use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("ONNX runtime error: {0}")]
    Runtime(#[from] ort::Error),

    #[error("failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("no images found in directory {0}")]
    NoImages(PathBuf),

    /// The model produced a tensor of a shape the post-processing can't use.
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
