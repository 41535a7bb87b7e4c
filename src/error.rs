use std::path::PathBuf;
use thiserror::Error;

/// The main error type for labelkit operations.
#[derive(Debug, Error)]
pub enum LabelkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write {path}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    ExportJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse session state from {path}: {source}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write session state to {path}: {source}")]
    StateWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported session state version {found} in {path} (expected {expected})")]
    StateVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Failed to parse config from {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read image dimensions for {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Image {path} has zero width or height")]
    ZeroDimensions { path: PathBuf },

    #[error("Image {path} is not part of the session")]
    UnknownImage { path: PathBuf },

    #[error("Image {path} has no pixel data in memory or on disk")]
    MissingPixels { path: PathBuf },

    #[error("Invalid resolution '{0}' (expected WxH with positive integers, e.g. 640x640)")]
    InvalidResolution(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value {value} for {field}: {message}")]
    InvalidSetting {
        field: String,
        value: f64,
        message: String,
    },

    #[error("No annotated images to export")]
    NothingToExport,

    #[error("Invalid class name '{0}'")]
    InvalidClassName(String),

    #[error("Class '{0}' already exists")]
    DuplicateClass(String),

    #[error("A batch referencing class ids is still running")]
    SessionBusy,

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation cancelled")]
    Cancelled,
}
