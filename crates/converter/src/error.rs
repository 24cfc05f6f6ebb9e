use thiserror::Error;

use crate::formats::Category;
use crate::queue::{ItemId, ItemState};

/// Failure taxonomy for the conversion core.
///
/// Everything on the conversion path is caught at the `convert_one` boundary
/// and turned into the item's `error` state using the `Display` text below.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Neither the declared content type nor the extension resolved a category
    #[error("Unsupported file type: {name}")]
    DetectionUnknown { name: String },

    /// The transcoding engine never finished initialising
    #[error("Engine failed to load: {0}")]
    EngineLoad(String),

    /// The engine ran but the conversion itself failed
    #[error("Transcoding failed: {0}")]
    Transcode(String),

    /// The raster path could not decode the source image
    #[error("Could not decode image: {0}")]
    Decode(String),

    /// The raster path could not produce bytes for the requested type
    #[error("Could not export image as {0}")]
    Encode(String),

    /// Best-effort removal of a staged file failed. Logged, never surfaced.
    #[error("Could not delete virtual file {name}: {reason}")]
    VirtualFsCleanup { name: String, reason: String },

    #[error("No queued item with id {0}")]
    ItemNotFound(ItemId),

    #[error("Item {id} cannot do that while {state}")]
    InvalidTransition { id: ItemId, state: ItemState },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Format {format} is not available for {category} files")]
    UnsupportedFormat { format: String, category: Category },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ConvertResult<T> = Result<T, ConvertError>;
