pub mod artifact;
pub mod config;
pub mod console;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod ffmpeg_args;
pub mod ffmpeg_native;
pub mod formats;
pub mod queue;
pub mod raster;
pub mod source;

pub use artifact::{Artifact, ArtifactHandle, ArtifactStore};
pub use config::ConverterConfig;
pub use console::{LogEntry, LogKind};
pub use download::{DirectorySink, DownloadSink};
pub use engine::{EngineAdapter, SessionState, TranscodeEngine};
pub use error::{ConvertError, ConvertResult};
pub use formats::Category;
pub use queue::{BatchSummary, ItemId, ItemState, Queue, QueueCounts, QueueItem};
pub use source::SourceFile;
