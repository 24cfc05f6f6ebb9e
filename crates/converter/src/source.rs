use std::path::Path;
use anyhow::{Context, Result};
use bytes::Bytes;

/// A raw input file as handed over by a file picker or the command line.
///
/// The bytes are shared, never mutated; cloning is cheap.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    /// Declared content type (e.g. `video/quicktime`), if the supplier knows one
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.filter(|t| !t.is_empty()),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk. No content type is declared, so detection falls
    /// back to the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("File has no usable name: {}", path.display()))?
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        Ok(Self::new(name, None, data))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lower-cased text after the last dot, or the whole name when there is no dot
    pub fn extension(&self) -> String {
        extension_of(&self.name)
    }

    /// Name without its final extension
    pub fn base_name(&self) -> &str {
        base_name_of(&self.name)
    }
}

/// Lower-cased extension after the last dot; a name without a dot is its own "extension".
pub fn extension_of(name: &str) -> String {
    name.rsplit('.').next().unwrap_or("").to_lowercase()
}

/// Text before the last dot. Names without a usable base (`"video"`, `".mp4"`) are returned whole.
pub fn base_name_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}
