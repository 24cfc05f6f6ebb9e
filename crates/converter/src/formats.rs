use std::fmt;
use humansize::{format_size, WINDOWS};
use serde::{Deserialize, Serialize};

use crate::source::{extension_of, SourceFile};

/// Coarse media kind driving backend choice and the offered format list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Video,
    Audio,
    Image,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Image => "image",
            Category::Unknown => "unknown",
        }
    }

    /// Audio and video go through the transcoding engine, images through the raster path
    pub fn uses_engine(&self) -> bool {
        matches!(self, Category::Video | Category::Audio)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const VIDEO_FORMATS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "gif"];
pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "aac", "ogg", "flac"];
pub const IMAGE_FORMATS: &[&str] = &["jpg", "png", "webp", "tiff", "bmp"];

/// Declared content types we recognise
const MIME_CATEGORIES: &[(&str, Category)] = &[
    ("video/mp4", Category::Video),
    ("video/x-matroska", Category::Video),
    ("video/webm", Category::Video),
    ("video/x-msvideo", Category::Video),
    ("video/quicktime", Category::Video),
    ("video/avi", Category::Video),
    ("audio/mpeg", Category::Audio),
    ("audio/wav", Category::Audio),
    ("audio/aac", Category::Audio),
    ("audio/ogg", Category::Audio),
    ("audio/flac", Category::Audio),
    ("audio/x-flac", Category::Audio),
    ("audio/mp3", Category::Audio),
    ("audio/x-wav", Category::Audio),
    ("image/jpeg", Category::Image),
    ("image/png", Category::Image),
    ("image/webp", Category::Image),
    ("image/tiff", Category::Image),
    ("image/bmp", Category::Image),
    ("image/gif", Category::Image),
];

/// Extension fallback. A bare `.gif` is animated content, so it goes to the engine as video.
const EXTENSION_CATEGORIES: &[(&str, Category)] = &[
    ("mp4", Category::Video),
    ("mkv", Category::Video),
    ("webm", Category::Video),
    ("avi", Category::Video),
    ("mov", Category::Video),
    ("gif", Category::Video),
    ("mp3", Category::Audio),
    ("wav", Category::Audio),
    ("aac", Category::Audio),
    ("ogg", Category::Audio),
    ("flac", Category::Audio),
    ("jpg", Category::Image),
    ("jpeg", Category::Image),
    ("png", Category::Image),
    ("webp", Category::Image),
    ("tiff", Category::Image),
    ("tif", Category::Image),
    ("bmp", Category::Image),
];

const MIME_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("gif", "image/gif"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("aac", "audio/aac"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/flac"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
    ("pdf", "application/pdf"),
];

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Classify a file from its declared content type, then its extension.
pub fn detect_category(file: &SourceFile) -> Category {
    classify(&file.name, file.content_type.as_deref())
}

/// Name/content-type form of [`detect_category`]. Total: unmatched input is `Unknown`.
pub fn classify(name: &str, content_type: Option<&str>) -> Category {
    if let Some(declared) = content_type {
        if let Some((_, category)) = MIME_CATEGORIES.iter().find(|(mime, _)| *mime == declared) {
            return *category;
        }
    }

    let ext = extension_of(name);
    EXTENSION_CATEGORIES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, category)| *category)
        .unwrap_or(Category::Unknown)
}

/// Ordered target formats for a category; empty for `Unknown`
pub fn formats_for(category: Category) -> &'static [&'static str] {
    match category {
        Category::Video => VIDEO_FORMATS,
        Category::Audio => AUDIO_FORMATS,
        Category::Image => IMAGE_FORMATS,
        Category::Unknown => &[],
    }
}

/// Preselected target format, `None` for `Unknown`
pub fn default_format(category: Category) -> Option<&'static str> {
    match category {
        Category::Video => Some("mp4"),
        Category::Audio => Some("mp3"),
        Category::Image => Some("jpg"),
        Category::Unknown => None,
    }
}

/// MIME type for a produced artifact. Never fails.
pub fn mime_type(format: &str) -> &'static str {
    MIME_TYPES
        .iter()
        .find(|(f, _)| *f == format)
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

/// Display label for a format identifier (`"webm"` -> `"WEBM"`)
pub fn format_label(format: &str) -> String {
    format.to_uppercase()
}

/// Human-readable 1024-based size, e.g. `"43.11 MB"`
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    format_size(bytes, WINDOWS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_content_type_wins_over_extension() {
        assert_eq!(classify("clip.mp3", Some("video/mp4")), Category::Video);
        assert_eq!(classify("photo.png", Some("image/png")), Category::Image);
    }

    #[test]
    fn test_unrecognised_content_type_falls_back_to_extension() {
        assert_eq!(classify("clip.mov", Some("application/x-whatever")), Category::Video);
        assert_eq!(classify("voice.WAV", None), Category::Audio);
        assert_eq!(classify("scan.tif", None), Category::Image);
    }

    #[test]
    fn test_gif_is_video_by_extension_but_image_by_mime() {
        assert_eq!(classify("loop.gif", None), Category::Video);
        assert_eq!(classify("loop.gif", Some("image/gif")), Category::Image);
    }

    #[test]
    fn test_unknown_file() {
        let file = SourceFile::new("data.xyz", None, Vec::new());
        let category = detect_category(&file);
        assert_eq!(category, Category::Unknown);
        assert!(formats_for(category).is_empty());
        assert_eq!(default_format(category), None);
    }

    #[test]
    fn test_defaults_are_offered_formats() {
        for category in [Category::Video, Category::Audio, Category::Image] {
            let default = default_format(category).unwrap();
            assert_eq!(formats_for(category)[0], default);
        }
    }

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_type("mkv"), "video/x-matroska");
        assert_eq!(mime_type("jpg"), "image/jpeg");
        assert_eq!(mime_type("gif"), "image/gif");
        assert_eq!(mime_type("xyz"), OCTET_STREAM);
        assert_eq!(mime_type(""), OCTET_STREAM);
    }

    #[test]
    fn test_size_label() {
        assert_eq!(format_file_size(0), "0 B");
        assert!(format_file_size(45_203_456).starts_with("43.11"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Detection yields one of the four categories for arbitrary names and content types
        #[test]
        fn test_detection_is_total(
            name in ".{0,40}",
            content_type in proptest::option::of("[a-z]{1,8}/[a-z0-9.+-]{1,12}"),
        ) {
            let category = classify(&name, content_type.as_deref());
            prop_assert!(matches!(
                category,
                Category::Video | Category::Audio | Category::Image | Category::Unknown
            ));
            // Same input, same answer
            prop_assert_eq!(category, classify(&name, content_type.as_deref()));
        }

        /// Every catalog format has a concrete MIME type
        #[test]
        fn test_catalog_formats_have_mime(
            format in prop::sample::select(
                [VIDEO_FORMATS, AUDIO_FORMATS, IMAGE_FORMATS].concat()
            ),
        ) {
            prop_assert_ne!(mime_type(format), OCTET_STREAM);
        }
    }
}
