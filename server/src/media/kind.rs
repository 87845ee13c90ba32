use serde::Serialize;
use std::path::Path;

/// Broad class of a playable file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "webm", "mov", "flv", "wmv", "mpeg", "mpg", "m4v",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma", "ape", "alac",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif",
];

impl MediaKind {
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

/// Content type for a served file.
///
/// `mime_guess` covers the common formats; the rest fall back to the
/// matching media family so browsers still pick a player.
pub fn content_type(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match mime_guess::from_path(path).first() {
        Some(mime) => mime.to_string(),
        None => match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ape") => "audio/ape".to_string(),
            Some(ext) if ext.eq_ignore_ascii_case("alac") => "audio/alac".to_string(),
            _ => "application/octet-stream".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(MediaKind::from_path("a/b/Clip.MP4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path("song.flac"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_path("cover.jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path("notes.txt"), None);
        assert_eq!(MediaKind::from_path("no_extension"), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.mp4"), "video/mp4");
        assert_eq!(content_type("a.png"), "image/png");
        assert_eq!(content_type("a.unknownext"), "application/octet-stream");
    }
}
