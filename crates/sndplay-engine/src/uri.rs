//! Mapping from playlist uris to local paths.

use std::path::{Path, PathBuf};

/// Resolve a `file://` uri or a plain filesystem path to a path.
///
/// Returns `None` for other schemes or undecodable input.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    if let Some(rest) = uri.strip_prefix("file://") {
        // file://localhost/path and file:///path both name /path
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        if !rest.starts_with('/') {
            return None;
        }
        let decoded = urlencoding::decode(rest).ok()?;
        return Some(PathBuf::from(decoded.into_owned()));
    }
    if has_scheme(uri) {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// Display title for a path: its final component.
pub fn title_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn has_scheme(uri: &str) -> bool {
    match uri.find("://") {
        Some(idx) => {
            let scheme = &uri[..idx];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uri_is_percent_decoded() {
        let path = uri_to_path("file:///music/My%20Song.wav").unwrap();
        assert_eq!(path, PathBuf::from("/music/My Song.wav"));
    }

    #[test]
    fn file_uri_with_localhost() {
        let path = uri_to_path("file://localhost/tmp/a.flac").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/a.flac"));
    }

    #[test]
    fn plain_path_passes_through() {
        assert_eq!(uri_to_path("a/b.wav"), Some(PathBuf::from("a/b.wav")));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(uri_to_path("http://example.com/a.wav").is_none());
        assert!(uri_to_path("file://host/a.wav").is_none());
        assert!(uri_to_path("  ").is_none());
    }

    #[test]
    fn title_is_basename() {
        assert_eq!(title_for(Path::new("/music/My Song.wav")), "My Song.wav");
    }
}
