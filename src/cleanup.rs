use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// yt-dlp's names for files it has not finished writing.
static IN_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(part|part-Frag\d+|ytdl)$").unwrap());

pub fn is_in_progress_name(name: &str) -> bool {
    IN_PROGRESS.is_match(name)
}

/// Best-effort removal of half-written downloads directly inside `dir`.
///
/// Only in-progress names are touched and failures are swallowed.
/// Returns how many files were removed.
pub fn remove_partial_downloads(dir: &Path) -> usize {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(is_in_progress_name))
        .filter(|e| match std::fs::remove_file(e.path()) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Could not remove {}: {}", e.path().display(), err);
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn recognises_in_progress_names() {
        assert!(is_in_progress_name("Clip.f137.mp4.part"));
        assert!(is_in_progress_name("Clip.mp4.part-Frag12"));
        assert!(is_in_progress_name("Clip.mp4.ytdl"));
        assert!(!is_in_progress_name("Clip.mp4"));
        assert!(!is_in_progress_name("party.mp4"));
        assert!(!is_in_progress_name("notes.part.txt"));
    }

    #[test]
    fn removes_only_partial_files_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["a.webm.part", "b.mp4.part-Frag3", "b.mp4.ytdl", "keep.mp4", "keep.part.txt"] {
            fs::write(root.join(name), b"x").unwrap();
        }
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("c.webm.part"), b"x").unwrap();

        assert_eq!(remove_partial_downloads(root), 3);

        assert!(!root.join("a.webm.part").exists());
        assert!(!root.join("b.mp4.part-Frag3").exists());
        assert!(!root.join("b.mp4.ytdl").exists());
        assert!(root.join("keep.mp4").exists());
        assert!(root.join("keep.part.txt").exists());
        assert!(root.join("nested").join("c.webm.part").exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(remove_partial_downloads(&dir.path().join("gone")), 0);
    }
}
