//! Project-name sanitisation and the artefact paths derived from it.
//!
//! A project name is derived once from the source title and then reused verbatim for the
//! segment directory, segment files, the archive, the remote object and the database record.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Characters that are illegal in filesystem and storage paths.
fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("static regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Strip illegal path characters, then collapse whitespace runs into single hyphens.
///
/// `sanitize("My: Video / Title") == "My-Video-Title"`. Applying it twice is a no-op.
pub fn sanitize(title: &str) -> String {
    let stripped = illegal_chars().replace_all(title, "");
    whitespace_runs()
        .replace_all(stripped.trim(), "-")
        .into_owned()
}

/// `<output_dir>/<project_name>`
pub fn segment_dir(output_dir: &Path, project_name: &str) -> PathBuf {
    output_dir.join(project_name)
}

/// `<project_name>_segment_<NNN>.mp4`, with a 1-based ordinal.
pub fn segment_file_name(project_name: &str, ordinal: usize) -> String {
    format!("{project_name}_segment_{ordinal:03}.mp4")
}

/// Name of the deliverable, used both locally and as the remote object name.
pub fn archive_file_name(project_name: &str) -> String {
    format!("{project_name}_final_version.zip")
}

/// `<archive_dir>/<project_name>_final_version.zip`
pub fn archive_path(archive_dir: &Path, project_name: &str) -> PathBuf {
    archive_dir.join(archive_file_name(project_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_illegal_chars_then_hyphenates() {
        assert_eq!(sanitize("My: Video / Title"), "My-Video-Title");
        assert_eq!(sanitize("Test Video Title"), "Test-Video-Title");
        assert_eq!(sanitize("a<b>c|d?e*f\"g\\h"), "abcdefgh");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(sanitize("  Demo \t Title\n"), "Demo-Title");
        assert_eq!(sanitize("one   two"), "one-two");
    }

    #[test]
    fn is_idempotent() {
        for title in ["My: Video / Title", "Demo Title", "  x  :  y ", "already-clean"] {
            let once = sanitize(title);
            assert_eq!(sanitize(&once), once, "title {title:?}");
        }
    }

    #[test]
    fn derived_paths_share_the_project_name() {
        let dir = segment_dir(Path::new("output"), "Demo-Title");
        assert_eq!(dir, PathBuf::from("output/Demo-Title"));
        assert_eq!(segment_file_name("Demo-Title", 1), "Demo-Title_segment_001.mp4");
        assert_eq!(segment_file_name("Demo-Title", 12), "Demo-Title_segment_012.mp4");
        assert_eq!(
            archive_path(Path::new("final_project"), "Demo-Title"),
            PathBuf::from("final_project/Demo-Title_final_version.zip")
        );
    }
}
