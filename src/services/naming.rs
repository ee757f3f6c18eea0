//! Storage-name construction for incoming uploads.
//!
//! Client filenames are untrusted. They are reduced to a bare name, split into
//! stem and extension, and rebuilt from an allow-listed alphabet before any of
//! it touches the filesystem:
//!
//! ```text
//! "../../My Report (final).PDF"  ->  "My_Report__final_-1705312800123-48213377.PDF"
//! ```

use chrono::Utc;
use rand::Rng;

/// Longest stem, in characters, carried into a storage name.
const MAX_STEM_CHARS: usize = 64;

/// Longest extension, in characters after the dot.
const MAX_EXTENSION_CHARS: usize = 16;

/// Upper bound (exclusive) of the random suffix.
const NONCE_RANGE: u32 = 1_000_000_000;

/// Strip every directory component, accepting both `/` and `\` separators.
pub fn bare_filename(name: &str) -> &str {
    name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name)
}

/// Split a bare filename into `(stem, extension)`.
///
/// The extension keeps its leading dot. A dot that only starts the name
/// (`.bashrc`, `..`) does not begin an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if !name[..idx].trim_start_matches('.').is_empty() => {
            (&name[..idx], &name[idx..])
        }
        _ => (name, ""),
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Replace every character outside ASCII letters, digits and CJK Unified
/// Ideographs with `_`, one underscore per character.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .take(MAX_STEM_CHARS)
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect()
}

/// Keep the leading dot and the ASCII alphanumerics of an extension.
///
/// Returns an empty string when nothing usable remains.
pub fn sanitize_extension(ext: &str) -> String {
    let body: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_CHARS)
        .collect();

    if body.is_empty() {
        String::new()
    } else {
        format!(".{body}")
    }
}

/// Sanitized stem and extension for a client-supplied filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub stem: String,
    pub extension: String,
}

impl NameParts {
    pub fn from_original(original: &str) -> Self {
        let (stem, ext) = split_extension(bare_filename(original));
        Self {
            stem: sanitize_stem(stem),
            extension: sanitize_extension(ext),
        }
    }

    /// Allocate a fresh storage name from the current clock and a random nonce.
    pub fn allocate(&self) -> String {
        let nonce = rand::thread_rng().gen_range(0..NONCE_RANGE);
        format_storage_name(
            &self.stem,
            Utc::now().timestamp_millis(),
            nonce,
            &self.extension,
        )
    }
}

/// `<stem>-<millis>-<nonce><ext>`. Never empty, even for an empty stem.
pub fn format_storage_name(stem: &str, millis: i64, nonce: u32, extension: &str) -> String {
    format!("{stem}-{millis}-{nonce}{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_filename_strips_both_separators() {
        assert_eq!(bare_filename("../../etc/passwd"), "passwd");
        assert_eq!(bare_filename("..\\..\\windows\\win.ini"), "win.ini");
        assert_eq!(bare_filename("plain.txt"), "plain.txt");
        assert_eq!(bare_filename("dir/"), "");
    }

    #[test]
    fn split_extension_follows_last_dot() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension(".."), ("..", ""));
        assert_eq!(split_extension("trailing."), ("trailing", "."));
    }

    #[test]
    fn sanitize_stem_removes_traversal_and_control_chars() {
        let hostile = [
            "../../etc/passwd",
            "..\\..\\boot.ini",
            "a/b\\c",
            "nul\0byte",
            "tab\there\r\n",
            "\u{7f}del",
        ];
        for input in hostile {
            let out = sanitize_stem(input);
            assert!(!out.contains('/'), "{out:?}");
            assert!(!out.contains('\\'), "{out:?}");
            assert!(!out.contains(".."), "{out:?}");
            assert!(!out.chars().any(|c| c.is_control()), "{out:?}");
        }
    }

    #[test]
    fn sanitize_stem_replaces_each_char_with_one_underscore() {
        assert_eq!(sanitize_stem("my file (1)"), "my_file__1_");
        assert_eq!(sanitize_stem("../x"), "___x");
        assert_eq!(sanitize_stem(""), "");
        assert_eq!(sanitize_stem("???"), "___");
    }

    #[test]
    fn sanitize_stem_keeps_cjk() {
        assert_eq!(sanitize_stem("报告 2024"), "报告_2024");
        // Katakana is outside the ideograph block.
        assert_eq!(sanitize_stem("ファイル"), "____");
    }

    #[test]
    fn sanitize_stem_caps_length() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_stem(&long).chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn sanitize_extension_keeps_alphanumerics() {
        assert_eq!(sanitize_extension(".pdf"), ".pdf");
        assert_eq!(sanitize_extension(".P N\0G"), ".PNG");
        assert_eq!(sanitize_extension("."), "");
        assert_eq!(sanitize_extension(""), "");
        assert_eq!(sanitize_extension(&format!(".{}", "x".repeat(40))).len(), 17);
    }

    #[test]
    fn name_parts_from_hostile_original() {
        let parts = NameParts::from_original("../../etc/passwd");
        assert_eq!(parts.stem, "passwd");
        assert_eq!(parts.extension, "");

        let parts = NameParts::from_original("C:\\Users\\me\\My Report.PDF");
        assert_eq!(parts.stem, "My_Report");
        assert_eq!(parts.extension, ".PDF");
    }

    #[test]
    fn allocate_never_returns_empty() {
        let parts = NameParts::from_original("");
        let name = parts.allocate();
        assert!(!name.is_empty());
        assert!(name.starts_with('-'));

        assert_eq!(format_storage_name("", 0, 0, ""), "-0-0");
    }

    #[test]
    fn allocate_has_expected_shape() {
        let parts = NameParts::from_original("report.pdf");
        let name = parts.allocate();
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".pdf"));

        let middle = &name["report-".len()..name.len() - ".pdf".len()];
        let (millis, nonce) = middle.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert!(nonce.parse::<u32>().unwrap() < NONCE_RANGE);
    }

    #[test]
    fn allocations_differ() {
        let parts = NameParts::from_original("a.txt");
        let names: std::collections::HashSet<_> = (0..64).map(|_| parts.allocate()).collect();
        assert!(names.len() > 1);
    }
}
