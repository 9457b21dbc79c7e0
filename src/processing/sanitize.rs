//! Helpers for normalizing user-supplied names before they touch the filesystem.

const MAX_STEM_CHARS: usize = 120;

/// Strip directory components and unsafe characters from an uploaded file name.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`. Leading dots are
/// removed so the result can never be hidden or resolve to `..`. Returns `None` when nothing
/// usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        return None;
    }

    let (stem, extension) = match cleaned.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (cleaned, None),
    };
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    Some(match extension {
        Some(extension) => format!("{stem}.{}", extension.to_ascii_lowercase()),
        None => stem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directories_and_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), Some("passwd".into()));
        assert_eq!(sanitize_filename("C:\\Users\\me\\Report.PDF"), Some("Report.pdf".into()));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(
            sanitize_filename("quarterly report (final).pdf"),
            Some("quarterly_report__final_.pdf".into())
        );
        assert_eq!(sanitize_filename(".hidden.txt"), Some("hidden.txt".into()));
    }

    #[test]
    fn bounds_stem_length() {
        let long = format!("{}.pdf", "a".repeat(500));
        let sanitized = sanitize_filename(&long).expect("name");
        assert_eq!(sanitized.len(), MAX_STEM_CHARS + 4);
        assert!(sanitized.ends_with(".pdf"));
    }
}
