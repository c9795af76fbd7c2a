pub const MAX_SLUG_LENGTH: usize = 50;

/// Lower-cases the slug and strips everything outside `[a-z0-9_-]`.
/// Returns `None` when nothing usable is left.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let slug: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .take(MAX_SLUG_LENGTH)
        .collect();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weird_characters_are_stripped() {
        assert_eq!(
            normalize_slug("some/slug@with-weird|stuff").as_deref(),
            Some("someslugwith-weirdstuff")
        );
        assert_eq!(normalize_slug("My_Monitor").as_deref(), Some("my_monitor"));
    }

    #[test]
    fn test_empty_after_normalization() {
        assert_eq!(normalize_slug("@@@"), None);
        assert_eq!(normalize_slug(""), None);
    }

    #[test]
    fn test_slug_is_truncated() {
        let long = "a".repeat(80);
        assert_eq!(normalize_slug(&long).map(|s| s.len()), Some(MAX_SLUG_LENGTH));
    }
}
