//! TFVC server path semantics.
//!
//! A server path is absolute if and only if it begins with `$/`. Paths never
//! carry a trailing slash, and all comparisons are case-insensitive.

/// Key type for path-indexed maps. Hashing and equality are case-folded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PathKey(String);

impl PathKey {
    pub fn new(path: &str) -> Self {
        Self(path.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PathKey({:?})", self.0)
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with("$/")
}

pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// `b` is strictly under `a`.
pub fn contains(a: &str, b: &str) -> bool {
    debug_assert!(!a.ends_with('/') && !b.ends_with('/'));
    b.len() > a.len() + 1
        && b.as_bytes()[a.len()] == b'/'
        && b[..a.len()].eq_ignore_ascii_case(a)
}

/// `b` equals `a` or is strictly under it.
pub fn is_or_contains(a: &str, b: &str) -> bool {
    eq_ignore_case(a, b) || contains(a, b)
}

pub fn overlaps(a: &str, b: &str) -> bool {
    is_or_contains(a, b) || is_or_contains(b, a)
}

/// The last path segment, or the whole path if it has no slash.
pub fn leaf(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[(i + 1)..],
        None => path,
    }
}

/// Replaces the containing path `old_c` of `path` with `new_c`.
///
/// Panics if `old_c` does not contain `path`; callers check containment
/// first.
pub fn replace_containing(path: &str, old_c: &str, new_c: &str) -> String {
    assert!(
        is_or_contains(old_c, path),
        "\"{old_c}\" does not contain \"{path}\"",
    );
    format!("{new_c}{}", &path[old_c.len()..])
}

/// The suffix of `path` after `c/`, empty when they are equal.
pub fn remove_containing<'a>(path: &'a str, c: &str) -> &'a str {
    assert!(
        is_or_contains(c, path),
        "\"{c}\" does not contain \"{path}\"",
    );
    if path.len() == c.len() {
        ""
    } else {
        &path[(c.len() + 1)..]
    }
}

/// Strips trailing segments common to `src` and `tgt`.
///
/// A merge or branch record is usually file- or subdirectory-level
/// (`$/X/A/Sub` ↔ `$/X/B/Sub`); stripping the matching tail yields the
/// largest pair of roots the record relates (`$/X/A`, `$/X/B`). Returns a
/// pair of empty strings when both sides collapse to the same path.
pub fn strip_common_trailing_segments<'a>(
    mut src: &'a str,
    mut tgt: &'a str,
) -> (&'a str, &'a str) {
    while let Some(slash) = src.rfind('/') {
        let segment = &src[slash..];
        if tgt.len() > segment.len()
            && tgt[(tgt.len() - segment.len())..].eq_ignore_ascii_case(segment)
        {
            src = &src[..slash];
            tgt = &tgt[..(tgt.len() - segment.len())];
        } else {
            break;
        }
    }

    if src.eq_ignore_ascii_case(tgt) {
        ("", "")
    } else {
        (src, tgt)
    }
}

/// Reduces `paths` to a set where no path contains another. A later path
/// that contains earlier ones displaces them.
pub fn non_overlapping_union<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut union = Vec::<String>::new();
    'next: for path in paths {
        let path = path.as_ref();
        let mut i = 0;
        while i < union.len() {
            if is_or_contains(&union[i], path) {
                continue 'next;
            }
            if contains(path, &union[i]) {
                union.remove(i);
            } else {
                i += 1;
            }
        }
        union.push(path.to_owned());
    }
    union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment() {
        assert!(contains("$/A", "$/A/B"));
        assert!(contains("$/A", "$/A/B/C"));
        assert!(!contains("$/A", "$/A"));
        assert!(!contains("$/A", "$/AB"));
        assert!(!contains("$/A/B", "$/A"));
        assert!(contains("$/X", "$/x/y"));

        assert!(is_or_contains("$/A", "$/A"));
        assert!(is_or_contains("$/a", "$/A/b"));
        assert!(!is_or_contains("$/A/b", "$/A"));

        assert!(overlaps("$/A", "$/A/B"));
        assert!(overlaps("$/A/B", "$/A"));
        assert!(!overlaps("$/A", "$/B"));
    }

    #[test]
    fn leaf_of_path() {
        assert_eq!(leaf("$/A/B/C"), "C");
        assert_eq!(leaf("name"), "name");
        assert_eq!(leaf("$/Root"), "Root");
    }

    #[test]
    fn replace_and_remove() {
        assert_eq!(replace_containing("$/A/B/c.txt", "$/A", "$/X"), "$/X/B/c.txt");
        assert_eq!(replace_containing("$/A", "$/A", "$/X"), "$/X");
        assert_eq!(remove_containing("$/A/B/c.txt", "$/A"), "B/c.txt");
        assert_eq!(remove_containing("$/A", "$/a"), "");
    }

    #[test]
    fn strip_trailing_segments() {
        assert_eq!(
            strip_common_trailing_segments("$/A/Sub", "$/B/Sub"),
            ("$/A", "$/B"),
        );
        assert_eq!(
            strip_common_trailing_segments("$/A/Sub/f.txt", "$/B/Sub/f.txt"),
            ("$/A", "$/B"),
        );
        assert_eq!(strip_common_trailing_segments("$/A/X", "$/A/X"), ("", ""));
        assert_eq!(strip_common_trailing_segments("$/A/x", "$/A/X"), ("", ""));
        assert_eq!(
            strip_common_trailing_segments("$/A/Sub", "$/B/Other"),
            ("$/A/Sub", "$/B/Other"),
        );
        assert_eq!(
            strip_common_trailing_segments("$/P", "$/P/B"),
            ("$/P", "$/P/B"),
        );
    }

    #[test]
    fn union_without_overlap() {
        assert_eq!(
            non_overlapping_union(["$/A", "$/A/B", "$/C"]),
            vec!["$/A".to_owned(), "$/C".to_owned()],
        );
        // a later containing path displaces contained ones
        assert_eq!(
            non_overlapping_union(["$/A/B", "$/A/C", "$/A"]),
            vec!["$/A".to_owned()],
        );
        assert_eq!(
            non_overlapping_union(["$/a", "$/A"]),
            vec!["$/a".to_owned()],
        );
    }

    #[test]
    fn path_key_folds_case() {
        assert_eq!(PathKey::new("$/A/B"), PathKey::new("$/a/b"));
        assert_ne!(PathKey::new("$/A"), PathKey::new("$/B"));
    }
}
