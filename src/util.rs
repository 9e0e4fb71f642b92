use std::fmt::{self, Display};

pub(crate) type BuildHasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasher>;
pub(crate) type HashSet<K> = hashbrown::HashSet<K, BuildHasher>;
pub(crate) type HEntry<'a, A, B> = hashbrown::hash_map::Entry<'a, A, B, BuildHasher>;
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasher>;
pub type IndexSet<K> = indexmap::IndexSet<K, BuildHasher>;

/// Displays the items of a list separated by the given string.
pub struct ListDisplay<'a, T>(pub T, pub &'a str);

impl<T> Display for ListDisplay<'_, T>
where
    T: IntoIterator + Clone,
    T::Item: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for item in self.0.clone() {
            if !first {
                f.write_str(self.1)?;
            }
            first = false;
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

/// Truncate a message to at most `max` bytes, on a char boundary, marking
/// the cut with `...`.
pub fn truncate_message(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_display_joins() {
        assert_eq!(ListDisplay(&[1, 2, 3], ", ").to_string(), "1, 2, 3");
        assert_eq!(ListDisplay(Vec::<u8>::new(), ", ").to_string(), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_message("short".into(), 10), "short");
        assert_eq!(truncate_message("abcdefghijkl".into(), 8), "abcde...");
        let s = truncate_message("ééééé".into(), 6);
        assert!(s.ends_with("..."));
        assert!(s.len() <= 6);
    }
}
