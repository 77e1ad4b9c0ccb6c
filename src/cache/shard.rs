// Trie sharding for cache paths

use std::path::PathBuf;

/// Map an identifier to a nested relative path: "ab12cd34" -> "ab/12/ab12cd34".
/// Identifiers shorter than four characters are returned flat.
pub fn trie_path(id: &str) -> PathBuf {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() < 4 {
        return PathBuf::from(id);
    }

    let first: String = chars[0..2].iter().collect();
    let second: String = chars[2..4].iter().collect();

    let mut path = PathBuf::from(first);
    path.push(second);
    path.push(id);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_long_id_is_sharded() {
        let path = trie_path("abcd1234");
        assert_eq!(path, Path::new("ab").join("cd").join("abcd1234"));
        assert!(path.starts_with("ab/cd"));
    }

    #[test]
    fn test_documented_example() {
        assert_eq!(trie_path("ab12cd34"), Path::new("ab/12/ab12cd34"));
    }

    #[test]
    fn test_short_id_is_flat() {
        assert_eq!(trie_path("xy"), PathBuf::from("xy"));
        assert_eq!(trie_path("abc"), PathBuf::from("abc"));
    }

    #[test]
    fn test_exactly_four_chars() {
        assert_eq!(trie_path("abcd"), Path::new("ab/cd/abcd"));
    }

    #[test]
    fn test_multibyte_ids_split_on_chars() {
        assert_eq!(trie_path("éèàü99"), Path::new("éè/àü/éèàü99"));
    }
}
