pub mod chat_template;
pub mod config;

/// Length (in bytes) of the longest suffix of `s` that is also a prefix of `delim`.
///
/// Candidates are scanned from the longest down so that the largest ambiguous
/// tail is held back. Only char boundaries of `delim` are considered, which keeps
/// `s[..s.len() - n]` a valid split point as well.
pub fn suffix_overlap(s: &str, delim: &str) -> usize {
    let max = delim.len().min(s.len());
    (1..=max)
        .rev()
        .find(|&i| delim.is_char_boundary(i) && s.ends_with(&delim[..i]))
        .unwrap_or(0)
}

/// Split `s` at its first occurrence of `delim`, returning the text before and after it.
pub fn split_once_at<'a>(s: &'a str, delim: &str) -> Option<(&'a str, &'a str)> {
    s.find(delim)
        .map(|idx| (&s[..idx], &s[idx + delim.len()..]))
}
