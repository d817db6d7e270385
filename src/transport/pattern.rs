//! Topic-style channel patterns.
//!
//! Channels are dot-separated words. In a pattern, `*` matches exactly one
//! word and `#` matches zero or more words. A pattern without wildcards
//! matches only the identical channel.

/// Check whether `channel` matches the subscription `pattern`.
pub fn matches(pattern: &str, channel: &str) -> bool {
    if !is_wildcard(pattern) {
        return pattern == channel;
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let channel: Vec<&str> = channel.split('.').collect();
    match_words(&pattern, &channel)
}

/// Whether the pattern contains any wildcard word.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.split('.').any(|word| word == "*" || word == "#")
}

fn match_words(pattern: &[&str], channel: &[&str]) -> bool {
    match pattern.split_first() {
        None => channel.is_empty(),
        Some((&"#", rest)) => (0..=channel.len()).any(|skip| match_words(rest, &channel[skip..])),
        Some((&"*", rest)) => !channel.is_empty() && match_words(rest, &channel[1..]),
        Some((word, rest)) => channel.first() == Some(word) && match_words(rest, &channel[1..]),
    }
}
