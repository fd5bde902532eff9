use sha2::{Digest, Sha256};

use super::parser::RawEntry;

/// Fingerprints longer than this are replaced by their SHA-256 digest so the
/// primary key stays bounded.
const MAX_FINGERPRINT_LEN: usize = 256;

/// Derives the deduplication key for a parsed entry.
///
/// Priority:
/// 1. the source-native identifier (`guid` / `id`), verbatim;
/// 2. a fingerprint of link + published + title, lower-cased with every
///    whitespace run folded into `-`;
/// 3. `{feed_url}-{position}` when the fingerprint is empty.
///
/// The positional fallback only guarantees uniqueness within a single parse:
/// if a feed without ids, links, dates or titles reorders its entries, the
/// same entry gets a different key on the next fetch.
///
/// When `feed_id` is given (the feed is registered) the result is namespaced
/// as `{feed_id}-{raw}` so two feeds publishing identical entries never
/// collide. Pure: no clock, no randomness.
///
/// # Examples
///
/// ```
/// use feedsync::feed::{derive_id, RawEntry};
///
/// let entry = RawEntry {
///     title: Some("Hello World".into()),
///     link: Some("https://example.com/hello".into()),
///     ..RawEntry::default()
/// };
/// assert_eq!(
///     derive_id(&entry, "https://example.com/feed", Some("f1"), 0),
///     "f1-https://example.com/hellohello-world"
/// );
/// ```
pub fn derive_id(
    entry: &RawEntry,
    feed_url: &str,
    feed_id: Option<&str>,
    position: usize,
) -> String {
    let raw = match entry.source_id.as_deref() {
        Some(id) => id.to_string(),
        None => {
            let fingerprint = fingerprint(entry);
            if fingerprint.is_empty() {
                format!("{feed_url}-{position}")
            } else {
                fingerprint
            }
        }
    };

    match feed_id {
        Some(feed_id) => format!("{feed_id}-{raw}"),
        None => raw,
    }
}

fn fingerprint(entry: &RawEntry) -> String {
    let joined = [
        entry.link.as_deref(),
        entry.published.as_deref(),
        entry.title.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<String>()
    .to_lowercase();

    let token = joined.split_whitespace().collect::<Vec<_>>().join("-");

    if token.len() > MAX_FINGERPRINT_LEN {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    } else {
        token
    }
}
