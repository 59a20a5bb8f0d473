use crate::hashing::sha256_hex;

/// Joins heading and CTA before hashing, so ("ab", "c") and ("a", "bc") differ.
pub const KEY_SEPARATOR: &str = "||";

/// Fingerprint of a page variant.
///
/// Built from the hero heading and CTA text, ignoring case. When both are
/// empty the fallback digest (usually of the whole markup) stands in. `None`
/// means the variant is unknown; clustering puts all of those in one bucket.
pub fn compute_key(
    hero_heading: &str,
    hero_cta_text: &str,
    fallback_hash: Option<&str>,
) -> Option<String> {
    if !hero_heading.trim().is_empty() || !hero_cta_text.trim().is_empty() {
        let material = format!(
            "{}{}{}",
            hero_heading.to_lowercase(),
            KEY_SEPARATOR,
            hero_cta_text.to_lowercase()
        );
        return Some(sha256_hex(material));
    }

    fallback_hash
        .filter(|h| !h.is_empty())
        .map(|h| sha256_hex(h.to_lowercase()))
}
