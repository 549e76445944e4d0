use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only track the reader and never change the content.
const TRACKING_PARAMS: [&str; 13] = [
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_hsenc",
    "_hsmi", "ref", "ref_src", "spm",
];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Canonical form of a URL for identity purposes.
///
/// Unparseable input falls back to the trimmed, lower-cased string so that
/// the same broken link still hashes identically across runs.
pub fn normalize_url(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut url = match Url::parse(&lowered) {
        Ok(url) => url,
        Err(_) => return lowered.split('#').next().unwrap_or_default().to_string(),
    };

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut normalized = url.to_string();
    // Url always renders an empty root path as "/"
    if url.path() == "/" && url.query().is_none() {
        normalized.pop();
    }
    normalized
}

/// `title|description`, lower-cased with punctuation and whitespace collapsed.
pub fn normalize_content(title: &str, description: &str) -> String {
    let joined = format!("{}|{}", title, description).to_lowercase();
    let mut out = String::with_capacity(joined.len());
    let mut pending_space = false;
    for c in joined.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            // punctuation and whitespace both become a single separator
            pending_space = true;
        }
    }
    out
}

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

pub fn url_hash(url: &str) -> String {
    sha256_hex(&normalize_url(url))
}

/// Empty when title and description carry no alphanumeric text: such an item
/// has no content identity and must never match another on content.
pub fn content_hash(title: &str, description: &str) -> String {
    let normalized = normalize_content(title, description);
    if normalized.is_empty() {
        return String::new();
    }
    sha256_hex(&normalized)
}
