//! URL helpers shared by the server, protocol and live documents.
//!
//! Browsers report resource URLs with whatever query string or fragment
//! the page used; everything keyed by URL goes through [`strip_query`]
//! first.

use url::Url;

/// `origin + pathname` of an absolute URL, or `None` if it does not parse.
pub fn origin_and_path(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    Some(format!("{}{}", url.origin().ascii_serialization(), url.path()))
}

/// Drop query string and fragment. Relative or malformed input is cut at
/// the first `?` or `#`.
pub fn strip_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    }
}

/// Resolve `reference` against `base`. Absolute references, data URIs and
/// unparsable bases are returned unchanged.
pub fn make_absolute(base: &str, reference: &str) -> String {
    if reference.starts_with("data:") || reference.starts_with('#') {
        return reference.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(reference))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

/// Join a base URL with an already percent-encoded, `/`-leading key.
pub fn join_url(base: &Url, key: &str) -> Option<String> {
    base.join(key.trim_start_matches('/')).ok().map(|u| u.to_string())
}
