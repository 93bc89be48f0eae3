use regex::Regex;
use url::Url;

#[inline]
pub fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[inline]
pub fn capture_group_1_owned(re: &Regex, input: &str) -> Option<String> {
    capture_group_1(re, input).map(ToOwned::to_owned)
}

/// Undoes the escaping found in URLs embedded in inline JSON and HTML attributes.
pub fn unescape_embedded_url(raw: &str) -> String {
    raw.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("\\u002F", "/")
        .replace("&amp;", "&")
}

/// Resolves a possibly relative reference against the page it was found on.
/// Only http(s) results are returned.
pub fn absolutize(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with("data:") || reference.starts_with("blob:") {
        return None;
    }
    let url = base.join(&unescape_embedded_url(reference)).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
