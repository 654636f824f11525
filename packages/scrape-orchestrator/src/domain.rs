//! Domain normalization.
//!
//! Corpus keys are bare hostnames: no scheme, no `www.`, no port or path,
//! lowercase. Workers may echo back whatever URL variant they finally
//! reached, so outcomes are normalized before they are merged.

use url::Url;

/// Normalize a domain or URL to the corpus key form.
///
/// Returns `None` when the input has no host.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
