use thiserror::Error;
use url::Url;

/// Errors that can occur while normalizing a feed URL.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme feeds cannot be retrieved from.
    #[error("Unsupported scheme: {0} (only http, https and file allowed)")]
    UnsupportedScheme(String),
    /// An http(s) URL without a host.
    #[error("URL has no host")]
    MissingHost,
}

/// Normalizes a configured feed URL to its canonical form.
///
/// The canonical form is what the configuration index and the dedup cache
/// are keyed by, so two spellings of the same feed must normalize to the
/// same string:
/// - scheme and host are lower-cased
/// - the scheme's default port is dropped
/// - an empty path becomes `/`
/// - the fragment is removed
///
/// # Errors
///
/// Returns [`UrlError`] if the string does not parse, uses a scheme other
/// than `http`, `https` or `file`, or is an http(s) URL without a host.
///
/// # Examples
///
/// ```
/// use feedpoll::util::normalize_url;
///
/// let url = normalize_url("https://Example.com").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/");
///
/// assert!(normalize_url("ftp://example.com/feed").is_err());
/// assert!(normalize_url("not a url").is_err());
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {
            if url.host_str().map_or(true, str::is_empty) {
                return Err(UrlError::MissingHost);
            }
        }
        "file" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }

    url.set_fragment(None);
    Ok(url)
}

/// Removes the query string and fragment from a link.
///
/// Links that do not parse as URLs are cut at the first `?` or `#`.
pub fn prune_url(link: &str) -> String {
    match Url::parse(link) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => {
            let end = link.find(['?', '#']).unwrap_or(link.len());
            link[..end].to_string()
        }
    }
}
