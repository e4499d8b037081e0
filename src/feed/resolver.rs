//! Turns arbitrary user input into a canonical channel id.
//!
//! Resolution runs cheapest-first:
//!
//! 1. A bare canonical id is returned as-is.
//! 2. A URL with a `channel_id` query parameter or a `/channel/<id>` path
//!    segment yields that id without any network traffic.
//! 3. A handle (`@name`, `/c/<name>`, `/user/<name>`) costs one page fetch,
//!    scraped by [`extract_channel_id_from_page`].
//!
//! Every failure collapses to `None`; callers cannot tell "not found" from
//! "upstream unreachable", and they do not need to.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::util::{browser_headers, read_limited_bytes};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

fn channel_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("valid channel id regex"))
}

fn canonical_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<link\s+rel="canonical"\s+href="https://www\.youtube\.com/([^"]+)""#)
            .expect("valid canonical link regex")
    })
}

fn initial_data_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"var ytInitialData = (\{.*?\});").expect("valid initial data regex")
    })
}

/// Key patterns scanned as a last resort, most specific first.
fn json_key_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r#""externalId":"(UC[A-Za-z0-9_-]{22})""#,
            r#""channelId":"(UC[A-Za-z0-9_-]{22})""#,
            r#""browseId":"(UC[A-Za-z0-9_-]{22})""#,
        ]
        .map(|pattern| Regex::new(pattern).expect("valid channel key regex"))
    })
}

/// Returns true if `candidate` has the exact shape of a platform channel id.
pub fn is_channel_id(candidate: &str) -> bool {
    channel_id_re().is_match(candidate)
}

/// Extracts a channel id without touching the network.
///
/// Handles a bare id and URLs carrying the id explicitly. Returns `None` for
/// handles, which need [`ChannelResolver::resolve`].
pub fn extract_channel_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('@') {
        return None;
    }
    if is_channel_id(trimmed) {
        return Some(trimmed.to_string());
    }

    let url = Url::parse(trimmed).ok()?;
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "channel_id") {
        if !id.is_empty() {
            return Some(id.into_owned());
        }
    }

    let parts = path_parts(&url);
    parts
        .iter()
        .position(|p| *p == "channel")
        .and_then(|i| parts.get(i + 1))
        .map(|id| id.to_string())
}

/// Finds a handle in user input, normalized to `@name`.
///
/// `/c/<name>` and `/user/<name>` legacy URLs are treated as the handle `@name`.
pub fn extract_handle(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if let Some(name) = trimmed.strip_prefix('@') {
        return is_handle_name(name).then(|| trimmed.to_string());
    }

    let url = Url::parse(trimmed).ok()?;
    let parts = path_parts(&url);

    if let Some(at) = parts.iter().find(|p| p.starts_with('@')) {
        return is_handle_name(&at[1..]).then(|| at.to_string());
    }
    ["c", "user"].iter().find_map(|prefix| {
        let i = parts.iter().position(|p| p.as_str() == *prefix)?;
        let name = parts.get(i + 1)?;
        is_handle_name(name).then(|| format!("@{name}"))
    })
}

fn is_handle_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c: char| c.is_whitespace() || c == '/' || c == '?')
}

fn path_parts(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Scrapes a channel page for the channel's own id.
///
/// Preference order: the canonical `<link>` pointing at `/channel/<id>`, the
/// `externalId` inside the embedded `ytInitialData` JSON, then the first
/// well-formed id under an `externalId`, `channelId` or `browseId` key.
pub fn extract_channel_id_from_page(html: &str) -> Option<String> {
    if let Some(caps) = canonical_link_re().captures(html) {
        if let Some(id) = caps[1].strip_prefix("channel/") {
            if is_channel_id(id) {
                return Some(id.to_string());
            }
        }
    }

    if let Some(caps) = initial_data_re().captures(html) {
        match serde_json::from_str::<serde_json::Value>(&caps[1]) {
            Ok(data) => {
                let found = [
                    "/metadata/channelMetadataRenderer/externalId",
                    "/metadata/playlistMetadataRenderer/externalId",
                    "/microformat/microformatDataRenderer/externalId",
                ]
                .iter()
                .filter_map(|pointer| data.pointer(pointer).and_then(|v| v.as_str()))
                .find(|id| is_channel_id(id));
                if let Some(id) = found {
                    return Some(id.to_string());
                }
            }
            Err(e) => tracing::debug!(error = %e, "ytInitialData is not valid JSON"),
        }
    }

    json_key_res()
        .iter()
        .find_map(|re| re.captures(html).map(|caps| caps[1].to_string()))
}

/// `<base>/<handle>?hl=en&gl=US`, with the handle percent-encoded as one
/// path segment.
fn handle_page_url(base_url: &str, handle: &str) -> Option<Url> {
    let mut url = Url::parse(base_url).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().push(handle);
    url.query_pairs_mut()
        .append_pair("hl", "en")
        .append_pair("gl", "US");
    Some(url)
}

/// Resolves user input to a channel id, fetching the channel page for handles.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ChannelResolver {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Returns the canonical channel id for `input`, or `None` if no id can
    /// be established. Never fails: network errors are logged and become `None`.
    pub async fn resolve(&self, input: &str) -> Option<String> {
        if let Some(id) = extract_channel_id(input) {
            return Some(id);
        }
        let handle = extract_handle(input)?;
        self.resolve_handle(&handle).await
    }

    async fn resolve_handle(&self, handle: &str) -> Option<String> {
        let Some(page_url) = handle_page_url(&self.base_url, handle) else {
            tracing::error!(handle = %handle, base_url = %self.base_url, "Cannot build handle page URL");
            return None;
        };

        let request = self
            .client
            .get(page_url.clone())
            .headers(browser_headers())
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(handle = %handle, page_url = %page_url, error = %e, "Handle resolution request failed");
                return None;
            }
            Err(_) => {
                tracing::error!(handle = %handle, page_url = %page_url, "Handle resolution timed out");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                handle = %handle,
                page_url = %page_url,
                status = response.status().as_u16(),
                "Handle resolution: page fetch failed"
            );
            return None;
        }

        let body = read_limited_bytes(response, MAX_PAGE_SIZE);
        let bytes = match tokio::time::timeout(self.timeout, body).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::error!(handle = %handle, error = %e, "Failed to read channel page");
                return None;
            }
            Err(_) => {
                tracing::error!(handle = %handle, "Channel page read timed out");
                return None;
            }
        };

        let html = String::from_utf8_lossy(&bytes);
        let id = extract_channel_id_from_page(&html);
        if id.is_none() {
            tracing::warn!(handle = %handle, "No channel id found on channel page");
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "UCabcdefghijklmnopqrstuv";
    const OTHER_ID: &str = "UCdefghijklmnopqrstuvw12";

    fn resolver(base: &str) -> ChannelResolver {
        ChannelResolver::new(reqwest::Client::new(), base, Duration::from_secs(5))
    }

    // --- Synchronous extraction (no network) ---

    #[test]
    fn test_bare_channel_id() {
        assert_eq!(extract_channel_id(ID), Some(ID.to_string()));
        assert_eq!(extract_channel_id(&format!("  {ID}\n")), Some(ID.to_string()));
    }

    #[test]
    fn test_channel_id_shape() {
        assert!(is_channel_id(ID));
        assert!(!is_channel_id("UCshort"));
        assert!(!is_channel_id(&format!("{ID}x")));
        assert!(!is_channel_id("XXabcdefghijklmnopqrstuv"));
    }

    #[test]
    fn test_channel_path_url() {
        let url = format!("https://www.youtube.com/channel/{ID}");
        assert_eq!(extract_channel_id(&url), Some(ID.to_string()));

        let with_tab = format!("https://www.youtube.com/channel/{ID}/videos");
        assert_eq!(extract_channel_id(&with_tab), Some(ID.to_string()));
    }

    #[test]
    fn test_channel_id_query_param() {
        let url = format!("https://www.youtube.com/feeds/videos.xml?channel_id={ID}");
        assert_eq!(extract_channel_id(&url), Some(ID.to_string()));
    }

    #[test]
    fn test_handles_are_not_extracted_synchronously() {
        assert_eq!(extract_channel_id("@somehandle"), None);
        assert_eq!(extract_channel_id("https://www.youtube.com/@somehandle"), None);
        assert_eq!(extract_channel_id("not a url or id"), None);
        assert_eq!(extract_channel_id(""), None);
    }

    #[test]
    fn test_extract_handle_variants() {
        assert_eq!(extract_handle("@somehandle").as_deref(), Some("@somehandle"));
        assert_eq!(
            extract_handle("https://www.youtube.com/@somehandle/videos").as_deref(),
            Some("@somehandle")
        );
        assert_eq!(
            extract_handle("https://www.youtube.com/c/LegacyName").as_deref(),
            Some("@LegacyName")
        );
        assert_eq!(
            extract_handle("https://www.youtube.com/user/OldUser").as_deref(),
            Some("@OldUser")
        );
        assert_eq!(extract_handle("@"), None);
        assert_eq!(extract_handle("not a url or id"), None);
        assert_eq!(extract_handle("https://www.youtube.com/watch?v=abc"), None);
    }

    #[test]
    fn test_static_patterns_compile() {
        assert!(channel_id_re().is_match(ID));
        assert!(!canonical_link_re().is_match(""));
        assert!(!initial_data_re().is_match(""));
        assert!(json_key_res().iter().all(|re| !re.is_match("")));
    }

    #[test]
    fn test_handle_page_url_encodes_handle() {
        assert_eq!(
            handle_page_url("https://www.youtube.com", "@somehandle").unwrap().as_str(),
            "https://www.youtube.com/@somehandle?hl=en&gl=US"
        );
        assert_eq!(
            handle_page_url("http://127.0.0.1:8080/", "@we#ird?x").unwrap().as_str(),
            "http://127.0.0.1:8080/@we%23ird%3Fx?hl=en&gl=US"
        );
        assert!(handle_page_url("not a base", "@somehandle").is_none());
    }

    // --- Page scraping ---

    #[test]
    fn test_page_canonical_link_wins() {
        let html = format!(
            r#"<html><head><link rel="canonical" href="https://www.youtube.com/channel/{ID}"></head>
            <body>"externalId":"{OTHER_ID}"</body></html>"#
        );
        assert_eq!(extract_channel_id_from_page(&html), Some(ID.to_string()));
    }

    #[test]
    fn test_page_initial_data_external_id() {
        let html = format!(
            r#"<script>var ytInitialData = {{"metadata":{{"channelMetadataRenderer":{{"externalId":"{ID}"}}}}}};</script>
            <script>"channelId":"{OTHER_ID}"</script>"#
        );
        assert_eq!(extract_channel_id_from_page(&html), Some(ID.to_string()));
    }

    #[test]
    fn test_page_key_scan_order() {
        let html = format!(r#"{{"browseId":"{OTHER_ID}","channelId":"{ID}"}}"#);
        // channelId outranks browseId regardless of position
        assert_eq!(extract_channel_id_from_page(&html), Some(ID.to_string()));
    }

    #[test]
    fn test_page_without_id() {
        assert_eq!(extract_channel_id_from_page("<html>nothing here</html>"), None);
        assert_eq!(
            extract_channel_id_from_page(r#""channelId":"UCtooshort""#),
            None
        );
    }

    // --- Full resolution ---

    #[tokio::test]
    async fn test_resolve_channel_url_makes_no_requests() {
        let mock_server = MockServer::start().await;
        let r = resolver(&mock_server.uri());

        let url = format!("https://www.youtube.com/channel/{ID}");
        assert_eq!(r.resolve(&url).await, Some(ID.to_string()));
        assert_eq!(r.resolve(ID).await, Some(ID.to_string()));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_handle_scrapes_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@somehandle"))
            .and(query_param("hl", "en"))
            .and(header("cookie", "CONSENT=YES+1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><script>{{"externalId":"{OTHER_ID}"}}</script></html>"#
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let r = resolver(&mock_server.uri());
        assert_eq!(r.resolve("@somehandle").await, Some(OTHER_ID.to_string()));
    }

    #[tokio::test]
    async fn test_resolve_handle_with_fragment_character() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@we%23ird"))
            .and(query_param("hl", "en"))
            .and(query_param("gl", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><script>{{"externalId":"{ID}"}}</script></html>"#
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let r = resolver(&mock_server.uri());
        assert_eq!(r.resolve("@we#ird").await, Some(ID.to_string()));
    }

    #[tokio::test]
    async fn test_resolve_legacy_user_url_uses_handle_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@OldUser"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<link rel="canonical" href="https://www.youtube.com/channel/{ID}">"#
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let r = resolver(&mock_server.uri());
        assert_eq!(
            r.resolve("https://www.youtube.com/user/OldUser").await,
            Some(ID.to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_handle_fetch_failure_returns_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let r = resolver(&mock_server.uri());
        assert_eq!(r.resolve("@somehandle").await, None);
    }

    #[tokio::test]
    async fn test_resolve_handle_unreachable_returns_none() {
        // Nothing listens on port 9 (discard) on test machines
        let r = ChannelResolver::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Duration::from_secs(2),
        );
        assert_eq!(r.resolve("@somehandle").await, None);
    }

    #[tokio::test]
    async fn test_resolve_garbage_returns_none() {
        let mock_server = MockServer::start().await;
        let r = resolver(&mock_server.uri());
        assert_eq!(r.resolve("not a url or id").await, None);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}
