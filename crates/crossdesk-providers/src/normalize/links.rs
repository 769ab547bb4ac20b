//! Meeting links found in free text.
//!
//! Used when an event carries no structured conference data but its
//! location or description contains a join URL.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static URL_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).ok());

/// Outlook SafeLinks carry the real URL, percent-encoded, in `url=`.
static SAFELINK_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"https?://[^/]*safelinks\.protection\.outlook\.com/?\?[^?]*url=([^&]+)").ok()
});

static CONFERENCE_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(([^/]*\.)?zoom\.us/|([^/]*\.)?zoomgov\.com/|meet\.google\.com/|teams\.(microsoft\.com|live\.com)/|meet\.jit\.si/|([^/]*\.)?webex\.com/)",
    )
    .ok()
});

fn unwrap_safelink(url: &str) -> String {
    SAFELINK_REGEX
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .and_then(|encoded| urlencoding::decode(encoded.as_str()).ok())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|| url.to_string())
}

fn is_conference_url(url: &str) -> bool {
    CONFERENCE_REGEX
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

/// Returns the first video-conference URL across `texts`, in order.
pub fn find_meeting_link<'a>(texts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let url_regex = URL_REGEX.as_ref()?;
    texts
        .into_iter()
        .flat_map(|text| url_regex.find_iter(text))
        .map(|m| unwrap_safelink(m.as_str().trim_end_matches(['.', ',', ';'])))
        .filter(|url| Url::parse(url).is_ok())
        .find(|url| is_conference_url(url))
}
