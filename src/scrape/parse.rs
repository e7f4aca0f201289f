use crate::runtime::config::ScrapeConfig;
use crate::scrape::outcome::Classification;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const NOT_FOUND_PHRASE: &str = "not found";

/// Classification of one profile response plus whatever metadata the
/// envelope carried.
#[derive(Debug, Clone)]
pub struct ProfileStatus {
    pub classification: Classification,
    /// Set for [`Classification::Error`] when the upstream message matched
    /// the configured transient phrase.
    pub transient_error: bool,
    pub message: String,
    pub profile_pic_url: Option<String>,
}

impl ProfileStatus {
    fn bare(classification: Classification) -> Self {
        Self {
            classification,
            transient_error: false,
            message: String::new(),
            profile_pic_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

/// One story entry extracted from the upstream's story-list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub story_id: String,
    pub media_url: String,
    pub media_type: MediaType,
}

/// Interprets raw upstream bodies. Parsing is a collaborator concern; the
/// orchestration core only ever sees the closed [`Classification`] enum.
pub trait ResponseParser: Send + Sync {
    fn classify_profile(&self, body: &str) -> ProfileStatus;
    fn parse_stories(&self, body: &str) -> Vec<Story>;
}

/// Default parser for the upstream's JSON envelope:
/// `{"status": ..., "msg": ..., "source": ..., "html": ...}`.
///
/// The blocked/unavailable trigger phrases are configuration, not constants;
/// the upstream reports both conditions as free-text `msg` strings.
pub struct UpstreamParser {
    blocked_phrase: String,
    unavailable_phrase: String,
}

impl UpstreamParser {
    pub fn new(blocked_phrase: impl Into<String>, unavailable_phrase: impl Into<String>) -> Self {
        Self {
            blocked_phrase: blocked_phrase.into().to_lowercase(),
            unavailable_phrase: unavailable_phrase.into().to_lowercase(),
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self::new(config.blocked_phrase(), config.unavailable_phrase())
    }
}

impl ResponseParser for UpstreamParser {
    fn classify_profile(&self, body: &str) -> ProfileStatus {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return ProfileStatus {
                message: "invalid json response".into(),
                ..ProfileStatus::bare(Classification::Error)
            };
        };
        let Some(envelope) = value.as_object() else {
            return ProfileStatus {
                message: "unexpected response shape".into(),
                ..ProfileStatus::bare(Classification::Unknown)
            };
        };

        if envelope.get("status").and_then(Value::as_str) == Some("error") {
            let message = envelope
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let lowered = message.to_lowercase();

            if lowered.contains(&self.blocked_phrase) {
                return ProfileStatus {
                    message,
                    ..ProfileStatus::bare(Classification::Blocked)
                };
            }
            if lowered.contains(NOT_FOUND_PHRASE) {
                return ProfileStatus {
                    message,
                    ..ProfileStatus::bare(Classification::NotFound)
                };
            }
            let transient_error = lowered.contains(&self.unavailable_phrase);
            return ProfileStatus {
                transient_error,
                message,
                ..ProfileStatus::bare(Classification::Error)
            };
        }

        if envelope.get("source").and_then(Value::as_str) == Some("AccountPrivate") {
            return ProfileStatus::bare(Classification::Private);
        }

        let html = envelope.get("html").and_then(Value::as_str).unwrap_or("");
        ProfileStatus {
            profile_pic_url: extract_profile_pic(html),
            ..ProfileStatus::bare(Classification::Public)
        }
    }

    fn parse_stories(&self, body: &str) -> Vec<Story> {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Vec::new();
        };
        if value.get("status").and_then(Value::as_str) != Some("ok") {
            return Vec::new();
        }
        let html = value.get("html").and_then(Value::as_str).unwrap_or("");

        media_regex()
            .captures_iter(html)
            .filter_map(|captures| {
                let tag = captures.get(1)?.as_str();
                let media_url = captures.get(2)?.as_str();
                // Everything served by the upstream goes through media.php;
                // anything else is page chrome.
                if !media_url.contains("media.php") {
                    return None;
                }
                let media_type = if tag.eq_ignore_ascii_case("source") {
                    MediaType::Video
                } else {
                    MediaType::Image
                };
                Some(Story {
                    story_id: extract_story_id(media_url),
                    media_url: media_url.to_string(),
                    media_type,
                })
            })
            .collect()
    }
}

fn media_regex() -> &'static Regex {
    static MEDIA_RE: OnceLock<Regex> = OnceLock::new();
    MEDIA_RE.get_or_init(|| {
        Regex::new(r#"(?i)<(img|source)[^>]+src="([^"]+)""#).expect("media regex is valid")
    })
}

fn extract_profile_pic(html: &str) -> Option<String> {
    static IMG_RE: OnceLock<Regex> = OnceLock::new();
    let regex = IMG_RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src="([^"]+)""#).expect("img regex is valid")
    });
    regex
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Derives a stable story id: the trailing digits of the `name` query
/// parameter when present, otherwise a hash of the whole URL.
fn extract_story_id(media_url: &str) -> String {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static DIGITS_RE: OnceLock<Regex> = OnceLock::new();

    let name_re = NAME_RE
        .get_or_init(|| Regex::new(r"[?&]name=([^&#]+)").expect("name regex is valid"));
    let digits_re =
        DIGITS_RE.get_or_init(|| Regex::new(r"_(\d+)$").expect("digits regex is valid"));

    if let Some(name) = name_re
        .captures(media_url)
        .and_then(|captures| captures.get(1))
    {
        if let Some(digits) = digits_re
            .captures(name.as_str())
            .and_then(|captures| captures.get(1))
        {
            return digits.as_str().to_string();
        }
    }

    let mut hasher = DefaultHasher::new();
    media_url.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> UpstreamParser {
        UpstreamParser::new("temporarily blocked", "temporarily unavailable")
    }

    #[test]
    fn classifies_blocked_from_configured_phrase() {
        let status = parser().classify_profile(
            r#"{"status":"error","msg":"You are Temporarily Blocked, try again later"}"#,
        );
        assert_eq!(status.classification, Classification::Blocked);
    }

    #[test]
    fn classifies_not_found() {
        let status =
            parser().classify_profile(r#"{"status":"error","msg":"profile not found"}"#);
        assert_eq!(status.classification, Classification::NotFound);
    }

    #[test]
    fn classifies_transient_and_permanent_errors() {
        let transient = parser()
            .classify_profile(r#"{"status":"error","msg":"service temporarily unavailable"}"#);
        assert_eq!(transient.classification, Classification::Error);
        assert!(transient.transient_error);

        let permanent =
            parser().classify_profile(r#"{"status":"error","msg":"account is banned"}"#);
        assert_eq!(permanent.classification, Classification::Error);
        assert!(!permanent.transient_error);
        assert_eq!(permanent.message, "account is banned");
    }

    #[test]
    fn classifies_private_accounts() {
        let status = parser().classify_profile(r#"{"source":"AccountPrivate"}"#);
        assert_eq!(status.classification, Classification::Private);
    }

    #[test]
    fn classifies_public_and_extracts_profile_pic() {
        let status = parser().classify_profile(
            r#"{"status":"ok","html":"<div><img src=\"https://cdn.example/pic.jpg\"></div>"}"#,
        );
        assert_eq!(status.classification, Classification::Public);
        assert_eq!(
            status.profile_pic_url.as_deref(),
            Some("https://cdn.example/pic.jpg")
        );
    }

    #[test]
    fn invalid_json_is_a_permanent_error() {
        let status = parser().classify_profile("<html>not json</html>");
        assert_eq!(status.classification, Classification::Error);
        assert!(!status.transient_error);
        assert_eq!(status.message, "invalid json response");
    }

    #[test]
    fn non_object_json_is_unknown() {
        let status = parser().classify_profile("[1,2,3]");
        assert_eq!(status.classification, Classification::Unknown);
    }

    #[test]
    fn parses_stories_and_filters_non_media_urls() {
        let body = serde_json::json!({
            "status": "ok",
            "html": "<div class=\"col-md-4\">\
                     <img src=\"https://host/media.php?name=story.com_Instagram_user_123456\">\
                     </div>\
                     <img src=\"https://host/logo.png\">\
                     <video><source src=\"https://host/media.php?media=abc\"></video>"
        })
        .to_string();

        let stories = parser().parse_stories(&body);
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].story_id, "123456");
        assert_eq!(stories[0].media_type, MediaType::Image);
        assert_eq!(stories[1].media_type, MediaType::Video);
        assert_eq!(stories[1].story_id.len(), 16, "fallback id is a hash");
    }

    #[test]
    fn no_stories_when_status_is_not_ok() {
        let stories = parser().parse_stories(r#"{"status":"error","msg":"no stories"}"#);
        assert!(stories.is_empty());
    }

    #[test]
    fn fallback_story_id_is_stable() {
        let url = "https://host/media.php?media=abc";
        assert_eq!(extract_story_id(url), extract_story_id(url));
    }
}
