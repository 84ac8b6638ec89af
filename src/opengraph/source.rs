//! URL 소스 분류 및 플랫폼 식별자 추출
//!
//! 소스 타입은 URL 호스트만으로 결정되며 네트워크 요청 성공 여부와 무관합니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 링크 소스 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Webpage,
    Youtube,
    XPost,
    Linkedin,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Webpage => "webpage",
            SourceType::Youtube => "youtube",
            SourceType::XPost => "x_post",
            SourceType::Linkedin => "linkedin",
        }
    }

    /// 저장된 값 파싱 (알 수 없는 값은 webpage)
    pub fn parse(value: &str) -> Self {
        match value {
            "youtube" => SourceType::Youtube,
            "x_post" => SourceType::XPost,
            "linkedin" => SourceType::Linkedin,
            _ => SourceType::Webpage,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플랫폼 식별자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedData {
    Video { video_id: String },
    Post { tweet_id: String },
}

impl EmbedData {
    pub fn video_id(&self) -> Option<&str> {
        match self {
            EmbedData::Video { video_id } => Some(video_id),
            EmbedData::Post { .. } => None,
        }
    }

    pub fn tweet_id(&self) -> Option<&str> {
        match self {
            EmbedData::Post { tweet_id } => Some(tweet_id),
            EmbedData::Video { .. } => None,
        }
    }
}

// 순서대로 시도, 첫 매칭 사용
static YOUTUBE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"[?&]v=([a-zA-Z0-9_-]{11})",
        r"/embed/([a-zA-Z0-9_-]{11})",
        r"/shorts/([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static TWEET_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/status/(\d+)").ok());

/// 소문자 호스트 (`www.` 제거)
pub(crate) fn normalized_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// URL 호스트로 소스 타입 분류
pub fn detect_source_type(url: &str) -> SourceType {
    let Some(host) = normalized_host(url) else {
        return SourceType::Webpage;
    };

    match host.as_str() {
        "youtube.com" | "youtu.be" | "m.youtube.com" => SourceType::Youtube,
        "x.com" | "twitter.com" | "mobile.twitter.com" => SourceType::XPost,
        "linkedin.com" => SourceType::Linkedin,
        _ => SourceType::Webpage,
    }
}

/// 소스 타입별 식별자 추출
pub fn extract_embed_data(url: &str, source_type: SourceType) -> Option<EmbedData> {
    match source_type {
        SourceType::Youtube => YOUTUBE_ID_PATTERNS
            .iter()
            .find_map(|re| re.captures(url))
            .map(|caps| EmbedData::Video {
                video_id: caps[1].to_string(),
            }),
        SourceType::XPost => TWEET_ID_PATTERN
            .as_ref()?
            .captures(url)
            .map(|caps| EmbedData::Post {
                tweet_id: caps[1].to_string(),
            }),
        SourceType::Webpage | SourceType::Linkedin => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        assert_eq!(YOUTUBE_ID_PATTERNS.len(), 4);
        assert!(TWEET_ID_PATTERN.is_some());
    }

    #[test]
    fn test_detect_source_type() {
        assert_eq!(detect_source_type("https://youtu.be/dQw4w9WgXcQ"), SourceType::Youtube);
        assert_eq!(
            detect_source_type("https://WWW.YouTube.com/watch?v=dQw4w9WgXcQ"),
            SourceType::Youtube
        );
        assert_eq!(detect_source_type("https://m.youtube.com/watch"), SourceType::Youtube);
        assert_eq!(
            detect_source_type("https://twitter.com/rustlang/status/1"),
            SourceType::XPost
        );
        assert_eq!(detect_source_type("https://mobile.twitter.com/a"), SourceType::XPost);
        assert_eq!(
            detect_source_type("https://www.linkedin.com/in/jane-doe"),
            SourceType::Linkedin
        );
        assert_eq!(detect_source_type("https://blog.rust-lang.org"), SourceType::Webpage);
        assert_eq!(detect_source_type("not a url"), SourceType::Webpage);
        assert_eq!(detect_source_type("youtu.be/dQw4w9WgXcQ"), SourceType::Webpage);
    }

    #[test]
    fn test_extract_youtube_ids() {
        let cases = [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ];
        for url in cases {
            let data = extract_embed_data(url, detect_source_type(url));
            assert_eq!(
                data,
                Some(EmbedData::Video {
                    video_id: "dQw4w9WgXcQ".to_string()
                }),
                "{}",
                url
            );
        }

        assert_eq!(
            extract_embed_data("https://www.youtube.com/watch?v=short", SourceType::Youtube),
            None
        );
    }

    #[test]
    fn test_extract_tweet_id() {
        let url = "https://x.com/rustlang/status/1234567890";
        let data = extract_embed_data(url, detect_source_type(url)).unwrap();
        assert_eq!(data.tweet_id(), Some("1234567890"));
        assert_eq!(data.video_id(), None);
    }

    #[test]
    fn test_webpage_has_no_embed_data() {
        assert_eq!(
            extract_embed_data("https://example.com/status/123", SourceType::Webpage),
            None
        );
    }

    #[test]
    fn test_embed_data_json_shape() {
        let data = EmbedData::Video {
            video_id: "dQw4w9WgXcQ".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"video_id":"dQw4w9WgXcQ"}"#
        );
        let parsed: EmbedData = serde_json::from_str(r#"{"tweet_id":"42"}"#).unwrap();
        assert_eq!(parsed.tweet_id(), Some("42"));
        assert_eq!(serde_json::to_string(&SourceType::XPost).unwrap(), r#""x_post""#);
    }
}
