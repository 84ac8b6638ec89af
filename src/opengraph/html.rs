//! HTML에서 Open Graph 태그 추출

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::source::SourceType;

static X_AUTHOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^/([^/]+)/status/\d+").ok());

static LINKEDIN_AUTHOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/in/([^/]+)").ok());

fn is_og_key(key: &str) -> bool {
    key.starts_with("og:") || key.starts_with("article:")
}

/// `og:*`, `article:*` 메타 태그 수집
///
/// `property` 속성을 우선 사용하고, 하나도 없을 때만 `name` 속성을 봅니다.
/// `og:title`/`og:description`이 없으면 `<title>`과 `meta[name=description]`으로 채웁니다.
pub fn parse_og_tags(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut tags = collect_meta(&document, "property");

    if tags.is_empty() {
        tags = collect_meta(&document, "name");
    }

    if !tags.contains_key("og:title") {
        if let Some(title) = first_text(&document, "title") {
            tags.insert("og:title".to_string(), title);
        }
    }

    if !tags.contains_key("og:description") {
        if let Some(description) = first_attr(&document, r#"meta[name="description"]"#, "content") {
            tags.insert("og:description".to_string(), description);
        }
    }

    tags
}

fn collect_meta(document: &Html, attribute: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let Ok(selector) = Selector::parse(&format!("meta[{}]", attribute)) else {
        return tags;
    };

    for element in document.select(&selector) {
        let key = element.value().attr(attribute).unwrap_or_default();
        let content = element.value().attr("content").unwrap_or_default();
        if is_og_key(key) && !content.is_empty() {
            tags.insert(key.to_string(), content.to_string());
        }
    }

    tags
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn first_attr(document: &Html, selector: &str, attribute: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let value = element.value().attr(attribute)?;
    (!value.is_empty()).then(|| value.to_string())
}

/// 작성자 추출
///
/// - x_post: URL 경로의 핸들 (`@handle`)
/// - linkedin: `/in/<slug>` 프로필 경로, 없으면 `article:author`
/// - 그 외: `article:author`
pub fn extract_author(url: &str, source_type: SourceType, tags: &BTreeMap<String, String>) -> Option<String> {
    let path = url::Url::parse(url).ok().map(|u| u.path().to_string());
    let from_tags = || tags.get("article:author").cloned();

    match source_type {
        SourceType::XPost => {
            let path = path?;
            let caps = X_AUTHOR.as_ref()?.captures(&path)?;
            Some(format!("@{}", &caps[1]))
        }
        SourceType::Linkedin => path
            .as_deref()
            .and_then(|p| LINKEDIN_AUTHOR.as_ref()?.captures(p))
            .map(|caps| caps[1].replace('-', " "))
            .or_else(from_tags),
        SourceType::Webpage | SourceType::Youtube => from_tags(),
    }
}
