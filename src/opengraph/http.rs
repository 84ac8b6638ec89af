//! HTTP 클라이언트 추상화
//!
//! 메타데이터 수집기는 `HttpClient` 트레이트에만 의존합니다.
//! 운영 환경은 reqwest 기반 `ReqwestClient`를 사용합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::guard::{is_public_ip, literal_ip};

/// GET 요청
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// 응답 (상태 코드 + 본문)
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// ============================================================================
// reqwest
// ============================================================================

/// reqwest 기반 클라이언트
///
/// 리다이렉트는 `max_redirects`회까지 따라가며, http(s)가 아니거나
/// 비공인 IP 리터럴로 향하는 리다이렉트는 중단합니다.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(max_redirects: usize) -> Result<Self> {
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                return attempt.error("too many redirects");
            }

            let target = attempt.url();
            if !matches!(target.scheme(), "http" | "https") {
                tracing::warn!(
                    target: "portfolio_retrieval::ssrf",
                    "Blocked redirect to {}: scheme not allowed",
                    target
                );
                return attempt.stop();
            }

            if let Some(ip) = literal_ip(target) {
                if !is_public_ip(ip) {
                    tracing::warn!(
                        target: "portfolio_retrieval::ssrf",
                        "Blocked redirect to {}: non-public address",
                        target
                    );
                    return attempt.stop();
                }
            }

            attempt.follow()
        });

        let client = reqwest::Client::builder()
            .redirect(policy)
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.context("HTTP 요청 실패")?;
        let status = response.status().as_u16();
        let body = response.text().await.context("응답 본문 읽기 실패")?;

        Ok(HttpResponse { status, body })
    }
}
