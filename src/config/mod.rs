//! 설정 모듈 - 환경변수 기반 런타임 설정
//!
//! 모든 값은 환경변수에서 읽습니다. 잘못된 숫자 값은 기본값으로 대체하지 않고
//! 시작 시점에 에러로 처리합니다.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// 기본 임베딩 차원
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// 메타데이터 요청 기본 타임아웃 (초)
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// 메타데이터 요청 기본 리다이렉트 허용 횟수
pub const DEFAULT_FETCH_MAX_REDIRECTS: usize = 3;

/// 쿼리 임베딩 캐시 기본 유지 시간 (초)
pub const DEFAULT_QUERY_CACHE_SECS: u64 = 300;

// ============================================================================
// Settings
// ============================================================================

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리 (SQLite DB 위치)
    pub data_dir: PathBuf,
    /// 임베딩 API 키 (없으면 벡터 검색/임베딩 생성 비활성화)
    pub embedding_api_key: Option<String>,
    /// 임베딩 차원 (768, 1536, 3072)
    pub embedding_dimensions: usize,
    /// YouTube Data API 키
    pub youtube_api_key: Option<String>,
    /// 메타데이터 요청 타임아웃
    pub fetch_timeout: Duration,
    /// 메타데이터 요청 리다이렉트 허용 횟수
    pub fetch_max_redirects: usize,
    /// 쿼리 임베딩 캐시 유지 시간 (0이면 캐시 안 함)
    pub query_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_api_key: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            youtube_api_key: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            fetch_max_redirects: DEFAULT_FETCH_MAX_REDIRECTS,
            query_cache_ttl: Duration::from_secs(DEFAULT_QUERY_CACHE_SECS),
        }
    }
}

impl Settings {
    /// 프로세스 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 로드 (테스트에서 환경변수 대신 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("PORTFOLIO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        // 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY
        let embedding_api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_AI_API_KEY"));

        let embedding_dimensions = match get("EMBEDDING_DIMENSIONS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("EMBEDDING_DIMENSIONS is not a number: {}", raw))?,
            None => DEFAULT_EMBEDDING_DIMENSIONS,
        };

        let fetch_timeout_secs = parse_u64(&get, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;
        let fetch_max_redirects = parse_u64(
            &get,
            "FETCH_MAX_REDIRECTS",
            DEFAULT_FETCH_MAX_REDIRECTS as u64,
        )? as usize;
        let cache_secs = parse_u64(&get, "QUERY_EMBEDDING_CACHE_SECS", DEFAULT_QUERY_CACHE_SECS)?;

        Ok(Self {
            data_dir,
            embedding_api_key,
            embedding_dimensions,
            youtube_api_key: get("YOUTUBE_API_KEY"),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            fetch_max_redirects,
            query_cache_ttl: Duration::from_secs(cache_secs),
        })
    }

    /// SQLite DB 파일 경로
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("portfolio.db")
    }
}

/// 기본 데이터 디렉토리 (~/.portfolio-retrieval/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".portfolio-retrieval")
}

fn parse_u64<G>(get: &G, key: &str, default: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} is not a non-negative integer: {}", key, raw)),
        None => Ok(default),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert!(settings.embedding_api_key.is_none());
        assert!(settings.youtube_api_key.is_none());
        assert_eq!(settings.embedding_dimensions, 1536);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(10));
        assert_eq!(settings.fetch_max_redirects, 3);
    }

    #[test]
    fn test_gemini_key_takes_priority() {
        let settings = Settings::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "primary"),
            ("GOOGLE_AI_API_KEY", "secondary"),
        ]))
        .unwrap();
        assert_eq!(settings.embedding_api_key.as_deref(), Some("primary"));

        let settings =
            Settings::from_lookup(lookup(&[("GEMINI_API_KEY", " "), ("GOOGLE_AI_API_KEY", "secondary")]))
                .unwrap();
        assert_eq!(settings.embedding_api_key.as_deref(), Some("secondary"));
    }

    #[test]
    fn test_invalid_number_is_error() {
        let result = Settings::from_lookup(lookup(&[("FETCH_TIMEOUT_SECS", "soon")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_database_path_under_data_dir() {
        let settings =
            Settings::from_lookup(lookup(&[("PORTFOLIO_DATA_DIR", "/tmp/portfolio")])).unwrap();
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/portfolio/portfolio.db"));
    }
}
