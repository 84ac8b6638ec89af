//! SSRF 방어 - 요청 전 URL 안전성 검사
//!
//! 스킴은 http/https만 허용하고, 호스트가 해석되는 모든 IP가 공인 주소여야 합니다.
//! 거부 사유는 `portfolio_retrieval::ssrf` 타겟으로 기록됩니다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Result;
use async_trait::async_trait;
use url::{Host, Url};

/// DNS 리졸버 (A/AAAA 레코드 모두 반환)
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>>;
}

/// 운영체제 리졸버
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// 요청해도 안전한 URL인지 검사
///
/// IP 리터럴 호스트는 DNS 조회 없이 직접 검사합니다.
pub async fn is_safe_url(url: &str, resolver: &dyn DnsResolver) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(target: "portfolio_retrieval::ssrf", "Rejected unparseable URL {}: {}", url, e);
            return false;
        }
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        tracing::warn!(
            target: "portfolio_retrieval::ssrf",
            "Rejected {}: scheme '{}' not allowed",
            url,
            parsed.scheme()
        );
        return false;
    }

    let port = parsed.port_or_known_default().unwrap_or(80);

    let ips = match parsed.host() {
        Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(Host::Domain(domain)) => match resolver.resolve(domain, port).await {
            Ok(ips) => ips,
            Err(e) => {
                tracing::warn!(
                    target: "portfolio_retrieval::ssrf",
                    "Rejected {}: DNS resolution failed for {}: {}",
                    url,
                    domain,
                    e
                );
                return false;
            }
        },
        None => {
            tracing::warn!(target: "portfolio_retrieval::ssrf", "Rejected {}: no host", url);
            return false;
        }
    };

    if ips.is_empty() {
        tracing::warn!(
            target: "portfolio_retrieval::ssrf",
            "Rejected {}: DNS resolution returned no records",
            url
        );
        return false;
    }

    if let Some(ip) = ips.iter().find(|ip| !is_public_ip(**ip)) {
        tracing::warn!(
            target: "portfolio_retrieval::ssrf",
            "Rejected {}: resolves to non-public address {}",
            url,
            ip
        );
        return false;
    }

    true
}

/// URL 호스트가 IP 리터럴이면 반환
pub(crate) fn literal_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

/// 공인 IP 여부 (사설, 루프백, 링크 로컬, 예약 대역 제외)
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => is_public_ipv6(v6),
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();

    let reserved = ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.is_multicast()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64) // 100.64.0.0/10 (CGNAT)
        || (a == 192 && b == 0 && c == 0) // 192.0.0.0/24
        || (a == 198 && (b == 18 || b == 19)) // 198.18.0.0/15
        || a >= 240; // 240.0.0.0/4

    !reserved
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = embedded_ipv4(ip) {
        return is_public_ipv4(v4);
    }

    let segments = ip.segments();

    let reserved = ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (segments[0] & 0xfe00) == 0xfc00 // fc00::/7 (ULA)
        || (segments[0] & 0xffc0) == 0xfe80 // fe80::/10
        || (segments[0] & 0xffc0) == 0xfec0 // fec0::/10 (site-local)
        || (segments[0] == 0x2001 && segments[1] < 0x0200) // 2001::/23 (Teredo, IETF)
        || (segments[0] == 0x2001 && segments[1] == 0x0db8) // 2001:db8::/32
        || (segments[0] == 0x0100 && segments[1..4] == [0, 0, 0]); // 100::/64 (discard)

    !reserved
}

/// IPv4 주소를 담는 IPv6 대역이면 그 IPv4 주소
///
/// `::ffff:0:0/96`, `::/96`, `64:ff9b::/96` (NAT64), `2002::/16` (6to4)
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }

    let s = ip.segments();
    let low = Ipv4Addr::new((s[6] >> 8) as u8, s[6] as u8, (s[7] >> 8) as u8, s[7] as u8);

    match s {
        // ::와 ::1은 IPv6 자체 규칙으로 판단
        [0, 0, 0, 0, 0, 0, 0, 0 | 1] => None,
        [0, 0, 0, 0, 0, 0, _, _] => Some(low),
        [0x0064, 0xff9b, 0, 0, 0, 0, _, _] => Some(low),
        [0x2002, hi, lo, ..] => Some(Ipv4Addr::new(
            (hi >> 8) as u8,
            hi as u8,
            (lo >> 8) as u8,
            lo as u8,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeResolver {
        records: HashMap<String, Vec<IpAddr>>,
        calls: AtomicUsize,
    }

    impl FakeResolver {
        fn new(records: &[(&str, &[&str])]) -> Self {
            Self {
                records: records
                    .iter()
                    .map(|(host, ips)| {
                        (
                            host.to_string(),
                            ips.iter().map(|ip| ip.parse().unwrap()).collect(),
                        )
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DnsResolver for FakeResolver {
        async fn resolve(&self, host: &str, _port: u16) -> Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.records.get(host) {
                Some(ips) => Ok(ips.clone()),
                None => anyhow::bail!("NXDOMAIN"),
            }
        }
    }

    #[test]
    fn test_public_and_private_ipv4() {
        let public = ["93.184.216.34", "8.8.8.8", "1.1.1.1"];
        let blocked = [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "192.0.2.1",
            "198.18.0.1",
            "224.0.0.1",
            "255.255.255.255",
        ];
        for ip in public {
            assert!(is_public_ip(ip.parse().unwrap()), "{}", ip);
        }
        for ip in blocked {
            assert!(!is_public_ip(ip.parse().unwrap()), "{}", ip);
        }
    }

    #[test]
    fn test_public_and_private_ipv6() {
        let public = [
            "2606:4700:4700::1111",
            "::ffff:8.8.8.8",
            "64:ff9b::808:808",
            "2002:808:808::1",
            "2001:4860:4860::8888",
        ];
        let blocked = [
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
            "fec0::1",
            "ff02::1",
            "2001:db8::1",
            "2001::1",
            "2001:0:4136:e378::1",
            "100::1",
            "::ffff:127.0.0.1",
            "::127.0.0.1",
            "::10.0.0.1",
            "64:ff9b::a9fe:a9fe",
            "64:ff9b::7f00:1",
            "2002:7f00:1::1",
            "2002:a00:1::1",
            "2002:c0a8:101::1",
        ];
        for ip in public {
            assert!(is_public_ip(ip.parse().unwrap()), "{}", ip);
        }
        for ip in blocked {
            assert!(!is_public_ip(ip.parse().unwrap()), "{}", ip);
        }
    }

    #[tokio::test]
    async fn test_ip_literal_checked_without_dns() {
        let resolver = FakeResolver::new(&[]);
        assert!(!is_safe_url("http://127.0.0.1/secret", &resolver).await);
        assert!(!is_safe_url("http://[::1]:8080/", &resolver).await);
        assert!(is_safe_url("http://93.184.216.34/", &resolver).await);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_scheme_and_missing_host() {
        let resolver = FakeResolver::new(&[("example.com", &["93.184.216.34"])]);
        assert!(!is_safe_url("ftp://example.com/file", &resolver).await);
        assert!(!is_safe_url("file:///etc/passwd", &resolver).await);
        assert!(!is_safe_url("not a url", &resolver).await);
    }

    #[tokio::test]
    async fn test_every_resolved_ip_must_be_public() {
        let resolver = FakeResolver::new(&[
            ("example.com", &["93.184.216.34"]),
            ("rebind.test", &["93.184.216.34", "10.0.0.5"]),
            ("empty.test", &[]),
        ]);
        assert!(is_safe_url("https://example.com/post", &resolver).await);
        assert!(!is_safe_url("https://rebind.test/", &resolver).await);
        assert!(!is_safe_url("https://empty.test/", &resolver).await);
        assert!(!is_safe_url("https://unknown.test/", &resolver).await);
    }
}
