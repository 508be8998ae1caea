use anyhow::{Context, Result};
use ipnet::IpNet;
use std::net::IpAddr;

use crate::settings::BasicAuthConfig;

/// A single entry in the IP allow-list: either an exact address or a CIDR range.
///
/// The upstream source accepts either shape in the same config field; modeled
/// here as a tagged sum rather than open-ended dynamic typing.
#[derive(Debug, Clone, PartialEq)]
pub enum AllowEntry {
    Exact(IpAddr),
    Range(IpNet),
}

impl AllowEntry {
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(AllowEntry::Range(net));
        }
        let ip: IpAddr = s
            .parse()
            .with_context(|| format!("'{s}' is neither an IP address nor a CIDR range"))?;
        Ok(AllowEntry::Exact(ip))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            AllowEntry::Exact(a) => *a == ip,
            AllowEntry::Range(net) => net.contains(&ip),
        }
    }
}

/// Parsed IP allow-list. An empty list allows every address.
#[derive(Debug, Clone, Default)]
pub struct AllowList(Vec<AllowEntry>);

impl AllowList {
    pub fn parse(entries: &[String]) -> Result<Self> {
        let parsed = entries
            .iter()
            .map(|e| AllowEntry::parse(e))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(parsed))
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.0.is_empty() || self.0.iter().any(|e| e.contains(ip))
    }
}

/// HTTP Basic auth predicate. Holds the configured credentials, if any.
#[derive(Debug, Clone, Default)]
pub struct BasicAuth(Option<BasicAuthConfig>);

impl BasicAuth {
    pub fn new(cfg: Option<BasicAuthConfig>) -> Self {
        Self(cfg)
    }

    /// `header` is the raw value of the `Authorization` request header, if present.
    pub fn check(&self, header: Option<&str>) -> bool {
        let Some(cfg) = &self.0 else {
            return true;
        };
        let Some(header) = header else {
            return false;
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return false;
        };
        user == cfg.user && pass == cfg.pass
    }

    pub fn required(&self) -> bool {
        self.0.is_some()
    }
}

pub const REALM: &str = "rtsp-simple-server";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_ip_matches_only_itself() {
        let e = AllowEntry::parse("192.168.1.5").unwrap();
        assert!(e.contains("192.168.1.5".parse().unwrap()));
        assert!(!e.contains("192.168.1.6".parse().unwrap()));
    }

    #[test]
    fn cidr_range_matches_members() {
        let e = AllowEntry::parse("10.0.0.0/24").unwrap();
        assert!(e.contains("10.0.0.42".parse().unwrap()));
        assert!(!e.contains("10.0.1.1".parse().unwrap()));
    }

    #[test]
    fn empty_allow_list_allows_everyone() {
        let list = AllowList::parse(&[]).unwrap();
        assert!(list.allows("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn allow_list_denies_unlisted() {
        let list = AllowList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        assert!(!list.allows("8.8.8.8".parse().unwrap()));
        assert!(list.allows("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn basic_auth_without_config_always_passes() {
        let auth = BasicAuth::new(None);
        assert!(auth.check(None));
    }

    #[test]
    fn basic_auth_rejects_missing_header() {
        let cfg = BasicAuthConfig {
            user: "u".into(),
            pass: "p".into(),
        };
        let auth = BasicAuth::new(Some(cfg));
        assert!(!auth.check(None));
    }

    #[test]
    fn basic_auth_accepts_correct_credentials() {
        let cfg = BasicAuthConfig {
            user: "u".into(),
            pass: "p".into(),
        };
        let auth = BasicAuth::new(Some(cfg));
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"u:p");
        let header = format!("Basic {encoded}");
        assert!(auth.check(Some(&header)));
    }

    #[test]
    fn basic_auth_rejects_wrong_credentials() {
        let cfg = BasicAuthConfig {
            user: "u".into(),
            pass: "p".into(),
        };
        let auth = BasicAuth::new(Some(cfg));
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"u:wrong");
        let header = format!("Basic {encoded}");
        assert!(!auth.check(Some(&header)));
    }
}
