//! Protocol identifiers understood by the engine.

use std::fmt;
use std::str::FromStr;

/// Inbound/outbound protocol tag.
///
/// The four credential-bearing protocols get typed settings builders in
/// `synth::credentials`; everything else is passed through as stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    DokodemoDoor,
    Socks,
    Http,
    Freedom,
    Blackhole,
    /// Any tag this crate has no builder for.
    Other(String),
}

impl Protocol {
    /// Wire name as written into the engine document.
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::DokodemoDoor => "dokodemo-door",
            Protocol::Socks => "socks",
            Protocol::Http => "http",
            Protocol::Freedom => "freedom",
            Protocol::Blackhole => "blackhole",
            Protocol::Other(name) => name,
        }
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "vmess" => Protocol::Vmess,
            "vless" => Protocol::Vless,
            "trojan" => Protocol::Trojan,
            "shadowsocks" => Protocol::Shadowsocks,
            "dokodemo-door" => Protocol::DokodemoDoor,
            "socks" => Protocol::Socks,
            "http" => Protocol::Http,
            "freedom" => Protocol::Freedom,
            "blackhole" => Protocol::Blackhole,
            _ => Protocol::Other(s.to_string()),
        })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
