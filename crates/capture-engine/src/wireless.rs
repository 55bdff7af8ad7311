//! Switching the device daemon to TCP/IP so it can be reached over Wi-Fi.

use std::net::Ipv4Addr;

use tabsnap_common::error::{TabsnapError, TabsnapResult};

use crate::channel::CommandChannel;

pub const IP_ROUTE_COMMAND: &str = "ip route";

/// Where the device can be reached once wireless debugging is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirelessEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl std::fmt::Display for WirelessEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// First IPv4 address that follows a `src` token in `ip route` output.
pub fn parse_source_address(route_output: &str) -> Option<Ipv4Addr> {
    let mut tokens = route_output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token != "src" {
            continue;
        }
        if let Some(ip) = tokens.next().and_then(|t| t.parse::<Ipv4Addr>().ok()) {
            return Some(ip);
        }
    }
    None
}

/// Find the device's Wi-Fi address and restart its daemon on `port`.
pub async fn enable_wireless(channel: &CommandChannel, port: u16) -> TabsnapResult<WirelessEndpoint> {
    let routes = channel.run_text(IP_ROUTE_COMMAND).await?;
    let ip = parse_source_address(&routes).ok_or_else(|| {
        TabsnapError::wireless("could not find IP address; is Wi-Fi connected on the device?")
    })?;
    tracing::info!(%ip, "Found device Wi-Fi address");

    let transport = channel.session().transport()?;
    if !transport.supports_network_listener() {
        return Err(TabsnapError::unsupported(format!(
            "{} cannot switch to a network listener",
            transport.name()
        )));
    }
    transport
        .set_network_listener(port)
        .await
        .map_err(|e| channel.observe(e))?;

    let endpoint = WirelessEndpoint { ip, port };
    tracing::info!(%endpoint, "Device listening for wireless connections");
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_wlan_source_address() {
        let output = "192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.42";
        assert_eq!(
            parse_source_address(output),
            Some(Ipv4Addr::new(192, 168, 1, 42))
        );
    }

    #[test]
    fn test_first_match_wins() {
        let output = "10.0.0.0/8 dev rmnet0 src 10.1.2.3\n\
                      192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.42\n";
        assert_eq!(parse_source_address(output), Some(Ipv4Addr::new(10, 1, 2, 3)));
    }

    #[test]
    fn test_skips_non_ipv4_source() {
        let output = "fe80::/64 dev wlan0 src fe80::1\n192.168.0.0/24 dev wlan0 src 192.168.0.7";
        assert_eq!(parse_source_address(output), Some(Ipv4Addr::new(192, 168, 0, 7)));
    }

    #[test]
    fn test_no_src_token() {
        assert_eq!(parse_source_address("default via 192.168.1.1 dev wlan0"), None);
        assert_eq!(parse_source_address(""), None);
        assert_eq!(parse_source_address("dev wlan0 src"), None);
    }
}
