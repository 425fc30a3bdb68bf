//! Reverse lookup of session client addresses.

use std::collections::HashMap;
use std::net::IpAddr;

pub const UNRESOLVED: &str = "unresolved";

pub trait HostResolver {
    /// Display name for `client`; never fails.
    fn resolve(&mut self, client: &str) -> String;
}

/// Strips the UNC prefix and IPv6 brackets from a session client name.
pub fn client_address(client: &str) -> &str {
    let trimmed = client.trim().trim_start_matches('\\');
    trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed)
}

/// Reverse DNS through the system resolver, cached per address.
#[derive(Debug, Default)]
pub struct DnsResolver {
    cache: HashMap<IpAddr, String>,
}

impl DnsResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostResolver for DnsResolver {
    fn resolve(&mut self, client: &str) -> String {
        let address = client_address(client);
        let Ok(ip) = address.parse::<IpAddr>() else {
            // Already a NetBIOS or DNS name.
            return address.to_string();
        };
        let ip = ip.to_canonical();
        self.cache
            .entry(ip)
            .or_insert_with(|| match dns_lookup::lookup_addr(&ip) {
                Ok(name) => {
                    tracing::debug!(%ip, %name, "reverse lookup succeeded");
                    name
                }
                Err(err) => {
                    tracing::debug!(%ip, error = %err, "reverse lookup failed");
                    UNRESOLVED.to_string()
                }
            })
            .clone()
    }
}

/// Table-driven resolver for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticResolver {
    names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            names: pairs
                .into_iter()
                .map(|(a, n)| (a.to_string(), n.to_string()))
                .collect(),
        }
    }
}

impl HostResolver for StaticResolver {
    fn resolve(&mut self, client: &str) -> String {
        let address = client_address(client);
        if address.parse::<IpAddr>().is_err() {
            return address.to_string();
        }
        self.names
            .get(address)
            .cloned()
            .unwrap_or_else(|| UNRESOLVED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{HostResolver, StaticResolver, UNRESOLVED, client_address};

    #[test]
    fn strips_unc_prefix_and_brackets() {
        assert_eq!(client_address("\\\\10.1.2.3"), "10.1.2.3");
        assert_eq!(client_address("\\\\[fe80::1]"), "fe80::1");
        assert_eq!(client_address("WS01"), "WS01");
    }

    #[test]
    fn names_pass_through_and_unknown_ips_are_flagged() {
        let mut r = StaticResolver::new([("10.0.0.5", "ws05.corp.example")]);
        assert_eq!(r.resolve("\\\\10.0.0.5"), "ws05.corp.example");
        assert_eq!(r.resolve("\\\\10.0.0.6"), UNRESOLVED);
        assert_eq!(r.resolve("\\\\WS01"), "WS01");
    }
}
