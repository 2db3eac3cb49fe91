use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxtRecord(pub Vec<(String, String)>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAnnouncement {
    /// e.g. "_shoot._tcp.local."
    pub service_type: String,
    /// e.g. "alice@desk"
    pub instance_name: String,
    /// e.g. "desk.local."
    pub host_name: String,
    pub ip_addr: String,
    pub port: u16,
    pub txt: Option<TxtRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub fullname: String,
    pub instance_name: String,
    pub service_type: String,
    pub host_name: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    pub txt: Vec<(String, String)>,
}

impl DiscoveredService {
    pub fn txt_value(&self, key: &str) -> Option<&str> {
        self.txt
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Dialable addresses, IPv4 first.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self
            .addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect();
        addrs.sort_by_key(|a| !a.is_ipv4());
        addrs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIp {
    pub name: String,
    pub ip: IpAddr,
    pub family: &'static str,  //ipv4 or ipv6
    pub is_loopback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txt_lookup_and_addr_order() {
        let svc = DiscoveredService {
            fullname: "a._shoot._tcp.local.".into(),
            instance_name: "a".into(),
            service_type: "_shoot._tcp.local.".into(),
            host_name: "a.local.".into(),
            port: 8090,
            addresses: vec!["fe80::1".parse().unwrap(), "192.168.1.2".parse().unwrap()],
            txt: vec![("mid".into(), "abcd".into())],
        };

        assert_eq!(svc.txt_value("mid"), Some("abcd"));
        assert_eq!(svc.txt_value("missing"), None);
        assert_eq!(svc.socket_addrs()[0], "192.168.1.2:8090".parse().unwrap());
    }
}
