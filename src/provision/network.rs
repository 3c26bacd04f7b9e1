//! Static ingress/egress permission sets.
//!
//! Supplied by the networking collaborator as configuration; the core only
//! evaluates them, it never mutates them.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Transport protocol a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    All,
}

/// One permission: protocol, inclusive port range, source/destination CIDRs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default)]
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub cidrs: Vec<IpNet>,
}

impl PermissionRule {
    pub fn allows(&self, protocol: Protocol, addr: IpAddr, port: u16) -> bool {
        let protocol_ok = self.protocol == Protocol::All || self.protocol == protocol;
        protocol_ok
            && (self.from_port..=self.to_port).contains(&port)
            && self.cidrs.iter().any(|net| net.contains(&addr))
    }
}

/// Ingress and egress permission sets for one attachment point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkPolicy {
    pub ingress: Vec<PermissionRule>,
    pub egress: Vec<PermissionRule>,
}

impl NetworkPolicy {
    /// An empty ingress set denies everything.
    pub fn allows_ingress(&self, protocol: Protocol, source: IpAddr, port: u16) -> bool {
        self.ingress.iter().any(|r| r.allows(protocol, source, port))
    }

    pub fn allows_egress(&self, protocol: Protocol, destination: IpAddr, port: u16) -> bool {
        self.egress.iter().any(|r| r.allows(protocol, destination, port))
    }

    /// Allow TCP from anywhere on `port`, egress unrestricted.
    pub fn open_tcp(port: u16) -> Self {
        let anywhere: Vec<IpNet> = vec![
            "0.0.0.0/0".parse().expect("literal CIDR"),
            "::/0".parse().expect("literal CIDR"),
        ];
        Self {
            ingress: vec![PermissionRule {
                protocol: Protocol::Tcp,
                from_port: port,
                to_port: port,
                cidrs: anywhere.clone(),
            }],
            egress: vec![PermissionRule {
                protocol: Protocol::All,
                from_port: 0,
                to_port: u16::MAX,
                cidrs: anywhere,
            }],
        }
    }
}
