//! Rule trees and the NAT port allocator.
//!
//! These are small `Vec`-backed scans rather than a real trie: the data sets involved (a handful
//! of forwarding/NAT rules per domain) don't warrant one, and a linear scan keeps the lookup
//! trivially correct to review.

use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::domain::Domain;

/// `proto` values as carried by the IPv4 header (`Ipv4PacketHeader::p`).
pub type Proto = u8;

pub const PROTO_TCP: Proto = edge_router_wire::tcp::TcpPacketHeader::PROTO;
pub const PROTO_UDP: Proto = edge_router_wire::udp::UdpPacketHeader::PROTO;

/// Longest-prefix route from a destination subnet to a remote domain (glossary "IP rule").
pub struct IpRule<P> {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
    pub domain: Rc<RefCell<Domain<P>>>,
}

impl<P> IpRule<P> {
    fn matches(&self, addr: Ipv4Addr) -> bool {
        if self.prefix_len == 0 {
            return true;
        }

        let mask = u32::MAX.checked_shl(32 - self.prefix_len as u32).unwrap_or(0);

        u32::from(addr) & mask == u32::from(self.network) & mask
    }
}

#[derive(Default)]
pub struct IpRuleTree<P>(Vec<IpRule<P>>);

impl<P> IpRuleTree<P> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, rule: IpRule<P>) {
        self.0.push(rule);
    }

    /// Longest-prefix match: the rule with the most specific (highest `prefix_len`) matching
    /// network wins, ties broken by insertion order.
    pub fn longest_prefix_match(&self, addr: Ipv4Addr) -> Option<Rc<RefCell<Domain<P>>>> {
        self.0
            .iter()
            .filter(|rule| rule.matches(addr))
            .max_by_key(|rule| rule.prefix_len)
            .map(|rule| rule.domain.clone())
    }
}

/// Maps a destination port on this domain to a specific remote host+port (glossary "Forward
/// rule" - port forwarding).
pub struct ForwardRule<P> {
    pub port: u16,
    pub remote_domain: Rc<RefCell<Domain<P>>>,
    pub remote: SocketAddrV4,
}

#[derive(Default)]
pub struct ForwardRuleTree<P>(Vec<ForwardRule<P>>);

impl<P> ForwardRuleTree<P> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, rule: ForwardRule<P>) {
        self.0.push(rule);
    }

    pub fn find(&self, port: u16) -> Option<(Rc<RefCell<Domain<P>>>, SocketAddrV4)> {
        self.0
            .iter()
            .find(|rule| rule.port == port)
            .map(|rule| (rule.remote_domain.clone(), rule.remote))
    }
}

/// Maps a destination port to a remote domain without pinning a specific host (glossary
/// "Transport rule" - protocol-level forward, the destination address is left unchanged).
pub struct TransportRule<P> {
    pub port: u16,
    pub remote_domain: Rc<RefCell<Domain<P>>>,
}

#[derive(Default)]
pub struct TransportRuleTree<P>(Vec<TransportRule<P>>);

impl<P> TransportRuleTree<P> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, rule: TransportRule<P>) {
        self.0.push(rule);
    }

    pub fn find(&self, port: u16) -> Option<Rc<RefCell<Domain<P>>>> {
        self.0
            .iter()
            .find(|rule| rule.port == port)
            .map(|rule| rule.remote_domain.clone())
    }
}

/// Allocates ephemeral source ports for NAT-rewritten outbound flows. Released ports are recycled
/// before extending the high-water mark.
pub struct PortAllocator {
    low: u16,
    high: u16,
    next: u16,
    released: Vec<u16>,
}

impl PortAllocator {
    /// IANA ephemeral range: the first allocated port for a fresh allocator is 49152.
    pub const DEFAULT_LOW: u16 = 49152;
    pub const DEFAULT_HIGH: u16 = 65535;

    pub fn new(low: u16, high: u16) -> Self {
        Self {
            low,
            high,
            next: low,
            released: Vec::new(),
        }
    }

    pub fn alloc(&mut self) -> Option<u16> {
        if let Some(port) = self.released.pop() {
            return Some(port);
        }

        if self.next > self.high {
            return None;
        }

        let port = self.next;
        self.next = self.next.checked_add(1)?;

        Some(port)
    }

    pub fn release(&mut self, port: u16) {
        if port >= self.low && port <= self.high {
            self.released.push(port);
        }
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOW, Self::DEFAULT_HIGH)
    }
}
