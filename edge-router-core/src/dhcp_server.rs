//! The DHCP server engine: IP allocation, offer/ack, release, expiry.
//!
//! The lease table (`dhcp_allocations`) is carried on the owning `Interface`, not the `Domain`,
//! even though the pool bounds and lease length are domain-scoped configuration - the interface
//! the request physically arrived on is the one that answers it.

use core::net::Ipv4Addr;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};

use edge_router_dhcp::server::{Action, ServerOptions};
use edge_router_dhcp::{DhcpOption, Packet};

/// Static per-domain DHCP server configuration.
#[derive(Clone)]
pub struct DhcpServerConfig {
    pub server_ip: Ipv4Addr,
    pub pool_low: Ipv4Addr,
    pub pool_high: Ipv4Addr,
    pub lease: Duration,
    pub offer_timeout: Duration,
    pub gateways: Vec<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeaseState {
    Offered,
    Bound,
}

#[derive(Clone, Debug)]
pub struct Allocation {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub state: LeaseState,
    pub expiry: Instant,
    pub xid: u32,
}

/// The MAC-keyed lease table plus the tombstone list of recently-released allocations - the same
/// deferred-destroy discipline that governs the link table also governs DHCP allocations.
#[derive(Default)]
pub struct Leases {
    allocations: BTreeMap<[u8; 6], Allocation>,
    released: Vec<Allocation>,
}

impl Leases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mac: &[u8; 6]) -> Option<&Allocation> {
        self.allocations.get(mac)
    }

    /// Every MAC with a live (`OFFERED` or `BOUND`) allocation - used by interface teardown to
    /// release them all without borrowing `self` across the loop.
    pub fn iter_macs(&self) -> impl Iterator<Item = [u8; 6]> + '_ {
        self.allocations.keys().copied()
    }

    /// First IP in `[low..high]` not already allocated, scanning in order.
    fn first_free(&self, low: Ipv4Addr, high: Ipv4Addr) -> Option<Ipv4Addr> {
        let low = u32::from(low);
        let high = u32::from(high);

        (low..=high).map(Ipv4Addr::from).find(|candidate| {
            !self.allocations.values().any(|a| a.ip == *candidate)
        })
    }

    pub fn release(&mut self, mac: &[u8; 6]) {
        if let Some(allocation) = self.allocations.remove(mac) {
            self.released.push(allocation);
        }
    }

    /// Drains expired allocations into the tombstone list (called on a periodic/lease timer).
    pub fn expire(&mut self, now: Instant) {
        let expired: Vec<_> = self
            .allocations
            .iter()
            .filter(|(_, a)| a.expiry <= now)
            .map(|(mac, _)| *mac)
            .collect();

        for mac in expired {
            self.release(&mac);
        }
    }

    /// Drains the tombstone list - call at the deferred-destroy point once nothing in flight can
    /// still reference these allocations (mirrors the link table's drain of dissolved links).
    pub fn drain_released(&mut self) -> Vec<Allocation> {
        core::mem::take(&mut self.released)
    }
}

/// The result of processing one incoming DHCP request against the pool/lease algorithm.
pub enum Reply<'o> {
    None,
    /// Nothing to send, but the reason is worth a warn-level log at the caller (currently: the
    /// address pool is exhausted and the request can't be offered anything).
    DropWarn(&'static str),
    Offer(Packet<'o>),
    Ack(Packet<'o>),
    Nak(Packet<'o>),
}

/// Runs the lease-allocation algorithm for one incoming request. `opt_buf` backs the reply's
/// encoded options.
pub fn process<'o>(
    config: &DhcpServerConfig,
    leases: &mut Leases,
    request: &'o Packet<'o>,
    now: Instant,
    opt_buf: &'o mut [DhcpOption<'o>],
) -> Reply<'o> {
    let options = ServerOptions {
        ip: config.server_ip,
        gateways: &config.gateways,
        subnet: config.subnet,
        dns: &config.dns,
        lease_duration_secs: config.lease.as_secs() as u32,
    };

    let Some(action) = options.process(request) else {
        return Reply::None;
    };

    match action {
        Action::Discover(requested_ip, chaddr) => {
            let mac = mac_of(chaddr);

            let ip = if let Some(existing) = leases.get(&mac) {
                existing.ip
            } else if let Some(free) = requested_ip
                .filter(|ip| !leases.allocations.values().any(|a| a.ip == *ip))
                .or_else(|| leases.first_free(config.pool_low, config.pool_high))
            {
                free
            } else {
                return Reply::DropWarn("dhcp pool full");
            };

            leases.allocations.insert(
                mac,
                Allocation {
                    mac,
                    ip,
                    state: LeaseState::Offered,
                    expiry: now + config.offer_timeout,
                    xid: request.xid,
                },
            );

            Reply::Offer(options.offer(request, ip, opt_buf))
        }
        Action::Request(requested_ip, chaddr) => {
            let mac = mac_of(chaddr);

            let matches_existing = leases
                .get(&mac)
                .is_some_and(|a| a.ip == requested_ip);

            if matches_existing {
                leases.allocations.insert(
                    mac,
                    Allocation {
                        mac,
                        ip: requested_ip,
                        state: LeaseState::Bound,
                        expiry: now + config.lease,
                        xid: request.xid,
                    },
                );

                Reply::Ack(options.ack_nak(request, Some(requested_ip), opt_buf))
            } else {
                leases.release(&mac);

                Reply::Nak(options.ack_nak(request, None, opt_buf))
            }
        }
        Action::Release(_, chaddr) | Action::Decline(_, chaddr) => {
            // DHCPDECLINE is handled identically to DHCPRELEASE - both tombstone the allocation
            // so the IP cannot be reassigned to a different MAC before the deferred destroy
            // discipline runs.
            leases.release(&mac_of(chaddr));

            Reply::None
        }
    }
}

fn mac_of(chaddr: &[u8; 16]) -> [u8; 6] {
    let mut mac = [0; 6];
    mac.copy_from_slice(&chaddr[..6]);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DhcpServerConfig {
        DhcpServerConfig {
            server_ip: Ipv4Addr::new(10, 0, 0, 1),
            pool_low: Ipv4Addr::new(10, 0, 0, 100),
            pool_high: Ipv4Addr::new(10, 0, 0, 101),
            lease: Duration::from_secs(3600),
            offer_timeout: Duration::from_secs(30),
            gateways: alloc::vec![Ipv4Addr::new(10, 0, 0, 1)],
            subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns: Vec::new(),
        }
    }

    fn discover(mac: [u8; 6], xid: u32, buf: &mut [u8]) -> &[u8] {
        let chaddr = {
            let mut c = [0; 16];
            c[..6].copy_from_slice(&mac);
            c
        };

        let mut opt_buf = edge_router_dhcp::Options::buf();
        let packet = Packet {
            reply: false,
            hops: 0,
            xid,
            secs: 0,
            broadcast: true,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: edge_router_dhcp::Options::discover(None, &mut opt_buf),
        };

        packet.encode(buf).unwrap()
    }

    #[test]
    fn pool_exhaustion_drops_the_third_discover() {
        let config = config();
        let mut leases = Leases::new();
        let now = Instant::from_secs(0);

        for (i, mac) in [[1u8; 6], [2u8; 6]].into_iter().enumerate() {
            let mut buf = [0u8; 512];
            let data = discover(mac, i as u32, &mut buf).to_vec();
            let packet = Packet::decode(&data).unwrap();

            let mut opt_buf = edge_router_dhcp::Options::buf();
            let reply = process(&config, &mut leases, &packet, now, &mut opt_buf);

            assert!(matches!(reply, Reply::Offer(_)));
        }

        let mut buf = [0u8; 512];
        let data = discover([3u8; 6], 2, &mut buf).to_vec();
        let packet = Packet::decode(&data).unwrap();

        let mut opt_buf = edge_router_dhcp::Options::buf();
        let reply = process(&config, &mut leases, &packet, now, &mut opt_buf);

        assert!(matches!(reply, Reply::DropWarn("dhcp pool full")));
    }

    #[test]
    fn released_allocation_can_be_reassigned() {
        let config = config();
        let mut leases = Leases::new();
        let now = Instant::from_secs(0);

        leases.allocations.insert(
            [1; 6],
            Allocation {
                mac: [1; 6],
                ip: Ipv4Addr::new(10, 0, 0, 100),
                state: LeaseState::Bound,
                expiry: now + Duration::from_secs(3600),
                xid: 0,
            },
        );

        leases.release(&[1; 6]);
        assert_eq!(leases.drain_released().len(), 1);

        assert_eq!(
            leases.first_free(config.pool_low, config.pool_high),
            Some(Ipv4Addr::new(10, 0, 0, 100))
        );
    }
}
