//! The ARP engine: request/reply handling, the per-interface ARP cache, and waiters for in-flight
//! resolutions.

use core::net::Ipv4Addr;

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use edge_router_nal::MacAddr;
use edge_router_wire::arp::ArpPacket;

use crate::interface::Interface;

/// A postponed packet parked behind an unresolved next-hop IP.
///
/// `bytes` holds the already NAT-rewritten IPv4 packet (everything the forwarder produced past
/// the Ethernet header) - only the L2 rewrite is outstanding, since a Link is created and the
/// L3/L4 addresses are patched *before* the next-hop MAC is resolved. `egress` is the interface
/// `bytes` must eventually be sent out of, once `target`'s MAC is known.
///
/// `bytes` owns a private copy of the frame: the concrete `PacketPort` this crate is built
/// against (`edge-router-nal::RawReceive`) hands received data to the caller via copy into a
/// caller-owned buffer rather than a descriptor pool a waiter could just hold a handle into, so
/// there is no cheaper place to park it.
pub struct ArpWaiter<P> {
    pub target: Ipv4Addr,
    pub egress: Rc<RefCell<Interface<P>>>,
    pub bytes: Vec<u8>,
    pub created: embassy_time::Instant,
}

/// One ARP cache entry.
#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    ip: Ipv4Addr,
    mac: MacAddr,
}

/// An interface's ARP cache plus its outstanding waiters.
///
/// Request suppression: at most one broadcast ARP request is ever outstanding per target IP -
/// `resolve_or_wait` checks for an existing waiter before minting a new broadcast.
pub struct ArpCache<P> {
    entries: Vec<CacheEntry>,
    waiters: Vec<ArpWaiter<P>>,
}

impl<P> Default for ArpCache<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            waiters: Vec::new(),
        }
    }
}

/// What the caller asking to resolve a next-hop MAC should do next.
pub enum Resolution {
    /// The MAC is already cached.
    Known(MacAddr),
    /// No cache entry; a waiter was created (or an existing one reused) and `bytes` was parked
    /// in it. `should_broadcast` tells the caller whether this is the first waiter for `target`
    /// (broadcast a fresh ARP request) or a repeat (suppress).
    Postponed { should_broadcast: bool },
}

impl<P> ArpCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.iter().find(|e| e.ip == ip).map(|e| e.mac)
    }

    /// Records or refreshes a cache entry. Used both for solicited replies and for gratuitous
    /// ARP: either way the cache is simply kept current.
    fn update(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.ip == ip) {
            entry.mac = mac;
        } else {
            self.entries.push(CacheEntry { ip, mac });
        }
    }

    /// Looks up `target`'s MAC, or parks `bytes` behind a waiter bound to `egress` if unresolved.
    pub fn resolve_or_wait(
        &mut self,
        target: Ipv4Addr,
        egress: Rc<RefCell<Interface<P>>>,
        bytes: Vec<u8>,
        now: embassy_time::Instant,
    ) -> Resolution {
        if let Some(mac) = self.lookup(target) {
            return Resolution::Known(mac);
        }

        let should_broadcast = !self.waiters.iter().any(|w| w.target == target);

        self.waiters.push(ArpWaiter {
            target,
            egress,
            bytes,
            created: now,
        });

        Resolution::Postponed { should_broadcast }
    }

    /// Handles an inbound ARP reply: refreshes the cache and drains (and returns) every waiter
    /// parked on the reply's sender IP, for the caller to resume (rebuild the Ethernet header
    /// with the now-known MAC and send).
    pub fn on_reply(&mut self, packet: &ArpPacket) -> Vec<ArpWaiter<P>> {
        self.update(packet.spa, packet.sha);

        let target = packet.spa;
        let mut resumed = Vec::new();
        let mut remaining = Vec::new();

        for waiter in core::mem::take(&mut self.waiters) {
            if waiter.target == target {
                resumed.push(waiter);
            } else {
                remaining.push(waiter);
            }
        }

        self.waiters = remaining;

        resumed
    }

    /// Gratuitous ARP: any sender IP/MAC we observe, request or reply, is worth caching
    /// preemptively even if nothing is waiting on it.
    pub fn learn_sender(&mut self, packet: &ArpPacket) {
        self.update(packet.spa, packet.sha);
    }

    /// Cancels and returns every waiter older than `timeout`.
    pub fn expire_waiters(
        &mut self,
        now: embassy_time::Instant,
        timeout: embassy_time::Duration,
    ) -> Vec<ArpWaiter<P>> {
        let mut expired = Vec::new();
        let mut remaining = Vec::new();

        for waiter in core::mem::take(&mut self.waiters) {
            if now - waiter.created >= timeout {
                expired.push(waiter);
            } else {
                remaining.push(waiter);
            }
        }

        self.waiters = remaining;

        expired
    }

    /// Cancels every waiter unconditionally (interface teardown).
    pub fn cancel_all_waiters(&mut self) -> Vec<ArpWaiter<P>> {
        core::mem::take(&mut self.waiters)
    }
}
