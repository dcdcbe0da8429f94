//! The Interface and the packet I/O port contract it is driven through.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use rand_core::RngCore;

use edge_router_nal::{MacAddr, RawReceive, RawSend};

use crate::arp::ArpCache;
use crate::dhcp_client::{ClientFsm, Deadline};
use crate::dhcp_server::Leases;
use crate::domain::Domain;
use crate::link::{LinkLists, LinkTable};
use crate::rules::PROTO_TCP;

/// Static, rarely-changing identity of an interface: local MAC, router MAC, and its timers.
#[derive(Clone, Copy, Debug)]
pub struct InterfaceConfig {
    pub mac: MacAddr,
    pub router_mac: MacAddr,
    /// UDP idle timeout.
    pub udp_idle_timeout: Duration,
    /// TCP idle timeout while `OPEN`.
    pub tcp_open_timeout: Duration,
    /// TCP idle timeout once `CLOSING`.
    pub tcp_closing_timeout: Duration,
    /// ARP waiter timeout.
    pub arp_timeout: Duration,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            mac: [0; 6],
            router_mac: [0; 6],
            udp_idle_timeout: Duration::from_secs(30),
            tcp_open_timeout: Duration::from_secs(5 * 60),
            tcp_closing_timeout: Duration::from_secs(2 * 60),
            arp_timeout: Duration::from_secs(3),
        }
    }
}

/// One NIC-facing interface. Generic over the concrete `PacketPort` (`RawReceive + RawSend`) it
/// was constructed against - composition rather than inheritance: the port is supplied at
/// construction, not subclassed. The DHCP client FSM's RNG is boxed (`dyn RngCore`) rather than a
/// third type parameter: it is an implementation detail of transaction-id generation, not part of
/// this type's identity, and a generic parameter here would have to be threaded through `Domain`,
/// `Link` and every rule tree that stores an `Rc<RefCell<Interface<..>>>>`.
pub struct Interface<P> {
    pub config: InterfaceConfig,
    pub domain: Rc<RefCell<Domain<P>>>,
    pub link_table: Rc<RefCell<LinkTable<P>>>,
    pub links: LinkLists<P>,
    pub arp: ArpCache<P>,
    pub dhcp_client: ClientFsm<alloc::boxed::Box<dyn RngCore>>,
    pub dhcp_leases: Leases,
    /// The next due DHCP client timer (retry/renew/rebind/expire) and when it fires, set by the
    /// `Action::Send(_, deadline, duration)` handling. `None` until the client's `start()` has
    /// been driven once.
    pub dhcp_deadline: Option<(Deadline, Instant)>,
    port: P,
}

impl<P> Interface<P>
where
    P: RawReceive + RawSend,
{
    pub fn new(
        config: InterfaceConfig,
        domain: Rc<RefCell<Domain<P>>>,
        link_table: Rc<RefCell<LinkTable<P>>>,
        port: P,
        rng: alloc::boxed::Box<dyn RngCore>,
    ) -> Self {
        let mac = config.mac;

        Self {
            config,
            domain,
            link_table,
            links: LinkLists::new(),
            arp: ArpCache::new(),
            dhcp_client: ClientFsm::new(rng, mac),
            dhcp_leases: Leases::new(),
            dhcp_deadline: None,
            port,
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.config.mac
    }

    pub fn router_mac(&self) -> MacAddr {
        self.config.router_mac
    }

    /// Emits one frame, allocating nothing beyond the caller-provided `buf`: `writer` fills `buf`
    /// and returns the length actually written.
    pub async fn send<F>(&mut self, dst: MacAddr, buf: &mut [u8], writer: F) -> Result<(), P::Error>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let len = writer(buf);

        self.port.send(dst, &buf[..len]).await
    }

    /// The idle timeout that applies to a link of `proto`, differentiated by TCP open/closing
    /// state.
    pub async fn idle_timeout_for(&self, proto: crate::rules::Proto, closing: bool) -> Duration {
        if proto == PROTO_TCP {
            if closing {
                self.config.tcp_closing_timeout
            } else {
                self.config.tcp_open_timeout
            }
        } else {
            self.config.udp_idle_timeout
        }
    }

    /// Interface teardown: dissolve every link this interface originated, release every DHCP
    /// allocation, revoke every ARP waiter.
    pub fn teardown(&mut self) {
        self.links.dissolve_all();

        let macs: Vec<_> = self
            .dhcp_leases
            .iter_macs()
            .collect();

        for mac in macs {
            self.dhcp_leases.release(&mac);
        }

        self.arp.cancel_all_waiters();
    }

    /// Races the next inbound frame against `tick`. Returns `Either::First` with the receive
    /// result when a frame arrived, `Either::Second(())` when `tick` elapsed first - the caller
    /// re-checks its own deadlines (renew/rebind/lease-expiry/link-idle/ARP-timeout) either way,
    /// since a frame arriving doesn't mean those deadlines moved.
    pub async fn poll(&mut self, buf: &mut [u8], tick: Duration) -> Either<Result<(usize, MacAddr), P::Error>, ()> {
        select(self.port.receive(buf), Timer::after(tick)).await
    }

    #[cfg(test)]
    pub(crate) fn port(&self) -> &P {
        &self.port
    }
}

pub fn now() -> Instant {
    Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::rules::PROTO_UDP;
    use crate::testutil::test_interface;

    #[test]
    fn idle_timeout_differentiates_tcp_open_closing_and_udp() {
        let iface = test_interface(InterfaceConfig::default(), "lan");
        let iface = iface.borrow();

        assert_eq!(
            futures_lite::future::block_on(iface.idle_timeout_for(PROTO_TCP, false)),
            iface.config.tcp_open_timeout
        );
        assert_eq!(
            futures_lite::future::block_on(iface.idle_timeout_for(PROTO_TCP, true)),
            iface.config.tcp_closing_timeout
        );
        assert_eq!(
            futures_lite::future::block_on(iface.idle_timeout_for(PROTO_UDP, false)),
            iface.config.udp_idle_timeout
        );
    }

    #[test]
    fn teardown_dissolves_links_releases_leases_and_cancels_arp_waiters() {
        let iface = test_interface(InterfaceConfig::default(), "lan");

        {
            let mut iface = iface.borrow_mut();

            let link_id = iface.link_table.clone().borrow_mut().insert(crate::link::Link::new(
                PROTO_TCP,
                crate::link::LinkSide {
                    interface: test_interface(InterfaceConfig::default(), "lan"),
                    local_mac: [1; 6],
                    remote_mac: [2; 6],
                    id: crate::link::SideId {
                        proto: PROTO_TCP,
                        src: core::net::SocketAddrV4::new(core::net::Ipv4Addr::new(10, 0, 0, 1), 1234),
                        dst: core::net::SocketAddrV4::new(core::net::Ipv4Addr::new(93, 184, 216, 34), 80),
                    },
                },
                crate::link::LinkSide {
                    interface: test_interface(InterfaceConfig::default(), "wan"),
                    local_mac: [3; 6],
                    remote_mac: [4; 6],
                    id: crate::link::SideId {
                        proto: PROTO_TCP,
                        src: core::net::SocketAddrV4::new(core::net::Ipv4Addr::new(203, 0, 113, 1), 49152),
                        dst: core::net::SocketAddrV4::new(core::net::Ipv4Addr::new(93, 184, 216, 34), 80),
                    },
                },
                Instant::from_secs(0),
                Duration::from_secs(300),
            ));
            iface.links.insert_active(PROTO_TCP, link_id);

            iface.dhcp_leases.release(&[9; 6]); // no-op, exercises the empty path harmlessly

            iface
                .arp
                .resolve_or_wait(
                    core::net::Ipv4Addr::new(10, 0, 0, 254),
                    test_interface(InterfaceConfig::default(), "lan"),
                    alloc::vec![0u8],
                    Instant::from_secs(0),
                );
        }

        iface.borrow_mut().teardown();

        let iface = iface.borrow();
        assert!(iface.links.active_ids(PROTO_TCP).is_empty());
        assert_eq!(iface.links.dissolved_tcp_links.len(), 1);
        assert!(iface.arp.cancel_all_waiters().is_empty());
    }
}
