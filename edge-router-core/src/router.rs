//! The event loop: drives one [`Interface`] forever, racing its packet port against its own
//! timers and draining the deferred-delete lists once nothing in flight can still reference them.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_futures::select::Either;
use embassy_time::{Duration, Instant};

use edge_router_nal::{RawReceive, RawSend};

use crate::dhcp_client::Deadline;
use crate::dispatch::dispatch_frame;
use crate::forward;
use crate::interface::{now, Interface};
use crate::rules::{PROTO_TCP, PROTO_UDP};

const MTU: usize = 1500;

/// Upper bound on how long a tick is allowed to run without re-checking link idle/ARP-waiter
/// timeouts, since neither has a dedicated wakeup of its own to race against.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Drives `interface` forever: kicks off DHCP client acquisition if the domain has no address
/// yet, then loops receiving frames and dispatching them, re-checking every timer this crate
/// owns - DHCP client retry/renew/rebind/expire, DHCP server lease expiry, link idle dissolution
/// and ARP waiter expiry - on every tick.
pub async fn run_interface<P>(interface: Rc<RefCell<Interface<P>>>) -> !
where
    P: RawReceive + RawSend,
{
    let mut buf = alloc::vec![0u8; MTU];

    maybe_start_dhcp_client(&interface).await;

    loop {
        let tick = next_tick(&interface, now());

        let result = interface.borrow_mut().poll(&mut buf, tick).await;

        match result {
            Either::First(Ok((len, _src_mac))) => {
                let at = now();
                dispatch_frame(&interface, &mut buf[..len], at).await;
                sweep(&interface).await;
            }
            Either::First(Err(e)) => {
                log::warn!("router: receive failed: {e:?}");
            }
            Either::Second(()) => {
                let at = now();
                fire_timers(&interface, at).await;
                sweep(&interface).await;
            }
        }
    }
}

/// Starts the DHCP client FSM (broadcasting a DISCOVER from INIT) unless the interface's domain
/// already carries a statically configured address.
async fn maybe_start_dhcp_client<P>(interface: &Rc<RefCell<Interface<P>>>)
where
    P: RawReceive + RawSend,
{
    let has_config = interface.borrow().domain.borrow().ip_config().is_some();

    if has_config {
        return;
    }

    let mut send_buf = alloc::vec![0u8; 600];
    let action = interface.borrow_mut().dhcp_client.start(&mut send_buf, 0);

    forward::handle_dhcp_client_action(interface, action, now()).await;
}

/// How long the next `poll` should wait before this interface re-checks its own timers: the next
/// due DHCP client deadline, capped at [`SWEEP_INTERVAL`] so link idle/ARP timeouts are never
/// starved by a DHCP deadline far in the future.
fn next_tick<P>(interface: &Rc<RefCell<Interface<P>>>, now: Instant) -> Duration {
    let dhcp_deadline = interface.borrow().dhcp_deadline;

    let mut tick = SWEEP_INTERVAL;

    if let Some((_, at)) = dhcp_deadline {
        let remaining = if at > now { at - now } else { Duration::from_ticks(0) };
        tick = tick.min(remaining);
    }

    tick
}

async fn fire_timers<P>(interface: &Rc<RefCell<Interface<P>>>, now: Instant)
where
    P: RawReceive + RawSend,
{
    fire_dhcp_client_deadline(interface, now).await;
    expire_arp_waiters(interface, now);
    sweep_links(interface, now).await;

    let released = {
        let mut iface = interface.borrow_mut();
        iface.dhcp_leases.expire(now);
        iface.dhcp_leases.drain_released()
    };

    if !released.is_empty() {
        log::info!("router: {} dhcp lease(s) expired", released.len());
    }
}

/// Drains what this tick/frame made dissolvable: dissolved links are destroyed in the shared
/// arena, and released DHCP allocations are dropped from the tombstone list - nothing still in
/// flight references either once we reach here. A destroyed link's NAT port is returned to its
/// server-side domain's allocator so the 49152-65535 range doesn't monotonically exhaust.
async fn sweep<P>(interface: &Rc<RefCell<Interface<P>>>) {
    let (link_table, dissolved) = {
        let mut iface = interface.borrow_mut();
        let dissolved = iface.links.drain_dissolved();

        (iface.link_table.clone(), dissolved)
    };

    for id in dissolved {
        let removed = link_table.borrow_mut().destroy(id);

        if let Some(link) = removed {
            let port = link.server.id.dst.port();
            let remote_domain = link.server.interface.borrow().domain.clone();
            remote_domain.borrow_mut().release_nat_port(port);
        }
    }

    interface.borrow_mut().dhcp_leases.drain_released();
}

/// Fires the DHCP client's currently armed deadline, if due: a retry re-sends the outstanding
/// DISCOVER/REQUEST unless the retry budget is exhausted, in which case the FSM falls back to
/// INIT; renew/rebind/expire drive the corresponding FSM transition.
async fn fire_dhcp_client_deadline<P>(interface: &Rc<RefCell<Interface<P>>>, now: Instant)
where
    P: RawReceive + RawSend,
{
    let due = {
        let iface = interface.borrow();
        iface
            .dhcp_deadline
            .filter(|&(_, at)| now >= at)
            .map(|(deadline, _)| deadline)
    };

    let Some(deadline) = due else {
        return;
    };

    interface.borrow_mut().dhcp_deadline = None;

    let mut send_buf = alloc::vec![0u8; 600];

    let action = {
        let mut iface = interface.borrow_mut();

        match deadline {
            Deadline::Retry => {
                if iface.dhcp_client.note_retry_timeout() {
                    iface.dhcp_client.on_expire_or_retries_exhausted()
                } else {
                    iface.dhcp_client.retry(&mut send_buf, 0)
                }
            }
            Deadline::Renew => iface.dhcp_client.on_renew_timer(&mut send_buf, 0),
            Deadline::Rebind => iface.dhcp_client.on_rebind_timer(&mut send_buf, 0),
            Deadline::Expire => iface.dhcp_client.on_expire_or_retries_exhausted(),
        }
    };

    forward::handle_dhcp_client_action(interface, action, now).await;
}

/// Cancels and logs every ARP waiter older than this interface's `arp_timeout`: the postponed
/// packet is dropped, not retried.
fn expire_arp_waiters<P>(interface: &Rc<RefCell<Interface<P>>>, now: Instant) {
    let timeout = interface.borrow().config.arp_timeout;
    let expired = interface.borrow_mut().arp.expire_waiters(now, timeout);

    for waiter in &expired {
        log::warn!(
            "router: arp resolution for {} timed out, dropping postponed packet",
            waiter.target
        );
    }
}

/// Moves every closed or idle Link from active to dissolved on *both* interfaces it spans: a
/// Link's membership is split across the client and server `Interface`, and only this sweep -
/// not the per-interface `LinkLists::dissolve` it calls - knows both sides. A link that has just
/// entered `Closing` (one side FIN/RST, not both) has its idle timeout re-derived to
/// `tcp_closing_timeout` here, since `observe_tcp_flags` itself only has the flags, not the
/// interface config `idle_timeout_for` needs.
async fn sweep_links<P>(interface: &Rc<RefCell<Interface<P>>>, now: Instant)
where
    P: RawReceive + RawSend,
{
    let link_table = interface.borrow().link_table.clone();

    for proto in [PROTO_TCP, PROTO_UDP] {
        let ids: Vec<_> = interface.borrow().links.active_ids(proto).to_vec();

        for id in ids {
            let closing_side = {
                let table = link_table.borrow();
                table
                    .get(id)
                    .filter(|link| matches!(link.state, crate::link::LinkState::Closing))
                    .map(|link| link.client.interface.clone())
            };

            if let Some(client_iface) = closing_side {
                let closing_timeout = client_iface.borrow().idle_timeout_for(proto, true).await;

                if let Some(link) = link_table.borrow_mut().get_mut(id) {
                    link.set_idle_timeout(closing_timeout);
                }
            }

            let sides = {
                let table = link_table.borrow();
                table
                    .get(id)
                    .filter(|link| link.should_dissolve(now))
                    .map(|link| (link.client.interface.clone(), link.server.interface.clone()))
            };

            let Some((client_iface, server_iface)) = sides else {
                continue;
            };

            client_iface.borrow_mut().links.dissolve(proto, id);

            if !Rc::ptr_eq(&client_iface, &server_iface) {
                server_iface.borrow_mut().links.dissolve(proto, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::net::{Ipv4Addr, SocketAddrV4};

    use edge_router_wire::tcp::Flags;

    use crate::interface::InterfaceConfig;
    use crate::link::{Link, LinkSide, LinkTable, SideId};
    use crate::testutil::test_interface_sharing;

    fn side<P>(interface: Rc<RefCell<Interface<P>>>, port: u16, remote_port: u16) -> LinkSide<P> {
        LinkSide {
            interface,
            local_mac: [1; 6],
            remote_mac: [2; 6],
            id: SideId {
                proto: PROTO_TCP,
                src: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port),
                dst: SocketAddrV4::new(Ipv4Addr::new(93, 184, 216, 34), remote_port),
            },
        }
    }

    #[test]
    fn sweep_releases_the_nat_port_a_destroyed_link_held() {
        let link_table = Rc::new(RefCell::new(LinkTable::new()));
        let lan = test_interface_sharing(InterfaceConfig::default(), "lan", link_table.clone());
        let wan = test_interface_sharing(InterfaceConfig::default(), "wan", link_table.clone());

        let nat_port = wan.borrow().domain.borrow_mut().alloc_nat_port().unwrap();

        let client_side = side(lan.clone(), 1234, 80);
        let server_side = LinkSide {
            interface: wan.clone(),
            local_mac: [3; 6],
            remote_mac: [0; 6],
            id: SideId {
                proto: PROTO_TCP,
                src: SocketAddrV4::new(Ipv4Addr::new(93, 184, 216, 34), 80),
                dst: SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 1), nat_port),
            },
        };

        let link = Link::new(PROTO_TCP, client_side, server_side, Instant::from_secs(0), Duration::from_secs(300));
        let id = link_table.borrow_mut().insert(link);

        lan.borrow_mut().links.insert_active(PROTO_TCP, id);
        lan.borrow_mut().links.dissolve(PROTO_TCP, id);

        futures_lite::future::block_on(sweep(&lan));

        assert!(link_table.borrow().get(id).is_none(), "destroyed link is gone from the shared table");
        assert_eq!(
            wan.borrow_mut().domain.borrow_mut().alloc_nat_port(),
            Some(nat_port),
            "the port sweep released is available for re-allocation"
        );
    }

    #[test]
    fn sweep_links_re_derives_the_closing_timeout_so_a_half_closed_link_idles_out_sooner() {
        let link_table = Rc::new(RefCell::new(LinkTable::new()));
        let lan = test_interface_sharing(InterfaceConfig::default(), "lan", link_table.clone());
        let wan = test_interface_sharing(InterfaceConfig::default(), "wan", link_table.clone());

        let open_timeout = lan.borrow().config.tcp_open_timeout;
        let closing_timeout = lan.borrow().config.tcp_closing_timeout;
        assert!(closing_timeout < open_timeout, "fixture assumes closing is the shorter timeout");

        let mut link = Link::new(
            PROTO_TCP,
            side(lan.clone(), 1234, 80),
            side(wan.clone(), 49152, 80),
            Instant::from_secs(0),
            open_timeout,
        );
        link.observe_tcp_flags(Flags::FIN | Flags::ACK, true);
        assert_eq!(link.state, crate::link::LinkState::Closing);

        let id = link_table.borrow_mut().insert(link);
        lan.borrow_mut().links.insert_active(PROTO_TCP, id);
        wan.borrow_mut().links.insert_active(PROTO_TCP, id);

        let just_past_closing = Instant::from_secs(0) + closing_timeout + Duration::from_secs(1);
        let still_within_open = Instant::from_secs(0) + closing_timeout - Duration::from_secs(1);

        futures_lite::future::block_on(sweep_links(&lan, still_within_open));
        assert_eq!(
            lan.borrow().links.active_ids(PROTO_TCP),
            &[id],
            "not idle yet under the re-derived closing timeout"
        );

        futures_lite::future::block_on(sweep_links(&lan, just_past_closing));
        assert!(
            lan.borrow().links.active_ids(PROTO_TCP).is_empty(),
            "the closing timeout (not the longer open timeout it was created with) governs now"
        );
        assert_eq!(lan.borrow().links.dissolved_tcp_links, alloc::vec![id]);
    }
}
