//! The IPv4 forwarder and NAT core: DHCP bypass, rule-tree routing, Link creation and reuse,
//! L3/L4 rewriting, and the L2 adaptation step with ARP-driven postponement.

use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::rc::Rc;
use core::cell::RefCell;

use embassy_time::Instant;

use edge_router_dhcp::Packet as DhcpPacket;
use edge_router_nal::{MacAddr, RawReceive, RawSend};
use edge_router_wire::arp::ArpPacket;
use edge_router_wire::eth::{self, EthPacketHeader, ETH_TYPE_ARP, ETH_TYPE_IPV4};
use edge_router_wire::ip::Ipv4PacketHeader;
use edge_router_wire::tcp::{Flags, TcpPacketHeader};
use edge_router_wire::udp::UdpPacketHeader;

use crate::arp::{ArpWaiter, Resolution};
use crate::dhcp_client;
use crate::dhcp_server;
use crate::domain::Domain;
use crate::error::Outcome;
use crate::interface::Interface;
use crate::link::{Link, LinkSide, SideId};
use crate::rules::{Proto, PROTO_TCP, PROTO_UDP};

const MTU: usize = 1500;

/// The eventual destination a routed packet is bound for: every branch that finds a match hands
/// back a remote domain plus the address to deliver to on that domain's side - unchanged for
/// transport/IP rules, remapped for a forward (port-forwarding) rule.
enum Route<P> {
    Forward {
        remote_domain: Rc<RefCell<Domain<P>>>,
        remote: SocketAddrV4,
    },
    Broadcast,
    Drop,
}

fn route_packet<P>(domain: &Rc<RefCell<Domain<P>>>, proto: Proto, dst: SocketAddrV4) -> Route<P> {
    let mut d = domain.borrow_mut();

    if let Some((remote_domain, remote)) = d.forward_rules(proto).find(dst.port()) {
        return Route::Forward { remote_domain, remote };
    }

    if let Some(remote_domain) = d.transport_rules(proto).find(dst.port()) {
        return Route::Forward { remote_domain, remote: dst };
    }

    if let Some(remote_domain) = d.ip_rules().longest_prefix_match(*dst.ip()) {
        return Route::Forward { remote_domain, remote: dst };
    }

    let is_broadcast = d.ip_config().is_some_and(|c| c.broadcast() == *dst.ip());

    if is_broadcast {
        Route::Broadcast
    } else {
        Route::Drop
    }
}

/// Entry point for one inbound IPv4 frame. `frame` starts at the Ethernet header; `src_mac` is
/// the frame's observed source MAC, already extracted by the caller before this function starts
/// rewriting the same buffer.
pub async fn handle_ipv4<P>(
    interface: &Rc<RefCell<Interface<P>>>,
    frame: &mut [u8],
    src_mac: MacAddr,
    now: Instant,
) -> Outcome
where
    P: RawReceive + RawSend,
{
    const ETH_SIZE: usize = EthPacketHeader::SIZE;

    if frame.len() < ETH_SIZE + Ipv4PacketHeader::MIN_SIZE {
        return Outcome::DropWarn("frame too short for an ip header").log("forward");
    }

    let hdr = match Ipv4PacketHeader::decode_with_payload(
        &frame[ETH_SIZE..],
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        None,
    ) {
        Ok(Some((hdr, _))) => hdr,
        Ok(None) => unreachable!("an unfiltered decode never returns None"),
        Err(edge_router_wire::Error::InvalidChecksum) => {
            return Outcome::DropWarn("invalid ip checksum").log("forward")
        }
        Err(_) => return Outcome::DropWarn("malformed ip header").log("forward"),
    };

    // Anti-spoof: a source that is broadcast or unspecified can never be a genuine flow endpoint.
    if hdr.src.is_broadcast() || hdr.src.is_unspecified() {
        return Outcome::DropWarn("anti-spoof: invalid source address").log("forward");
    }

    let total_len = ETH_SIZE + hdr.len as usize;
    let proto = hdr.p;
    let l4_offset = ETH_SIZE + hdr.hlen as usize;

    let (src_port, dst_port, tcp_flags) = match proto {
        PROTO_TCP => match TcpPacketHeader::decode_with_payload(&frame[l4_offset..total_len], hdr.src, hdr.dst, None, None) {
            Ok(Some((tcp_hdr, _))) => (tcp_hdr.src, tcp_hdr.dst, Some(tcp_hdr.flags)),
            Ok(None) => unreachable!("an unfiltered decode never returns None"),
            Err(_) => return Outcome::DropWarn("malformed tcp segment").log("forward"),
        },
        PROTO_UDP => match UdpPacketHeader::decode_with_payload(&frame[l4_offset..total_len], hdr.src, hdr.dst, None, None) {
            Ok(Some((udp_hdr, _))) => (udp_hdr.src, udp_hdr.dst, None),
            Ok(None) => unreachable!("an unfiltered decode never returns None"),
            Err(_) => return Outcome::DropWarn("malformed udp datagram").log("forward"),
        },
        _ => return Outcome::DropWarn("unsupported transport protocol for nat").log("forward"),
    };

    // DHCP delegation: a 67<->68 UDP port pair is unambiguous regardless of which address it was
    // addressed to, so it bypasses rule lookup and NAT entirely.
    if proto == PROTO_UDP && src_port == 67 && dst_port == 68 {
        return dhcp_client_reply(interface, &frame[ETH_SIZE..total_len], now).await;
    }

    if proto == PROTO_UDP && src_port == 68 && dst_port == 67 {
        let udp_payload_offset = l4_offset + UdpPacketHeader::SIZE;
        return dhcp_server_request(interface, &frame[udp_payload_offset..total_len], now).await;
    }

    let side = SideId {
        proto,
        src: SocketAddrV4::new(hdr.src, src_port),
        dst: SocketAddrV4::new(hdr.dst, dst_port),
    };

    let link_table = interface.borrow().link_table.clone();
    let active_ids = interface.borrow().links.active_ids(proto).to_vec();
    let existing = link_table.borrow().find(&active_ids, &side);

    let (link_id, from_client, egress, new_src, new_dst) = if let Some(link_id) = existing {
        let (from_client, egress, new_src, new_dst) = {
            let table = link_table.borrow();
            let link = table.get(link_id).expect("an id returned by find() must resolve");
            let from_client = link.client.id == side;
            let (_matched, opp) = link.side_for(&side).expect("find() guarantees a match");

            (from_client, opp.interface.clone(), opp.id.dst, opp.id.src)
        };

        (link_id, from_client, egress, new_src, new_dst)
    } else {
        let domain = interface.borrow().domain.clone();

        match route_packet(&domain, proto, side.dst) {
            Route::Broadcast => {
                domain
                    .borrow()
                    .broadcast(Some(interface), &frame[..total_len])
                    .await;

                return Outcome::Accept;
            }
            Route::Drop => return Outcome::DropInform("no matching rule").log("forward"),
            Route::Forward { remote_domain, remote } => {
                match create_link(interface, &side, src_mac, proto, now, remote_domain, remote).await {
                    Ok((link_id, egress, new_src, new_dst)) => (link_id, true, egress, new_src, new_dst),
                    Err(outcome) => return outcome,
                }
            }
        }
    };

    {
        let mut table = link_table.borrow_mut();
        if let Some(link) = table.get_mut(link_id) {
            if let Some(flags) = tcp_flags {
                link.observe_tcp_flags(flags, from_client);
            }
            link.touch(now);
        }
    }

    let ip_slice = &mut frame[ETH_SIZE..total_len];

    if Ipv4PacketHeader::patch_src(ip_slice, *new_src.ip()).is_err()
        || Ipv4PacketHeader::patch_dst(ip_slice, *new_dst.ip()).is_err()
    {
        return Outcome::DropWarn("failed to rewrite ip addresses").log("forward");
    }

    if Ipv4PacketHeader::decrement_ttl(ip_slice).is_err() {
        return Outcome::DropWarn("ttl expired").log("forward");
    }

    let l4_slice = &mut frame[l4_offset..total_len];

    let patched = if proto == PROTO_TCP {
        TcpPacketHeader::patch_src_port(l4_slice, new_src.port(), *new_src.ip(), *new_dst.ip())
            .and_then(|_| TcpPacketHeader::patch_dst_port(l4_slice, new_dst.port(), *new_src.ip(), *new_dst.ip()))
    } else {
        UdpPacketHeader::patch_src_port(l4_slice, new_src.port(), *new_src.ip(), *new_dst.ip())
            .and_then(|_| UdpPacketHeader::patch_dst_port(l4_slice, new_dst.port(), *new_src.ip(), *new_dst.ip()))
    };

    if patched.is_err() {
        return Outcome::DropWarn("failed to rewrite transport ports").log("forward");
    }

    let next_hop = next_hop_ip(&egress, *new_dst.ip());

    adapt_eth_and_send(egress, &mut frame[..total_len], total_len, next_hop, now).await
}

/// Creates a new Link for a packet that matched no existing one, once the caller has already
/// routed it to `remote_domain`/`remote`: allocates a NAT port on the egress domain and inserts
/// both sides. The server side's `remote_mac` starts as `[0; 6]` - it is never trusted for
/// forwarding (L2 addressing is always resolved fresh via the ARP cache in
/// `adapt_eth_and_send`), it exists only to satisfy `LinkSide`'s data model.
async fn create_link<P>(
    ingress: &Rc<RefCell<Interface<P>>>,
    side: &SideId,
    src_mac: MacAddr,
    proto: Proto,
    now: Instant,
    remote_domain: Rc<RefCell<Domain<P>>>,
    remote: SocketAddrV4,
) -> Result<(crate::link::LinkId<P>, Rc<RefCell<Interface<P>>>, SocketAddrV4, SocketAddrV4), Outcome>
where
    P: RawReceive + RawSend,
{
    let Some(egress) = remote_domain.borrow().egress_interface(None) else {
        return Err(Outcome::DropWarn("remote domain has no bound interface").log("forward"));
    };

    let egress_ip = egress.borrow().domain.borrow().ip_config().map(|c| c.address);
    let Some(egress_ip) = egress_ip else {
        return Err(Outcome::DropWarn("egress interface's domain has no ip configured").log("forward"));
    };

    let Some(allocated_port) = remote_domain.borrow_mut().alloc_nat_port() else {
        return Err(Outcome::DropWarn("nat port pool exhausted").log("forward"));
    };

    let client_local_mac = ingress.borrow().mac();
    let egress_local_mac = egress.borrow().router_mac();

    let client_side = LinkSide {
        interface: ingress.clone(),
        local_mac: client_local_mac,
        remote_mac: src_mac,
        id: *side,
    };

    let new_src = SocketAddrV4::new(egress_ip, allocated_port);

    let server_side = LinkSide {
        interface: egress.clone(),
        local_mac: egress_local_mac,
        remote_mac: [0; 6],
        id: SideId { proto, src: remote, dst: new_src },
    };

    let idle_timeout = ingress.borrow().idle_timeout_for(proto, false).await;
    let link = Link::new(proto, client_side, server_side, now, idle_timeout);

    let link_table = ingress.borrow().link_table.clone();
    let link_id = link_table.borrow_mut().insert(link);

    ingress.borrow_mut().links.insert_active(proto, link_id);
    egress.borrow_mut().links.insert_active(proto, link_id);

    Ok((link_id, egress, new_src, remote))
}

/// Resolves `dst_ip`'s next hop on `egress`'s domain: direct if it is on-subnet, the domain's
/// configured gateway otherwise.
fn next_hop_ip<P>(egress: &Rc<RefCell<Interface<P>>>, dst_ip: Ipv4Addr) -> Ipv4Addr {
    let ip_config = egress.borrow().domain.borrow().ip_config();

    match ip_config {
        Some(cfg) if !cfg.contains(dst_ip) => cfg.gateway.unwrap_or(dst_ip),
        _ => dst_ip,
    }
}

/// Resolves `next_hop`'s MAC via the egress interface's ARP cache and either sends immediately
/// or parks the packet behind a waiter.
async fn adapt_eth_and_send<P>(
    egress: Rc<RefCell<Interface<P>>>,
    frame: &mut [u8],
    send_len: usize,
    next_hop: Ipv4Addr,
    now: Instant,
) -> Outcome
where
    P: RawReceive + RawSend,
{
    let cached = egress.borrow().arp.lookup(next_hop);

    if let Some(mac) = cached {
        return finish_send(&egress, frame, send_len, mac).await;
    }

    let bytes = frame[EthPacketHeader::SIZE..send_len].to_vec();

    let resolution = egress
        .borrow_mut()
        .arp
        .resolve_or_wait(next_hop, egress.clone(), bytes, now);

    let should_broadcast = match resolution {
        Resolution::Known(mac) => return finish_send(&egress, frame, send_len, mac).await,
        Resolution::Postponed { should_broadcast } => should_broadcast,
    };

    if should_broadcast {
        broadcast_arp_request(&egress, next_hop).await;
    }

    Outcome::Postponed
}

/// Resumes a waiter once the next-hop MAC it was parked on resolves: rebuilds the Ethernet header
/// around the already NAT-rewritten bytes and sends.
pub async fn resume_waiter<P>(waiter: ArpWaiter<P>, resolved_mac: MacAddr)
where
    P: RawReceive + RawSend,
{
    let egress = waiter.egress;
    let router_mac = egress.borrow().router_mac();

    let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + waiter.bytes.len()];

    let hdr = EthPacketHeader::new(router_mac, resolved_mac, ETH_TYPE_IPV4);
    if hdr.encode(&mut buf[..EthPacketHeader::SIZE]).is_err() {
        log::warn!("forward: resumed packet's eth header encode failed");
        return;
    }

    buf[EthPacketHeader::SIZE..].copy_from_slice(&waiter.bytes);

    let len = buf.len();
    if let Err(e) = egress.borrow_mut().send(resolved_mac, &mut buf, |_| len).await {
        log::warn!("forward: resumed packet send failed: {e:?}");
    }
}

fn finish_send_header(router_mac: MacAddr, dst_mac: MacAddr, frame: &mut [u8]) -> bool {
    let hdr = EthPacketHeader::new(router_mac, dst_mac, ETH_TYPE_IPV4);
    hdr.encode(&mut frame[..EthPacketHeader::SIZE]).is_ok()
}

async fn finish_send<P>(egress: &Rc<RefCell<Interface<P>>>, frame: &mut [u8], send_len: usize, dst_mac: MacAddr) -> Outcome
where
    P: RawReceive + RawSend,
{
    let router_mac = egress.borrow().router_mac();

    if !finish_send_header(router_mac, dst_mac, frame) {
        return Outcome::DropWarn("eth header encode failed").log("forward");
    }

    match egress.borrow_mut().send(dst_mac, frame, |_| send_len).await {
        Ok(()) => Outcome::Accept,
        Err(_) => Outcome::DropWarn("send failed").log("forward"),
    }
}

async fn broadcast_arp_request<P>(egress: &Rc<RefCell<Interface<P>>>, target: Ipv4Addr)
where
    P: RawReceive + RawSend,
{
    let (router_mac, own_ip) = {
        let iface = egress.borrow();
        let own_ip = iface
            .domain
            .borrow()
            .ip_config()
            .map(|c| c.address)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        (iface.router_mac(), own_ip)
    };

    let request = ArpPacket::new_request(router_mac, own_ip, target);

    let mut buf = [0u8; EthPacketHeader::SIZE + ArpPacket::SIZE];

    let hdr = EthPacketHeader::new(router_mac, eth::BROADCAST, ETH_TYPE_ARP);
    if hdr.encode(&mut buf[..EthPacketHeader::SIZE]).is_err() {
        return;
    }

    if request.encode(&mut buf[EthPacketHeader::SIZE..]).is_err() {
        return;
    }

    let len = buf.len();
    if let Err(e) = egress.borrow_mut().send(eth::BROADCAST, &mut buf, |_| len).await {
        log::warn!("forward: arp request send failed: {e:?}");
    }
}

/// DHCP client reply path: the FSM decodes the full (still IP/UDP-wrapped) reply itself and
/// tells us what to do next.
async fn dhcp_client_reply<P>(interface: &Rc<RefCell<Interface<P>>>, raw_ip_packet: &[u8], now: Instant) -> Outcome
where
    P: RawReceive + RawSend,
{
    let mut send_buf = alloc::vec![0u8; MTU];

    let action = {
        let mut iface = interface.borrow_mut();

        match iface.dhcp_client.state() {
            dhcp_client::State::Select => iface.dhcp_client.on_offer(raw_ip_packet, &mut send_buf, 0),
            dhcp_client::State::Request | dhcp_client::State::Renew | dhcp_client::State::Rebind => {
                iface.dhcp_client.on_ack_or_nak(raw_ip_packet)
            }
            _ => dhcp_client::Action::None,
        }
    };

    handle_dhcp_client_action(interface, action, now).await
}

/// Drives one `dhcp_client::Action` to completion: broadcasts an encoded frame, installs a new
/// lease, or drops one.
pub async fn handle_dhcp_client_action<P>(
    interface: &Rc<RefCell<Interface<P>>>,
    action: dhcp_client::Action<'_>,
    now: Instant,
) -> Outcome
where
    P: RawReceive + RawSend,
{
    match action {
        dhcp_client::Action::None => Outcome::Accept,
        dhcp_client::Action::Send(ip_packet, deadline, duration) => {
            let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + ip_packet.len()];
            let router_mac = interface.borrow().mac();

            let hdr = EthPacketHeader::new(router_mac, eth::BROADCAST, ETH_TYPE_IPV4);
            if hdr.encode(&mut buf[..EthPacketHeader::SIZE]).is_err() {
                return Outcome::DropWarn("dhcp client frame encode failed").log("forward");
            }

            buf[EthPacketHeader::SIZE..].copy_from_slice(ip_packet);

            interface.borrow_mut().dhcp_deadline = Some((deadline, now + duration));

            let len = buf.len();
            match interface.borrow_mut().send(eth::BROADCAST, &mut buf, |_| len).await {
                Ok(()) => Outcome::Accept,
                Err(_) => Outcome::DropWarn("dhcp client send failed").log("forward"),
            }
        }
        dhcp_client::Action::ConfigChanged(new_config) => {
            apply_dhcp_client_config(interface, new_config);
            Outcome::Accept
        }
    }
}

fn apply_dhcp_client_config<P>(interface: &Rc<RefCell<Interface<P>>>, new_config: Option<dhcp_client::LeasedConfig>) {
    // Before the new config is visible, all existing links originating from the old IP are
    // dissolved. This interface's own flows are the only ones that can reference its old IP, so
    // tearing down its own link membership is sufficient.
    interface.borrow_mut().links.dissolve_all();

    let domain = interface.borrow().domain.clone();

    let ip_config = new_config.as_ref().map(|c| crate::domain::IpConfig {
        address: c.ip,
        mask: c.subnet.unwrap_or(Ipv4Addr::new(255, 255, 255, 0)),
        gateway: c.gateway,
    });

    domain.borrow_mut().set_ip_config(ip_config);
}

/// DHCP server request path: decode the request ourselves (no raw-socket wrapping needed, the
/// FSM-less server engine takes an already-decoded [`DhcpPacket`]), run the pool algorithm, and
/// broadcast any reply.
async fn dhcp_server_request<P>(interface: &Rc<RefCell<Interface<P>>>, udp_payload: &[u8], now: Instant) -> Outcome
where
    P: RawReceive + RawSend,
{
    let packet = match DhcpPacket::decode(udp_payload) {
        Ok(packet) => packet,
        Err(_) => return Outcome::DropWarn("malformed dhcp request").log("forward"),
    };

    let config = interface.borrow().domain.borrow().dhcp_server().cloned();

    let Some(config) = config else {
        return Outcome::DropInform("no dhcp server configured on this domain").log("forward");
    };

    let mut opt_buf = edge_router_dhcp::Options::buf();

    let reply = {
        let mut iface = interface.borrow_mut();
        dhcp_server::process(&config, &mut iface.dhcp_leases, &packet, now, &mut opt_buf)
    };

    let reply_packet = match reply {
        dhcp_server::Reply::None => return Outcome::Accept,
        dhcp_server::Reply::DropWarn(msg) => return Outcome::DropWarn(msg).log("forward"),
        dhcp_server::Reply::Offer(p) | dhcp_server::Reply::Ack(p) | dhcp_server::Reply::Nak(p) => p,
    };

    send_dhcp_reply(interface, &reply_packet, config.server_ip).await
}

async fn send_dhcp_reply<P>(interface: &Rc<RefCell<Interface<P>>>, packet: &DhcpPacket<'_>, server_ip: Ipv4Addr) -> Outcome
where
    P: RawReceive + RawSend,
{
    let mut buf = alloc::vec![0u8; MTU];
    let router_mac = interface.borrow().mac();

    let hdr = EthPacketHeader::new(router_mac, eth::BROADCAST, ETH_TYPE_IPV4);

    let encoded = hdr.encode_with_payload(&mut buf, |payload| {
        packet
            .encode_raw(Some(server_ip), 67, Some(Ipv4Addr::BROADCAST), 68, payload)
            .map(|b| b.len())
            .map_err(|_| edge_router_wire::Error::InvalidFormat)
    });

    let len = match encoded {
        Ok(frame) => frame.len(),
        Err(_) => return Outcome::DropWarn("dhcp reply encode failed").log("forward"),
    };

    match interface.borrow_mut().send(eth::BROADCAST, &mut buf[..len], |_| len).await {
        Ok(()) => Outcome::Accept,
        Err(_) => Outcome::DropWarn("dhcp reply send failed").log("forward"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::IpConfig;
    use crate::interface::InterfaceConfig;
    use crate::rules::IpRule;
    use crate::testutil::{test_interface_sharing, TestPort};

    const LAN_ROUTER_MAC: MacAddr = [1; 6];
    const WAN_ROUTER_MAC: MacAddr = [2; 6];
    const LAN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const WAN_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
    const CLIENT_MAC: MacAddr = [9; 6];
    const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 50);
    const CLIENT_PORT: u16 = 40000;
    const REMOTE_MAC: MacAddr = [8; 6];
    const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);
    const REMOTE_PORT: u16 = 80;

    fn tcp_frame(eth_src: MacAddr, eth_dst: MacAddr, src: SocketAddrV4, dst: SocketAddrV4, flags: Flags) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + 64];

        let len = eth::encode(&mut buf, eth_src, eth_dst, ETH_TYPE_IPV4, |ip_buf| {
            edge_router_wire::ip::encode(ip_buf, *src.ip(), *dst.ip(), PROTO_TCP, |tcp_buf| {
                let hdr = TcpPacketHeader {
                    src: src.port(),
                    dst: dst.port(),
                    seq: 1,
                    ack: 0,
                    doff: 5,
                    flags,
                    window: 1024,
                    sum: 0,
                    urgent: 0,
                };

                let hdr_len = hdr.encode(tcp_buf)?.len();
                let checksum = TcpPacketHeader::checksum(&tcp_buf[..hdr_len], *src.ip(), *dst.ip());
                TcpPacketHeader::inject_checksum(tcp_buf, checksum);

                Ok(hdr_len)
            })
            .map(|s| s.len())
        })
        .unwrap()
        .len();

        buf.truncate(len);
        buf
    }

    fn arp_reply_frame(eth_src: MacAddr, eth_dst: MacAddr, sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + ArpPacket::SIZE];

        EthPacketHeader::new(eth_src, eth_dst, ETH_TYPE_ARP)
            .encode(&mut buf[..EthPacketHeader::SIZE])
            .unwrap();
        ArpPacket::new_reply(sha, spa, tha, tpa)
            .encode(&mut buf[EthPacketHeader::SIZE..])
            .unwrap();

        buf
    }

    fn setup() -> (Rc<RefCell<Interface<TestPort>>>, Rc<RefCell<Interface<TestPort>>>) {
        let link_table = Rc::new(RefCell::new(crate::link::LinkTable::new()));

        let lan = test_interface_sharing(
            InterfaceConfig {
                mac: LAN_ROUTER_MAC,
                router_mac: LAN_ROUTER_MAC,
                ..InterfaceConfig::default()
            },
            "lan",
            link_table.clone(),
        );
        let wan = test_interface_sharing(
            InterfaceConfig {
                mac: WAN_ROUTER_MAC,
                router_mac: WAN_ROUTER_MAC,
                ..InterfaceConfig::default()
            },
            "wan",
            link_table,
        );

        let lan_domain = lan.borrow().domain.clone();
        let wan_domain = wan.borrow().domain.clone();

        lan_domain.borrow_mut().set_ip_config(Some(IpConfig {
            address: LAN_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        }));
        wan_domain.borrow_mut().set_ip_config(Some(IpConfig {
            address: WAN_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        }));

        wan_domain.borrow_mut().bind(wan.clone());

        lan_domain.borrow_mut().ip_rules().add(IpRule {
            network: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            domain: wan_domain.clone(),
        });

        (lan, wan)
    }

    #[test]
    fn postponed_packet_is_resumed_once_arp_resolves() {
        let (lan, wan) = setup();

        let mut frame = tcp_frame(
            CLIENT_MAC,
            LAN_ROUTER_MAC,
            SocketAddrV4::new(CLIENT_IP, CLIENT_PORT),
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            Flags::SYN,
        );

        let outcome = futures_lite::future::block_on(handle_ipv4(&lan, &mut frame, CLIENT_MAC, Instant::from_secs(0)));
        assert!(matches!(outcome, Outcome::Postponed));

        assert_eq!(lan.borrow().links.active_ids(PROTO_TCP).len(), 1);
        assert_eq!(wan.borrow().links.active_ids(PROTO_TCP).len(), 1);
        assert_eq!(wan.borrow().port().sent.len(), 1, "arp request for the next hop");

        let mut reply = arp_reply_frame(REMOTE_MAC, WAN_ROUTER_MAC, REMOTE_MAC, REMOTE_IP, WAN_ROUTER_MAC, WAN_IP);
        futures_lite::future::block_on(crate::dispatch::dispatch_frame(&wan, &mut reply, Instant::from_secs(0)));

        let wan_ref = wan.borrow();
        assert_eq!(wan_ref.port().sent.len(), 2, "the postponed packet is now resumed");

        let resumed = &wan_ref.port().sent[1].1;
        let ip_hdr = Ipv4PacketHeader::decode(&resumed[EthPacketHeader::SIZE..]).unwrap();
        assert_eq!(ip_hdr.src, WAN_IP);
        assert_eq!(ip_hdr.dst, REMOTE_IP);

        let l4_offset = EthPacketHeader::SIZE + ip_hdr.hlen as usize;
        let tcp_hdr = TcpPacketHeader::decode(&resumed[l4_offset..]).unwrap();
        assert_eq!(tcp_hdr.src, crate::rules::PortAllocator::DEFAULT_LOW);
        assert_eq!(tcp_hdr.dst, REMOTE_PORT);
    }

    #[test]
    fn reply_packet_reuses_the_link_and_rewrites_back_to_the_client() {
        let (lan, wan) = setup();

        let mut out_frame = tcp_frame(
            CLIENT_MAC,
            LAN_ROUTER_MAC,
            SocketAddrV4::new(CLIENT_IP, CLIENT_PORT),
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            Flags::SYN,
        );
        futures_lite::future::block_on(handle_ipv4(&lan, &mut out_frame, CLIENT_MAC, Instant::from_secs(0)));

        let nat_port = crate::rules::PortAllocator::DEFAULT_LOW;

        let mut reply_frame = tcp_frame(
            REMOTE_MAC,
            WAN_ROUTER_MAC,
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            SocketAddrV4::new(WAN_IP, nat_port),
            Flags::SYN | Flags::ACK,
        );

        let outcome = futures_lite::future::block_on(handle_ipv4(&wan, &mut reply_frame, REMOTE_MAC, Instant::from_secs(1)));
        assert!(matches!(outcome, Outcome::Postponed), "client's mac isn't cached yet either");

        assert_eq!(lan.borrow().port().sent.len(), 1, "arp request for the client's real ip");

        let mut client_arp_reply = arp_reply_frame(CLIENT_MAC, LAN_ROUTER_MAC, CLIENT_MAC, CLIENT_IP, LAN_ROUTER_MAC, LAN_IP);
        futures_lite::future::block_on(crate::dispatch::dispatch_frame(&lan, &mut client_arp_reply, Instant::from_secs(1)));

        let lan_ref = lan.borrow();
        assert_eq!(lan_ref.port().sent.len(), 2);

        let resumed = &lan_ref.port().sent[1].1;
        let ip_hdr = Ipv4PacketHeader::decode(&resumed[EthPacketHeader::SIZE..]).unwrap();
        assert_eq!(ip_hdr.src, REMOTE_IP, "server address is visible to the client unchanged");
        assert_eq!(ip_hdr.dst, CLIENT_IP);

        let l4_offset = EthPacketHeader::SIZE + ip_hdr.hlen as usize;
        let tcp_hdr = TcpPacketHeader::decode(&resumed[l4_offset..]).unwrap();
        assert_eq!(tcp_hdr.src, REMOTE_PORT);
        assert_eq!(tcp_hdr.dst, CLIENT_PORT);
    }

    #[test]
    fn fin_from_both_sides_closes_the_link() {
        let (lan, wan) = setup();

        let mut syn = tcp_frame(
            CLIENT_MAC,
            LAN_ROUTER_MAC,
            SocketAddrV4::new(CLIENT_IP, CLIENT_PORT),
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            Flags::SYN,
        );
        futures_lite::future::block_on(handle_ipv4(&lan, &mut syn, CLIENT_MAC, Instant::from_secs(0)));

        let link_table = lan.borrow().link_table.clone();
        let link_id = lan.borrow().links.active_ids(PROTO_TCP)[0];
        assert_eq!(link_table.borrow().get(link_id).unwrap().state, crate::link::LinkState::Open);

        let mut client_fin = tcp_frame(
            CLIENT_MAC,
            LAN_ROUTER_MAC,
            SocketAddrV4::new(CLIENT_IP, CLIENT_PORT),
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            Flags::FIN | Flags::ACK,
        );
        futures_lite::future::block_on(handle_ipv4(&lan, &mut client_fin, CLIENT_MAC, Instant::from_secs(1)));
        assert_eq!(link_table.borrow().get(link_id).unwrap().state, crate::link::LinkState::Closing);

        let nat_port = crate::rules::PortAllocator::DEFAULT_LOW;
        let mut server_fin = tcp_frame(
            REMOTE_MAC,
            WAN_ROUTER_MAC,
            SocketAddrV4::new(REMOTE_IP, REMOTE_PORT),
            SocketAddrV4::new(WAN_IP, nat_port),
            Flags::FIN | Flags::ACK,
        );
        futures_lite::future::block_on(handle_ipv4(&wan, &mut server_fin, REMOTE_MAC, Instant::from_secs(2)));
        assert_eq!(link_table.borrow().get(link_id).unwrap().state, crate::link::LinkState::Closed);
    }
}
