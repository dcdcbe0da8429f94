//! Frame dispatch: classify one inbound Ethernet frame and branch to the ARP engine or the IPv4
//! forwarder.

use alloc::rc::Rc;
use core::cell::RefCell;

use embassy_time::Instant;

use edge_router_nal::{RawReceive, RawSend};
use edge_router_wire::arp::{ArpPacket, Operation};
use edge_router_wire::eth::{EthPacketHeader, ETH_TYPE_ARP, ETH_TYPE_IPV4};

use crate::error::Outcome;
use crate::forward;
use crate::interface::Interface;

/// Entry point for one received frame. `frame` is exactly the received length; every rewrite the
/// forwarder performs happens in place on this same buffer, and it is also what eventually gets
/// handed to an egress interface's `send`, byte for byte, if routing accepts the packet.
pub async fn dispatch_frame<P>(interface: &Rc<RefCell<Interface<P>>>, frame: &mut [u8], now: Instant) -> Outcome
where
    P: RawReceive + RawSend,
{
    let own_mac = interface.borrow().mac();

    let (ethertype, src_mac) = match EthPacketHeader::decode_with_payload(frame, Some(own_mac)) {
        Ok(Some((hdr, _payload))) => (hdr.ethertype, hdr.src),
        Ok(None) => {
            // Addressed to neither us nor the broadcast address - not our concern. This is the
            // normal, high-volume case on a shared medium, not an abnormal condition, so it is
            // dropped without a log.
            return Outcome::Accept;
        }
        Err(_) => return Outcome::DropWarn("frame too short for an eth header").log("dispatch"),
    };

    match ethertype {
        ETH_TYPE_ARP => handle_arp(interface, frame).await,
        ETH_TYPE_IPV4 => forward::handle_ipv4(interface, frame, src_mac, now).await,
        _ => Outcome::Accept,
    }
}

/// ARP handling: answer requests for an address this interface's domain owns, and resume any
/// waiters parked on a reply's sender.
async fn handle_arp<P>(interface: &Rc<RefCell<Interface<P>>>, frame: &mut [u8]) -> Outcome
where
    P: RawReceive + RawSend,
{
    let packet = match ArpPacket::decode(&frame[EthPacketHeader::SIZE..]) {
        Ok(packet) => packet,
        Err(_) => return Outcome::DropWarn("malformed arp packet").log("dispatch"),
    };

    interface.borrow_mut().arp.learn_sender(&packet);

    let own_ip = interface
        .borrow()
        .domain
        .borrow()
        .ip_config()
        .map(|c| c.address);

    if let Some(own_ip) = own_ip {
        if packet.is_request_for(own_ip) {
            return reply_to_arp_request(interface, &packet, own_ip).await;
        }
    }

    if packet.operation == Operation::Reply {
        let resumed = interface.borrow_mut().arp.on_reply(&packet);

        for waiter in resumed {
            forward::resume_waiter(waiter, packet.sha).await;
        }
    }

    Outcome::Accept
}

async fn reply_to_arp_request<P>(
    interface: &Rc<RefCell<Interface<P>>>,
    request: &ArpPacket,
    own_ip: core::net::Ipv4Addr,
) -> Outcome
where
    P: RawReceive + RawSend,
{
    let router_mac = interface.borrow().router_mac();
    let reply = ArpPacket::new_reply(router_mac, own_ip, request.sha, request.spa);

    let mut buf = [0u8; EthPacketHeader::SIZE + ArpPacket::SIZE];

    let hdr = EthPacketHeader::new(router_mac, request.sha, ETH_TYPE_ARP);
    if hdr.encode(&mut buf[..EthPacketHeader::SIZE]).is_err() {
        return Outcome::DropWarn("arp reply header encode failed").log("dispatch");
    }

    if reply.encode(&mut buf[EthPacketHeader::SIZE..]).is_err() {
        return Outcome::DropWarn("arp reply encode failed").log("dispatch");
    }

    let len = buf.len();

    match interface.borrow_mut().send(request.sha, &mut buf, |_| len).await {
        Ok(()) => Outcome::Accept,
        Err(_) => Outcome::DropWarn("arp reply send failed").log("dispatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::net::Ipv4Addr;

    use edge_router_wire::eth::EthPacketHeader;

    use crate::domain::IpConfig;
    use crate::interface::InterfaceConfig;
    use crate::testutil::test_interface;

    const ROUTER_MAC: [u8; 6] = [1; 6];
    const ROUTER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const HOST_MAC: [u8; 6] = [2; 6];
    const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 50);

    fn config() -> InterfaceConfig {
        InterfaceConfig {
            mac: ROUTER_MAC,
            router_mac: ROUTER_MAC,
            ..InterfaceConfig::default()
        }
    }

    fn arp_request_frame(dst: edge_router_nal::MacAddr) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + ArpPacket::SIZE];

        let hdr = EthPacketHeader::new(HOST_MAC, dst, ETH_TYPE_ARP);
        hdr.encode(&mut buf[..EthPacketHeader::SIZE]).unwrap();

        ArpPacket::new_request(HOST_MAC, HOST_IP, ROUTER_IP)
            .encode(&mut buf[EthPacketHeader::SIZE..])
            .unwrap();

        buf
    }

    #[test]
    fn request_for_our_ip_gets_a_reply() {
        let iface = test_interface(config(), "lan");
        iface.borrow().domain.borrow_mut().set_ip_config(Some(IpConfig {
            address: ROUTER_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        }));

        let mut frame = arp_request_frame(ROUTER_MAC);
        let outcome = futures_lite::future::block_on(dispatch_frame(
            &iface,
            &mut frame,
            Instant::from_secs(0),
        ));
        assert!(outcome.is_accept());

        let iface = iface.borrow();
        let sent = &iface.port().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, HOST_MAC);

        let reply = ArpPacket::decode(&sent[0].1[EthPacketHeader::SIZE..]).unwrap();
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.spa, ROUTER_IP);
        assert_eq!(reply.sha, ROUTER_MAC);
        assert_eq!(reply.tha, HOST_MAC);
    }

    #[test]
    fn request_for_someone_elses_ip_is_not_answered() {
        let iface = test_interface(config(), "lan");
        iface.borrow().domain.borrow_mut().set_ip_config(Some(IpConfig {
            address: ROUTER_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        }));

        let mut frame = arp_request_frame(ROUTER_MAC);
        ArpPacket::new_request(HOST_MAC, HOST_IP, Ipv4Addr::new(10, 0, 0, 99))
            .encode(&mut frame[EthPacketHeader::SIZE..])
            .unwrap();

        futures_lite::future::block_on(dispatch_frame(&iface, &mut frame, Instant::from_secs(0)));

        assert!(iface.borrow().port().sent.is_empty());
    }

    #[test]
    fn frame_addressed_to_a_different_unicast_mac_is_silently_ignored() {
        let iface = test_interface(config(), "lan");

        let mut frame = arp_request_frame([9; 6]);

        let outcome = futures_lite::future::block_on(dispatch_frame(
            &iface,
            &mut frame,
            Instant::from_secs(0),
        ));
        assert!(outcome.is_accept());
        assert!(iface.borrow().port().sent.is_empty());
    }

    #[test]
    fn arp_reply_resumes_a_postponed_send() {
        let iface = test_interface(config(), "lan");

        iface.borrow_mut().arp.resolve_or_wait(
            HOST_IP,
            iface.clone(),
            alloc::vec![0xaa; 4],
            Instant::from_secs(0),
        );

        let mut buf = alloc::vec![0u8; EthPacketHeader::SIZE + ArpPacket::SIZE];
        let hdr = EthPacketHeader::new(HOST_MAC, ROUTER_MAC, ETH_TYPE_ARP);
        hdr.encode(&mut buf[..EthPacketHeader::SIZE]).unwrap();
        ArpPacket::new_reply(HOST_MAC, HOST_IP, ROUTER_MAC, ROUTER_IP)
            .encode(&mut buf[EthPacketHeader::SIZE..])
            .unwrap();

        futures_lite::future::block_on(dispatch_frame(&iface, &mut buf, Instant::from_secs(0)));

        let iface = iface.borrow();
        assert_eq!(iface.port().sent.len(), 1);
        assert_eq!(iface.port().sent[0].0, HOST_MAC);
        assert_eq!(iface.arp.lookup(HOST_IP), Some(HOST_MAC));
    }
}
