//! A minimal two-interface NAT router: a LAN side with a static address and a DHCP server, and a
//! WAN side that acquires its own address via a DHCP client, with every other LAN destination
//! forwarded out through whichever address the WAN client ends up leasing.
//!
//! NOTE: run with `sudo` - raw `AF_PACKET` sockets require root. Run `ip addr` first to find the
//! kernel interface indices and MAC addresses of your LAN and WAN NICs and edit the constants
//! below.

use core::net::Ipv4Addr;

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::Duration;

use edge_router_core::dhcp_server::DhcpServerConfig;
use edge_router_core::domain::{Domain, IpConfig};
use edge_router_core::interface::{Interface, InterfaceConfig};
use edge_router_core::link::LinkTable;
use edge_router_core::rules::IpRule;
use edge_router_core::run_interface;
use edge_router_nal::MacAddr;
use edge_router_std::Interface as NicInterface;

const LAN_IF_INDEX: u32 = 1; // run `ip addr` to see it
const LAN_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]; // your LAN NIC's MAC addr here

const WAN_IF_INDEX: u32 = 2; // run `ip addr` to see it
const WAN_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02]; // your WAN NIC's MAC addr here

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    futures_lite::future::block_on(run()).unwrap();
}

async fn run() -> Result<(), anyhow::Error> {
    let lan_socket = NicInterface::new(LAN_IF_INDEX).bind()?;
    let wan_socket = NicInterface::new(WAN_IF_INDEX).bind()?;

    let link_table = Rc::new(RefCell::new(LinkTable::new()));

    let lan_domain = Rc::new(RefCell::new(Domain::unconfigured("lan")));
    lan_domain.borrow_mut().set_ip_config(Some(IpConfig {
        address: Ipv4Addr::new(192, 168, 1, 1),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: None,
    }));
    lan_domain
        .borrow_mut()
        .set_dhcp_server(Some(DhcpServerConfig {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            pool_low: Ipv4Addr::new(192, 168, 1, 100),
            pool_high: Ipv4Addr::new(192, 168, 1, 200),
            lease: Duration::from_secs(3600),
            offer_timeout: Duration::from_secs(30),
            gateways: vec![Ipv4Addr::new(192, 168, 1, 1)],
            subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns: vec![Ipv4Addr::new(8, 8, 8, 8)],
        }));

    let wan_domain = Rc::new(RefCell::new(Domain::unconfigured("wan")));

    // Every LAN destination not otherwise routed NATs out through the WAN domain, used here as a
    // default route.
    lan_domain.borrow_mut().ip_rules().add(IpRule {
        network: Ipv4Addr::UNSPECIFIED,
        prefix_len: 0,
        domain: wan_domain.clone(),
    });

    let lan_interface = Rc::new(RefCell::new(Interface::new(
        InterfaceConfig {
            mac: LAN_MAC,
            router_mac: LAN_MAC,
            ..InterfaceConfig::default()
        },
        lan_domain.clone(),
        link_table.clone(),
        lan_socket,
        Box::new(rand::thread_rng()),
    )));

    let wan_interface = Rc::new(RefCell::new(Interface::new(
        InterfaceConfig {
            mac: WAN_MAC,
            router_mac: WAN_MAC,
            ..InterfaceConfig::default()
        },
        wan_domain.clone(),
        link_table,
        wan_socket,
        Box::new(rand::thread_rng()),
    )));

    lan_domain.borrow_mut().bind(lan_interface.clone());
    wan_domain.borrow_mut().bind(wan_interface.clone());

    log::info!("router: lan and wan interfaces up, entering the event loop");

    embassy_futures::select::select(run_interface(lan_interface), run_interface(wan_interface)).await;

    Ok(())
}
