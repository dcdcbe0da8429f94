//! Domain binding: the routing zone an interface is bound to.

use core::net::Ipv4Addr;

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use edge_router_nal::{RawReceive, RawSend};
use edge_router_wire::eth;

use crate::dhcp_server::DhcpServerConfig;
use crate::interface::Interface;
use crate::rules::{ForwardRuleTree, IpRuleTree, PortAllocator, Proto, TransportRuleTree, PROTO_TCP, PROTO_UDP};

/// A domain's IPv4 configuration: either statically configured, or pending a DHCP client lease.
#[derive(Clone, Copy, Debug)]
pub struct IpConfig {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

impl IpConfig {
    pub fn broadcast(&self) -> Ipv4Addr {
        let addr = u32::from(self.address);
        let mask = u32::from(self.mask);

        Ipv4Addr::from(addr | !mask)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);

        u32::from(ip) & mask == u32::from(self.address) & mask
    }
}

/// A logical routing zone (glossary "Domain"): a group of interfaces sharing an IP realm and a
/// set of rule trees. Shared, not owned, by the interfaces bound to it.
pub struct Domain<P> {
    name: String,
    ip_config: Option<IpConfig>,
    forward_rules_tcp: ForwardRuleTree<P>,
    forward_rules_udp: ForwardRuleTree<P>,
    transport_rules_tcp: TransportRuleTree<P>,
    transport_rules_udp: TransportRuleTree<P>,
    ip_rules: IpRuleTree<P>,
    nat_ports: PortAllocator,
    dhcp_server: Option<DhcpServerConfig>,
    interfaces: Vec<Rc<RefCell<Interface<P>>>>,
}

impl<P> Domain<P> {
    pub fn unconfigured(name: &str) -> Self {
        Self {
            name: String::from(name),
            ip_config: None,
            forward_rules_tcp: ForwardRuleTree::new(),
            forward_rules_udp: ForwardRuleTree::new(),
            transport_rules_tcp: TransportRuleTree::new(),
            transport_rules_udp: TransportRuleTree::new(),
            ip_rules: IpRuleTree::new(),
            nat_ports: PortAllocator::default(),
            dhcp_server: None,
            interfaces: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip_config(&self) -> Option<IpConfig> {
        self.ip_config
    }

    /// Installs or clears the domain's IP configuration. The DHCP client FSM calls this
    /// atomically alongside dissolving old-IP links.
    pub fn set_ip_config(&mut self, config: Option<IpConfig>) {
        self.ip_config = config;
    }

    pub fn dhcp_server(&self) -> Option<&DhcpServerConfig> {
        self.dhcp_server.as_ref()
    }

    pub fn set_dhcp_server(&mut self, config: Option<DhcpServerConfig>) {
        self.dhcp_server = config;
    }

    pub fn ip_rules(&mut self) -> &mut IpRuleTree<P> {
        &mut self.ip_rules
    }

    pub fn forward_rules(&mut self, proto: Proto) -> &mut ForwardRuleTree<P> {
        if proto == PROTO_TCP {
            &mut self.forward_rules_tcp
        } else {
            &mut self.forward_rules_udp
        }
    }

    pub fn transport_rules(&mut self, proto: Proto) -> &mut TransportRuleTree<P> {
        if proto == PROTO_TCP {
            &mut self.transport_rules_tcp
        } else {
            &mut self.transport_rules_udp
        }
    }

    pub fn alloc_nat_port(&mut self) -> Option<u16> {
        self.nat_ports.alloc()
    }

    pub fn release_nat_port(&mut self, port: u16) {
        self.nat_ports.release(port)
    }

    /// The set of interfaces bound to this domain.
    pub fn interfaces(&self) -> &[Rc<RefCell<Interface<P>>>] {
        &self.interfaces
    }

    pub fn bind(&mut self, interface: Rc<RefCell<Interface<P>>>) {
        self.interfaces.push(interface);
    }

    pub fn unbind(&mut self, interface: &Rc<RefCell<Interface<P>>>) {
        self.interfaces.retain(|i| !Rc::ptr_eq(i, interface));
    }

    /// Picks the egress interface for traffic entering this domain, other than `from` when
    /// given (broadcast/forward never loops a packet back out the interface it arrived on in
    /// the same domain). Picks the first eligible interface - a domain normally binds traffic to
    /// a single uplink interface, so no further tie-break policy is specified.
    pub fn egress_interface(&self, from: Option<&Rc<RefCell<Interface<P>>>>) -> Option<Rc<RefCell<Interface<P>>>> {
        self.interfaces
            .iter()
            .find(|i| from.is_none_or(|from| !Rc::ptr_eq(i, from)))
            .cloned()
    }
}

impl<P> Domain<P>
where
    P: RawReceive + RawSend,
{
    /// Broadcasts `frame` (a complete Ethernet frame) to every interface bound to this domain
    /// other than `from` - the final fallback when no forward/transport/IP rule matches a
    /// destination. Per-interface send failures are logged and otherwise ignored - one
    /// interface's transient TX error must not abort delivery to the others.
    pub async fn broadcast(&self, from: Option<&Rc<RefCell<Interface<P>>>>, frame: &[u8]) {
        for iface in self
            .interfaces
            .iter()
            .filter(|i| from.is_none_or(|from| !Rc::ptr_eq(i, from)))
        {
            let mut buf = frame.to_vec();
            let len = buf.len();

            if let Err(e) = iface
                .borrow_mut()
                .send(eth::BROADCAST, &mut buf, |_| len)
                .await
            {
                log::warn!("domain '{}': broadcast send failed: {e:?}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::interface::InterfaceConfig;
    use crate::testutil::test_interface;

    #[test]
    fn ip_config_broadcast_and_contains() {
        let config = IpConfig {
            address: Ipv4Addr::new(192, 168, 1, 42),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        };

        assert_eq!(config.broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert!(config.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!config.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn egress_interface_excludes_from_and_picks_the_first_remaining() {
        let mut domain = Domain::unconfigured("lan");
        let a = test_interface(InterfaceConfig::default(), "lan");
        let b = test_interface(InterfaceConfig::default(), "lan");

        domain.bind(a.clone());
        domain.bind(b.clone());

        assert!(Rc::ptr_eq(&domain.egress_interface(None).unwrap(), &a));
        assert!(Rc::ptr_eq(&domain.egress_interface(Some(&a)).unwrap(), &b));

        domain.unbind(&a);
        assert!(domain.egress_interface(Some(&b)).is_none());
    }

    #[test]
    fn nat_port_alloc_and_release_roundtrip() {
        let mut domain: Domain<crate::testutil::TestPort> = Domain::unconfigured("lan");

        let first = domain.alloc_nat_port().unwrap();
        domain.release_nat_port(first);

        assert_eq!(domain.alloc_nat_port(), Some(first));
    }

    #[test]
    fn broadcast_sends_to_every_interface_except_from() {
        let mut domain: Domain<crate::testutil::TestPort> = Domain::unconfigured("lan");
        let a = test_interface(InterfaceConfig::default(), "lan");
        let b = test_interface(InterfaceConfig::default(), "lan");
        let c = test_interface(InterfaceConfig::default(), "lan");

        domain.bind(a.clone());
        domain.bind(b.clone());
        domain.bind(c.clone());

        futures_lite::future::block_on(domain.broadcast(Some(&a), &[0xaa; 10]));

        assert!(a.borrow().port().sent.is_empty());
        assert_eq!(b.borrow().port().sent.len(), 1);
        assert_eq!(c.borrow().port().sent.len(), 1);
    }
}
