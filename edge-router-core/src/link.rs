//! The link table: per-flow NAT state shared between the two interfaces a flow crosses.

use core::net::SocketAddrV4;

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_time::{Duration, Instant};

use edge_router_wire::tcp::Flags;

use crate::arena::{Arena, Id};
use crate::interface::Interface;
use crate::rules::{Proto, PROTO_TCP};

pub type LinkId<P> = Id<Link<P>>;

/// The 5-tuple a Link is looked up by.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SideId {
    pub proto: Proto,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

/// One side of a Link: the interface it was observed on and the addresses/MACs valid on that
/// side's wire.
pub struct LinkSide<P> {
    pub interface: Rc<RefCell<Interface<P>>>,
    pub local_mac: edge_router_nal::MacAddr,
    pub remote_mac: edge_router_nal::MacAddr,
    pub id: SideId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkState {
    Open,
    Closing,
    Closed,
}

/// A NAT-mapped transport flow: a client side (pre-NAT, as seen by the ingress interface) and a
/// server side (post-NAT, as seen by the egress interface).
pub struct Link<P> {
    pub proto: Proto,
    pub client: LinkSide<P>,
    pub server: LinkSide<P>,
    pub state: LinkState,
    fin_client: bool,
    fin_server: bool,
    last_active: Instant,
    idle_timeout: Duration,
}

impl<P> Link<P> {
    pub fn new(
        proto: Proto,
        client: LinkSide<P>,
        server: LinkSide<P>,
        now: Instant,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            proto,
            client,
            server,
            state: LinkState::Open,
            fin_client: false,
            fin_server: false,
            last_active: now,
            idle_timeout,
        }
    }

    /// The side matching `id`, if any, together with the opposite side packets on this side
    /// must be rewritten to and forwarded on.
    pub fn side_for(&self, id: &SideId) -> Option<(&LinkSide<P>, &LinkSide<P>)> {
        if self.client.id == *id {
            Some((&self.client, &self.server))
        } else if self.server.id == *id {
            Some((&self.server, &self.client))
        } else {
            None
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    /// Re-derives the idle timeout once a link enters a different teardown phase - a TCP link
    /// that has seen one FIN idles out on `tcp_closing_timeout`, not the (longer)
    /// `tcp_open_timeout` it was created with.
    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        now - self.last_active >= self.idle_timeout
    }

    /// Folds observed TCP control flags into the flow's teardown state. `from_client` indicates
    /// which side's packet carried the flags.
    pub fn observe_tcp_flags(&mut self, flags: Flags, from_client: bool) {
        if self.proto != PROTO_TCP {
            return;
        }

        if flags.contains(Flags::FIN) || flags.contains(Flags::RST) {
            if from_client {
                self.fin_client = true;
            } else {
                self.fin_server = true;
            }
        }

        self.state = if self.fin_client && self.fin_server {
            LinkState::Closed
        } else if self.fin_client || self.fin_server {
            LinkState::Closing
        } else {
            self.state
        };
    }

    pub fn should_dissolve(&self, now: Instant) -> bool {
        matches!(self.state, LinkState::Closed) || self.is_idle(now)
    }
}

/// Shared link arena. A Link may join two different interfaces, possibly in different domains,
/// so the arena itself is owned above any single Domain and handed to every `Interface` at
/// construction as an `Rc<RefCell<_>>`.
pub struct LinkTable<P>(Arena<Link<P>>);

impl<P> Default for LinkTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> LinkTable<P> {
    pub fn new() -> Self {
        Self(Arena::new())
    }

    pub fn insert(&mut self, link: Link<P>) -> LinkId<P> {
        self.0.insert(link)
    }

    pub fn get(&self, id: LinkId<P>) -> Option<&Link<P>> {
        self.0.get(id)
    }

    pub fn get_mut(&mut self, id: LinkId<P>) -> Option<&mut Link<P>> {
        self.0.get_mut(id)
    }

    /// Actually frees a dissolved link's slot. Called only from the deferred-destroy drain point
    /// so no in-flight descriptor can still reference it. Returns the removed Link so the caller
    /// can release any resources (NAT port) it held.
    pub fn destroy(&mut self, id: LinkId<P>) -> Option<Link<P>> {
        self.0.remove(id)
    }

    /// Finds the Link (if any) matching `id` on either side, together with which side matched.
    pub fn find(&self, ids: &[LinkId<P>], side: &SideId) -> Option<LinkId<P>> {
        ids.iter()
            .copied()
            .find(|&id| self.0.get(id).is_some_and(|link| link.side_for(side).is_some()))
    }
}

/// Per-interface link membership lists: a Link appears in exactly one of the active/dissolved
/// list for each protocol, for each of its two interfaces.
#[derive(Default)]
pub struct LinkLists<P> {
    pub tcp_links: Vec<LinkId<P>>,
    pub udp_links: Vec<LinkId<P>>,
    pub dissolved_tcp_links: Vec<LinkId<P>>,
    pub dissolved_udp_links: Vec<LinkId<P>>,
}

impl<P> LinkLists<P> {
    pub fn new() -> Self {
        Self {
            tcp_links: Vec::new(),
            udp_links: Vec::new(),
            dissolved_tcp_links: Vec::new(),
            dissolved_udp_links: Vec::new(),
        }
    }

    fn active(&mut self, proto: Proto) -> &mut Vec<LinkId<P>> {
        if proto == PROTO_TCP {
            &mut self.tcp_links
        } else {
            &mut self.udp_links
        }
    }

    fn dissolved(&mut self, proto: Proto) -> &mut Vec<LinkId<P>> {
        if proto == PROTO_TCP {
            &mut self.dissolved_tcp_links
        } else {
            &mut self.dissolved_udp_links
        }
    }

    pub fn insert_active(&mut self, proto: Proto, id: LinkId<P>) {
        self.active(proto).push(id);
    }

    pub fn active_ids(&self, proto: Proto) -> &[LinkId<P>] {
        if proto == PROTO_TCP {
            &self.tcp_links
        } else {
            &self.udp_links
        }
    }

    /// Moves a Link from the active list to the dissolved quarantine (two-phase delete). No-op
    /// if the id isn't in the active list (already dissolved or foreign).
    pub fn dissolve(&mut self, proto: Proto, id: LinkId<P>) {
        let active = self.active(proto);

        if let Some(pos) = active.iter().position(|&x| x == id) {
            active.swap_remove(pos);
            self.dissolved(proto).push(id);
        }
    }

    /// Drains the dissolved quarantine, returning the ids to actually destroy in the arena. Call
    /// only at the deferred-destroy point.
    pub fn drain_dissolved(&mut self) -> Vec<LinkId<P>> {
        let mut drained = core::mem::take(&mut self.dissolved_tcp_links);
        drained.append(&mut self.dissolved_udp_links);

        drained
    }

    /// Moves every active Link straight to dissolved - used on interface teardown, which must
    /// dissolve every link it originated.
    pub fn dissolve_all(&mut self) {
        self.dissolved_tcp_links.append(&mut self.tcp_links);
        self.dissolved_udp_links.append(&mut self.udp_links);
    }
}
