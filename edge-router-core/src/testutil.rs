//! Test-only doubles shared by this crate's `#[cfg(test)]` modules: a `PacketPort` that never
//! receives and swallows sends, and a deterministic RNG, so `Interface<TestPort>` values can be
//! built without a real socket or clock.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embedded_io_async::{ErrorType, ErrorKind};
use rand_core::RngCore;

use edge_router_nal::{MacAddr, RawReceive, RawSend};

use crate::domain::Domain;
use crate::interface::{Interface, InterfaceConfig};
use crate::link::LinkTable;

#[derive(Debug)]
pub(crate) struct NoError;

impl embedded_io_async::Error for NoError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// A `PacketPort` double: `receive` never resolves (tests drive dispatch directly rather than
/// through the event loop), `send` records every frame it was asked to emit.
#[derive(Default)]
pub(crate) struct TestPort {
    pub sent: Vec<(MacAddr, Vec<u8>)>,
}

impl ErrorType for TestPort {
    type Error = NoError;
}

impl RawReceive for TestPort {
    async fn receive(&mut self, _buffer: &mut [u8]) -> Result<(usize, MacAddr), Self::Error> {
        core::future::pending().await
    }
}

impl RawSend for TestPort {
    async fn send(&mut self, addr: MacAddr, data: &[u8]) -> Result<(), Self::Error> {
        self.sent.push((addr, data.to_vec()));
        Ok(())
    }
}

/// A counter-based RNG: deterministic xids are easier to assert on than a real CSPRNG's.
pub(crate) struct CountingRng(pub u32);

impl RngCore for CountingRng {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u32() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.next_u32() as u8;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Builds a freestanding interface bound to its own unconfigured domain and link table - enough
/// to exercise the ARP cache, link table and NAT forwarder without an event loop.
pub(crate) fn test_interface(
    config: InterfaceConfig,
    domain_name: &str,
) -> Rc<RefCell<Interface<TestPort>>> {
    test_interface_sharing(config, domain_name, Rc::new(RefCell::new(LinkTable::new())))
}

/// Like [`test_interface`], but binds to a caller-supplied link table rather than a fresh one.
/// A real router hands the *same* link table to every interface it owns (see `demos/router.rs`),
/// since a `Link` is split across its client and server `LinkSide` - tests that span two
/// interfaces and expect a link created on one to be found from the other need this, not two
/// independent tables that never see each other's inserts.
pub(crate) fn test_interface_sharing(
    config: InterfaceConfig,
    domain_name: &str,
    link_table: Rc<RefCell<LinkTable<TestPort>>>,
) -> Rc<RefCell<Interface<TestPort>>> {
    let domain = Rc::new(RefCell::new(Domain::unconfigured(domain_name)));

    Rc::new(RefCell::new(Interface::new(
        config,
        domain,
        link_table,
        TestPort::default(),
        Box::new(CountingRng(1)),
    )))
}
