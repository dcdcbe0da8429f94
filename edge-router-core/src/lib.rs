//! A user-space IPv4 NAT/router network interface: ARP resolution, DHCP client/server FSMs, a
//! NAT flow/link table, and IPv4 forwarding with address/port rewriting over a raw packet port.
//!
//! [`interface::Interface`] owns the packet port and its timers, [`dispatch`] classifies incoming
//! frames, [`arp`] resolves next-hop MAC addresses, [`forward`] is the NAT core, [`link`] is the
//! flow table, [`dhcp_client`] and [`dhcp_server`] implement the two DHCP roles, and
//! [`domain::Domain`] groups interfaces into routing zones with their rule trees.
//! [`router::run_interface`] is the event loop that drives one `Interface` forever.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod arena;
pub mod arp;
pub mod dhcp_client;
pub mod dhcp_server;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod forward;
pub mod interface;
pub mod link;
pub mod router;
pub mod rules;

#[cfg(test)]
mod testutil;

pub use domain::Domain;
pub use error::{Error, Outcome};
pub use interface::{Interface, InterfaceConfig};
pub use link::LinkTable;
pub use router::run_interface;
