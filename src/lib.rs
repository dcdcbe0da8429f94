#![cfg_attr(not(feature = "std"), no_std)]

pub use edge_router_core as router;
pub use edge_router_dhcp as dhcp;
pub use edge_router_nal as nal;
#[cfg(feature = "std")]
pub use edge_router_std as raw_std;
pub use edge_router_wire as wire;
