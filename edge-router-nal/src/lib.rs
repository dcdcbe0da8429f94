#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

//! The [`RawReceive`]/[`RawSend`] pair this crate exports is the `PacketPort` contract an
//! `edge-router-core` `Interface` is constructed against: the NIC-facing sink/source is supplied
//! by the embedder (a raw socket, a TAP device, an in-memory channel for tests), never
//! implemented here.

pub use raw::*;
pub use timeout::*;

mod raw;
mod timeout;
