//! Linux `AF_PACKET` raw socket implementation of the `edge-router-nal` `RawReceive`/`RawSend`
//! contract - the concrete NIC session an `edge-router-core` `Interface` is constructed against
//! when running as a normal user-space process rather than embedded.
//!
//! Everything in the original `edge-nal-std` that modeled a full host network stack (TCP/UDP
//! client and server sockets, DNS) is out of scope here: a NAT/router interface never originates
//! or terminates a TCP/UDP connection of its own, it only ever reads and writes whole Ethernet
//! frames on the wire, so only the raw-socket half survives the trip from that crate.

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use raw::*;

// TODO: Figure out if the RAW socket implementation can be used on any other OS.
// It seems, that would be difficult on Darwin; wondering about the other BSDs though?
#[cfg(any(target_os = "linux", target_os = "android"))]
mod raw {
    use core::ops::Deref;
    use core::pin::pin;

    use std::io::{self, ErrorKind};
    use std::os::fd::{AsFd, AsRawFd};

    use async_io::Async;

    use embedded_io_async::ErrorType;

    use edge_router_nal::{MacAddr, RawReceive, RawSend};

    use crate::sys;
    use crate::syscall_los;

    /// A Linux network interface, identified by its kernel interface index (`if_nametoindex`).
    #[derive(Default)]
    pub struct Interface(u32);

    impl Interface {
        pub const fn new(interface: u32) -> Self {
            Self(interface)
        }

        /// Opens an `AF_PACKET`/`SOCK_RAW` socket bound to this interface, carrying whole
        /// Ethernet frames (this router parses the Ethernet header itself rather than asking the
        /// kernel to strip it, so it can validate and - on NAT rewrite - patch the L2 addresses
        /// in place).
        pub fn bind(&self) -> io::Result<RawSocket> {
            let socket = syscall_los!(unsafe {
                sys::socket(
                    sys::PF_PACKET,
                    sys::SOCK_RAW,
                    (sys::ETH_P_ALL as u16).to_be() as _,
                )
            })?;

            let sockaddr = sys::sockaddr_ll {
                sll_family: sys::AF_PACKET as _,
                sll_protocol: (sys::ETH_P_ALL as u16).to_be() as _,
                sll_ifindex: self.0 as _,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: 0,
                sll_addr: Default::default(),
            };

            syscall_los!(unsafe {
                sys::bind(
                    socket,
                    &sockaddr as *const _ as *const _,
                    core::mem::size_of::<sys::sockaddr_ll>() as _,
                )
            })?;

            let socket = {
                use std::os::fd::FromRawFd;

                unsafe { std::net::UdpSocket::from_raw_fd(socket) }
            };

            socket.set_broadcast(true)?;

            Ok(RawSocket(Async::new(socket)?, self.0))
        }
    }

    /// An open `AF_PACKET` socket bound to one interface; carries whole Ethernet frames in both
    /// directions.
    pub struct RawSocket(Async<std::net::UdpSocket>, u32);

    impl RawSocket {
        pub const fn new(socket: Async<std::net::UdpSocket>, interface: u32) -> Self {
            Self(socket, interface)
        }

        pub fn release(self) -> (Async<std::net::UdpSocket>, u32) {
            (self.0, self.1)
        }
    }

    impl Deref for RawSocket {
        type Target = Async<std::net::UdpSocket>;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl ErrorType for &RawSocket {
        type Error = io::Error;
    }

    impl RawReceive for &RawSocket {
        async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, MacAddr), Self::Error> {
            let fut = pin!(self.0.read_with(|io| {
                let mut storage: sys::sockaddr_storage = unsafe { core::mem::zeroed() };
                let mut addrlen = core::mem::size_of_val(&storage) as sys::socklen_t;

                let ret = syscall_los!(unsafe {
                    sys::recvfrom(
                        io.as_fd().as_raw_fd(),
                        buffer.as_mut_ptr() as *mut _,
                        buffer.len(),
                        0,
                        &mut storage as *mut _ as *mut _,
                        &mut addrlen,
                    )
                })?;

                let sockaddr = as_sockaddr_ll(&storage, addrlen as usize)?;

                let mut mac = [0; 6];
                mac.copy_from_slice(&sockaddr.sll_addr[..6]);

                Ok((ret as usize, mac))
            }));

            fut.await
        }
    }

    impl RawSend for &RawSocket {
        async fn send(&mut self, mac: MacAddr, data: &[u8]) -> Result<(), Self::Error> {
            let mut sockaddr = sys::sockaddr_ll {
                sll_family: sys::AF_PACKET as _,
                sll_protocol: (sys::ETH_P_ALL as u16).to_be() as _,
                sll_ifindex: self.1 as _,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: 0,
                sll_addr: Default::default(),
            };

            sockaddr.sll_halen = mac.len() as _;
            sockaddr.sll_addr[..mac.len()].copy_from_slice(&mac);

            let fut = pin!(self.0.write_with(|io| {
                let len = core::cmp::min(data.len(), u16::MAX as usize);

                let ret = syscall_los!(unsafe {
                    sys::sendto(
                        io.as_fd().as_raw_fd(),
                        data.as_ptr() as *const _,
                        len,
                        sys::MSG_NOSIGNAL,
                        &sockaddr as *const _ as *const _,
                        core::mem::size_of::<sys::sockaddr_ll>() as _,
                    )
                })?;
                Ok(ret as usize)
            }));

            let len = fut.await?;

            assert_eq!(len, data.len());

            Ok(())
        }
    }

    impl ErrorType for RawSocket {
        type Error = io::Error;
    }

    impl RawReceive for RawSocket {
        async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, MacAddr), Self::Error> {
            let mut rself = &*self;

            let fut = pin!(rself.receive(buffer));

            fut.await
        }
    }

    impl RawSend for RawSocket {
        async fn send(&mut self, mac: MacAddr, data: &[u8]) -> Result<(), Self::Error> {
            let mut rself = &*self;

            let fut = pin!(rself.send(mac, data));

            fut.await
        }
    }

    fn as_sockaddr_ll(
        storage: &sys::sockaddr_storage,
        len: usize,
    ) -> io::Result<&sys::sockaddr_ll> {
        match storage.ss_family as core::ffi::c_int {
            sys::AF_PACKET => {
                assert!(len >= core::mem::size_of::<sys::sockaddr_ll>());
                Ok(unsafe { (storage as *const _ as *const sys::sockaddr_ll).as_ref() }.unwrap())
            }
            _ => Err(io::Error::new(ErrorKind::InvalidInput, "invalid argument")),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys {
    pub use libc::*;

    #[macro_export]
    macro_rules! syscall_los {
        ($ret:expr) => {{
            let result = $ret;

            if result == -1 {
                Err(::std::io::Error::last_os_error())
            } else {
                Ok(result)
            }
        }};
    }
}
