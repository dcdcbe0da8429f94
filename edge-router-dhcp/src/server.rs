use core::net::Ipv4Addr;

use log::info;

use crate::{DhcpOption, MessageType, Packet};

/// A DHCPREQUEST/DHCPDISCOVER/DHCPRELEASE/DHCPDECLINE classified against this server's identity,
/// carrying just enough to drive the pool/lease algorithm - which lives in `edge-router-core`
/// alongside the `dhcp_allocations` table it reads and writes.
#[derive(Clone, Debug)]
pub enum Action<'a> {
    Discover(Option<Ipv4Addr>, &'a [u8; 16]),
    Request(Ipv4Addr, &'a [u8; 16]),
    Release(Ipv4Addr, &'a [u8; 16]),
    Decline(Ipv4Addr, &'a [u8; 16]),
}

/// Static, per-domain DHCP server configuration: pool bounds, lease length and the options
/// handed out alongside an offer/ack.
pub struct ServerOptions<'a> {
    pub ip: Ipv4Addr,
    pub gateways: &'a [Ipv4Addr],
    pub subnet: Option<Ipv4Addr>,
    pub dns: &'a [Ipv4Addr],
    pub lease_duration_secs: u32,
}

impl<'a> ServerOptions<'a> {
    /// Classifies an incoming request, rejecting it outright (returning `None`) if it isn't a
    /// DHCP message, has no message type, or is addressed to a different server.
    pub fn process<'o>(&self, request: &'o Packet<'o>) -> Option<Action<'o>> {
        if request.reply {
            return None;
        }

        let message_type = request.message_type();

        let message_type = if let Some(message_type) = message_type {
            message_type
        } else {
            info!("Ignoring DHCP request, no message type found: {request:?}");
            return None;
        };

        let server_identifier = request.options.iter().find_map(|option| {
            if let DhcpOption::ServerIdentifier(ip) = option {
                Some(ip)
            } else {
                None
            }
        });

        if !(server_identifier == Some(self.ip)
            || server_identifier.is_none() && matches!(message_type, MessageType::Discover))
        {
            info!("Ignoring {message_type:?} request, not addressed to this server: {request:?}");
            return None;
        }

        info!("Received {message_type:?} request: {request:?}");

        match message_type {
            MessageType::Discover => {
                let requested_ip = request.options.iter().find_map(|option| {
                    if let DhcpOption::RequestedIpAddress(ip) = option {
                        Some(ip)
                    } else {
                        None
                    }
                });

                Some(Action::Discover(requested_ip, &request.chaddr))
            }
            MessageType::Request => {
                let ip = request
                    .options
                    .iter()
                    .find_map(|option| {
                        if let DhcpOption::RequestedIpAddress(ip) = option {
                            Some(ip)
                        } else {
                            None
                        }
                    })
                    .unwrap_or(request.ciaddr);

                Some(Action::Request(ip, &request.chaddr))
            }
            MessageType::Release => Some(Action::Release(request.yiaddr, &request.chaddr)),
            MessageType::Decline => Some(Action::Decline(request.yiaddr, &request.chaddr)),
            _ => None,
        }
    }

    pub fn offer(
        &self,
        request: &Packet,
        yiaddr: Ipv4Addr,
        opt_buf: &'a mut [DhcpOption<'a>],
    ) -> Packet<'a> {
        self.reply(request, MessageType::Offer, Some(yiaddr), opt_buf)
    }

    /// `ip = None` produces a DHCPNAK; `Some` produces a DHCPACK for that address.
    pub fn ack_nak(
        &self,
        request: &Packet,
        ip: Option<Ipv4Addr>,
        opt_buf: &'a mut [DhcpOption<'a>],
    ) -> Packet<'a> {
        if let Some(ip) = ip {
            self.reply(request, MessageType::Ack, Some(ip), opt_buf)
        } else {
            self.reply(request, MessageType::Nak, None, opt_buf)
        }
    }

    fn reply(
        &self,
        request: &Packet,
        message_type: MessageType,
        ip: Option<Ipv4Addr>,
        buf: &'a mut [DhcpOption<'a>],
    ) -> Packet<'a> {
        let reply = request.new_reply(
            ip,
            request.options.reply(
                message_type,
                self.ip,
                self.lease_duration_secs,
                self.gateways,
                self.subnet,
                self.dns,
                buf,
            ),
        );

        info!("Sending {message_type:?} reply: {reply:?}");

        reply
    }
}
