use core::net::Ipv4Addr;

use log::trace;

use rand_core::RngCore;

use crate::{Error, MessageType, Options, Packet};

/// Builds and parses the BOOTP/DHCP messages a DHCP client FSM sends and receives.
///
/// Unaware of IP/UDP transport: it operates purely on byte slices, optionally wrapping them in
/// an IPv4/UDP header (`rp_udp_client_port`/`rp_udp_server_port`) for use over a raw socket -
/// which in practice is mandatory, since most of a DHCP exchange happens before the client has
/// an address a bound UDP socket could use.
pub struct Client<T> {
    pub rng: T,
    pub mac: [u8; 6],
    pub rp_udp_client_port: Option<u16>,
    pub rp_udp_server_port: Option<u16>,
}

impl<T> Client<T>
where
    T: RngCore,
{
    pub fn encode_discover<'o>(
        &mut self,
        buf: &'o mut [u8],
        secs: u16,
        requested_ip: Option<Ipv4Addr>,
    ) -> Result<(&'o [u8], u32), Error> {
        let mut opt_buf = Options::buf();

        self.encode_bootp_request(
            buf,
            secs,
            None,
            None,
            Options::discover(requested_ip, &mut opt_buf),
        )
    }

    pub fn encode_request<'o>(
        &mut self,
        buf: &'o mut [u8],
        secs: u16,
        server_ip: Ipv4Addr,
        our_ip: Ipv4Addr,
    ) -> Result<(&'o [u8], u32), Error> {
        let mut opt_buf = Options::buf();

        self.encode_bootp_request(
            buf,
            secs,
            Some(server_ip),
            None,
            Options::request(our_ip, &mut opt_buf),
        )
    }

    pub fn encode_release<'o>(
        &mut self,
        buf: &'o mut [u8],
        secs: u16,
        server_ip: Ipv4Addr,
        our_ip: Ipv4Addr,
    ) -> Result<&'o [u8], Error> {
        let mut opt_buf = Options::buf();

        self.encode_bootp_request(
            buf,
            secs,
            Some(server_ip),
            Some(our_ip),
            Options::release(&mut opt_buf),
        )
        .map(|r| r.0)
    }

    pub fn encode_decline<'o>(
        &mut self,
        buf: &'o mut [u8],
        secs: u16,
        server_ip: Ipv4Addr,
        our_ip: Ipv4Addr,
    ) -> Result<&'o [u8], Error> {
        let mut opt_buf = Options::buf();

        self.encode_bootp_request(
            buf,
            secs,
            Some(server_ip),
            Some(our_ip),
            Options::decline(&mut opt_buf),
        )
        .map(|r| r.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_bootp_request<'o>(
        &mut self,
        buf: &'o mut [u8],
        secs: u16,
        server_ip: Option<Ipv4Addr>,
        our_ip: Option<Ipv4Addr>,
        options: Options<'_>,
    ) -> Result<(&'o [u8], u32), Error> {
        let xid = self.rng.next_u32();

        let request = Packet::new_request(self.mac, xid, secs, our_ip, options.clone());

        let data = if self.rp_udp_server_port.is_some() || self.rp_udp_client_port.is_some() {
            request.encode_raw(
                our_ip,
                self.rp_udp_client_port.unwrap_or(68),
                server_ip,
                self.rp_udp_server_port.unwrap_or(67),
                buf,
            )?
        } else {
            request.encode(buf)?
        };

        Ok((data, xid))
    }

    pub fn decode_bootp_reply<'o>(
        &self,
        data: &'o [u8],
        xid: u32,
        expected_message_types: Option<&[MessageType]>,
    ) -> Result<Option<Packet<'o>>, Error> {
        let reply = if self.rp_udp_server_port.is_some() || self.rp_udp_client_port.is_some() {
            Packet::decode_raw(data, self.rp_udp_server_port, self.rp_udp_client_port)?
                .map(|r| r.2)
        } else {
            Some(Packet::decode(data)?)
        };

        trace!("DHCP packet decoded: {reply:?}");

        Ok(reply.and_then(|reply| {
            if reply.is_for_us(&self.mac, xid) {
                if let Some(expected_message_types) = expected_message_types {
                    let mt = reply.message_type()?;

                    if expected_message_types.iter().any(|emt| mt == *emt) {
                        return Some(reply);
                    }
                } else {
                    return Some(reply);
                }
            }

            None
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DhcpOption;

    struct FixedRng(u32);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(1);
            self.0
        }

        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    #[test]
    fn encode_discover_returns_the_xid_it_stamped_into_the_packet() {
        let mut client = Client {
            rng: FixedRng(0),
            mac: MAC,
            rp_udp_client_port: None,
            rp_udp_server_port: None,
        };

        let mut buf = [0u8; 512];
        let (data, xid) = client.encode_discover(&mut buf, 0, None).unwrap();

        let decoded = Packet::decode(data).unwrap();
        assert_eq!(decoded.xid, xid);
        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn decode_bootp_reply_rejects_a_reply_for_a_different_xid() {
        let client = Client {
            rng: FixedRng(0),
            mac: MAC,
            rp_udp_client_port: None,
            rp_udp_server_port: None,
        };

        let request = Packet::new_request(MAC, 5, 0, None, Options::new(&[]));
        let reply = request.new_reply(Some(Ipv4Addr::new(10, 0, 0, 5)), Options::new(&[]));

        let mut buf = [0u8; 512];
        let encoded = reply.encode(&mut buf).unwrap();
        let encoded_len = encoded.len();

        assert!(client
            .decode_bootp_reply(&buf[..encoded_len], 6, None)
            .unwrap()
            .is_none());
        assert!(client
            .decode_bootp_reply(&buf[..encoded_len], 5, None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn decode_bootp_reply_filters_on_expected_message_types() {
        let client = Client {
            rng: FixedRng(0),
            mac: MAC,
            rp_udp_client_port: None,
            rp_udp_server_port: None,
        };

        let request = Packet::new_request(MAC, 5, 0, None, Options::new(&[]));

        let mut mt_buf = [DhcpOption::Message(""); 1];
        mt_buf[0] = DhcpOption::MessageType(MessageType::Offer);
        let reply = request.new_reply(Some(Ipv4Addr::new(10, 0, 0, 5)), Options::new(&mt_buf));

        let mut buf = [0u8; 512];
        let encoded_len = reply.encode(&mut buf).unwrap().len();

        assert!(client
            .decode_bootp_reply(&buf[..encoded_len], 5, Some(&[MessageType::Ack]))
            .unwrap()
            .is_none());
        assert!(client
            .decode_bootp_reply(&buf[..encoded_len], 5, Some(&[MessageType::Offer]))
            .unwrap()
            .is_some());
    }
}
