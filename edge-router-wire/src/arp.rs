use core::net::Ipv4Addr;

use log::trace;

use super::bytes::{BytesIn, BytesOut};

use super::eth::MacAddr;
use super::Error;

pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;

pub const HLEN_ETHERNET: u8 = 6;
pub const PLEN_IPV4: u8 = 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Operation {
    Request = 1,
    Reply = 2,
}

impl Operation {
    fn from_u16(value: u16) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Reply),
            _ => Err(Error::InvalidFormat),
        }
    }
}

/// A parsed ARP packet (RFC 826), restricted to the Ethernet/IPv4 combination this router deals
/// with - `htype`/`ptype`/`hlen`/`plen` are validated on decode rather than carried as
/// general fields.
#[derive(Clone, Debug)]
pub struct ArpPacket {
    pub operation: Operation,
    /// Sender hardware address
    pub sha: MacAddr,
    /// Sender protocol address
    pub spa: Ipv4Addr,
    /// Target hardware address (ignored/zero on a request)
    pub tha: MacAddr,
    /// Target protocol address
    pub tpa: Ipv4Addr,
}

impl ArpPacket {
    pub const SIZE: usize = 28;

    pub fn new_request(sha: MacAddr, spa: Ipv4Addr, tpa: Ipv4Addr) -> Self {
        Self {
            operation: Operation::Request,
            sha,
            spa,
            tha: [0; 6],
            tpa,
        }
    }

    pub fn new_reply(sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> Self {
        Self {
            operation: Operation::Reply,
            sha,
            spa,
            tha,
            tpa,
        }
    }

    /// Decodes the packet from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < Self::SIZE {
            Err(Error::DataUnderflow)?;
        }

        let mut bytes = BytesIn::new(data);

        let htype = u16::from_be_bytes(bytes.arr()?);
        let ptype = u16::from_be_bytes(bytes.arr()?);
        let hlen = bytes.byte()?;
        let plen = bytes.byte()?;

        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != HLEN_ETHERNET || plen != PLEN_IPV4 {
            Err(Error::InvalidFormat)?;
        }

        let operation = Operation::from_u16(u16::from_be_bytes(bytes.arr()?))?;
        let sha: MacAddr = bytes.arr()?;
        let spa: Ipv4Addr = u32::from_be_bytes(bytes.arr()?).into();
        let tha: MacAddr = bytes.arr()?;
        let tpa: Ipv4Addr = u32::from_be_bytes(bytes.arr()?).into();

        trace!(
            "ARP packet decoded, op={:?}, sha={:02x?}, spa={}, tha={:02x?}, tpa={}",
            operation,
            sha,
            spa,
            tha,
            tpa
        );

        Ok(Self {
            operation,
            sha,
            spa,
            tha,
            tpa,
        })
    }

    /// Encodes the packet into the provided buf slice
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .push(&u16::to_be_bytes(HTYPE_ETHERNET))?
            .push(&u16::to_be_bytes(PTYPE_IPV4))?
            .byte(HLEN_ETHERNET)?
            .byte(PLEN_IPV4)?
            .push(&u16::to_be_bytes(self.operation as u16))?
            .push(&self.sha)?
            .push(&u32::to_be_bytes(self.spa.into()))?
            .push(&self.tha)?
            .push(&u32::to_be_bytes(self.tpa.into()))?;

        let len = bytes.len();
        assert_eq!(len, Self::SIZE);

        Ok(&buf[..len])
    }

    /// True if this packet is a request asking for `our_ip`'s hardware address.
    pub fn is_request_for(&self, our_ip: Ipv4Addr) -> bool {
        self.operation == Operation::Request && self.tpa == our_ip
    }

    /// True if this packet is a reply resolving `target_ip`.
    pub fn is_reply_for(&self, target_ip: Ipv4Addr) -> bool {
        self.operation == Operation::Reply && self.spa == target_ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_and_is_recognized_as_a_request_for_its_target() {
        let request = ArpPacket::new_request([1; 6], Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));

        let mut buf = [0u8; ArpPacket::SIZE];
        request.encode(&mut buf).unwrap();

        let decoded = ArpPacket::decode(&buf).unwrap();
        assert_eq!(decoded.operation, Operation::Request);
        assert!(decoded.is_request_for(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!decoded.is_request_for(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn reply_roundtrips_and_is_recognized_as_resolving_its_sender() {
        let reply = ArpPacket::new_reply(
            [1; 6],
            Ipv4Addr::new(10, 0, 0, 1),
            [2; 6],
            Ipv4Addr::new(10, 0, 0, 2),
        );

        let mut buf = [0u8; ArpPacket::SIZE];
        reply.encode(&mut buf).unwrap();

        let decoded = ArpPacket::decode(&buf).unwrap();
        assert!(decoded.is_reply_for(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(decoded.sha, [1; 6]);
    }

    #[test]
    fn decode_rejects_a_non_ethernet_ipv4_htype_ptype_combination() {
        let mut buf = [0u8; ArpPacket::SIZE];
        ArpPacket::new_request([1; 6], Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
            .encode(&mut buf)
            .unwrap();

        buf[0..2].copy_from_slice(&u16::to_be_bytes(6)); // corrupt htype

        assert!(matches!(ArpPacket::decode(&buf), Err(Error::InvalidFormat)));
    }
}
