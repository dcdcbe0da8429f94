use core::net::Ipv4Addr;

use log::trace;

use super::bytes::{BytesIn, BytesOut};

use super::{checksum_accumulate, checksum_finish, Error};

#[allow(clippy::type_complexity)]
pub fn decode(
    packet: &[u8],
    filter_src: Ipv4Addr,
    filter_dst: Ipv4Addr,
    filter_proto: Option<u8>,
) -> Result<Option<(Ipv4Addr, Ipv4Addr, u8, &[u8])>, Error> {
    let data = Ipv4PacketHeader::decode_with_payload(packet, filter_src, filter_dst, filter_proto)?
        .map(|(hdr, payload)| (hdr.src, hdr.dst, hdr.p, payload));

    Ok(data)
}

pub fn encode<F>(
    buf: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    let mut hdr = Ipv4PacketHeader::new(src, dst, proto);

    hdr.encode_with_payload(buf, encoder)
}

/// Represents a parsed IP header
#[derive(Clone, Debug)]
pub struct Ipv4PacketHeader {
    /// Version
    pub version: u8,
    /// Header length
    pub hlen: u8,
    /// Type of service
    pub tos: u8,
    /// Total length
    pub len: u16,
    /// Identification
    pub id: u16,
    /// Fragment offset field
    pub off: u16,
    /// Time to live
    pub ttl: u8,
    /// Protocol
    pub p: u8,
    /// Checksum
    pub sum: u16,
    /// Source address
    pub src: Ipv4Addr,
    /// Dest address
    pub dst: Ipv4Addr,
}

impl Ipv4PacketHeader {
    pub const MIN_SIZE: usize = 20;
    pub const CHECKSUM_WORD: usize = 5;

    pub const IP_DF: u16 = 0x4000; // Don't fragment flag
    pub const IP_MF: u16 = 0x2000; // More fragments flag

    /// Create a new header instance
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, proto: u8) -> Self {
        Self {
            version: 4,
            hlen: Self::MIN_SIZE as _,
            tos: 0,
            len: Self::MIN_SIZE as _,
            id: 0,
            off: 0,
            ttl: 64,
            p: proto,
            sum: 0,
            src,
            dst,
        }
    }

    /// Decodes the header from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        let vhl = bytes.byte()?;

        Ok(Self {
            version: vhl >> 4,
            hlen: (vhl & 0x0f) * 4,
            tos: bytes.byte()?,
            len: u16::from_be_bytes(bytes.arr()?),
            id: u16::from_be_bytes(bytes.arr()?),
            off: u16::from_be_bytes(bytes.arr()?),
            ttl: bytes.byte()?,
            p: bytes.byte()?,
            sum: u16::from_be_bytes(bytes.arr()?),
            src: u32::from_be_bytes(bytes.arr()?).into(),
            dst: u32::from_be_bytes(bytes.arr()?).into(),
        })
    }

    /// Encodes the header into the provided buf slice
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .byte((self.version << 4) | (self.hlen / 4 + (if self.hlen % 4 > 0 { 1 } else { 0 })))?
            .byte(self.tos)?
            .push(&u16::to_be_bytes(self.len))?
            .push(&u16::to_be_bytes(self.id))?
            .push(&u16::to_be_bytes(self.off))?
            .byte(self.ttl)?
            .byte(self.p)?
            .push(&u16::to_be_bytes(self.sum))?
            .push(&u32::to_be_bytes(self.src.into()))?
            .push(&u32::to_be_bytes(self.dst.into()))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// Encodes the header and the provided payload into the provided buf slice
    pub fn encode_with_payload<'o, F>(
        &mut self,
        buf: &'o mut [u8],
        encoder: F,
    ) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        let hdr_len = self.hlen as usize;
        if hdr_len < Self::MIN_SIZE || buf.len() < hdr_len {
            Err(Error::BufferOverflow)?;
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(hdr_len);

        let payload_len = encoder(payload_buf)?;

        let len = hdr_len + payload_len;
        self.len = len as _;

        let min_hdr_len = self.encode(hdr_buf)?.len();
        assert_eq!(min_hdr_len, Self::MIN_SIZE);

        hdr_buf[Self::MIN_SIZE..hdr_len].fill(0);

        let checksum = Self::checksum(hdr_buf);
        self.sum = checksum;

        Self::inject_checksum(hdr_buf, checksum);

        Ok(&buf[..len])
    }

    /// Decodes the provided packet into a header and a payload slice
    pub fn decode_with_payload(
        packet: &[u8],
        filter_src: Ipv4Addr,
        filter_dst: Ipv4Addr,
        filter_proto: Option<u8>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        let hdr = Self::decode(packet)?;
        if hdr.version == 4 {
            // IPv4

            if !filter_src.is_unspecified() && !hdr.src.is_broadcast() && filter_src != hdr.src {
                return Ok(None);
            }

            if !filter_dst.is_unspecified() && !hdr.dst.is_broadcast() && filter_dst != hdr.dst {
                return Ok(None);
            }

            if let Some(filter_proto) = filter_proto {
                if filter_proto != hdr.p {
                    return Ok(None);
                }
            }

            let len = hdr.len as usize;
            if packet.len() < len {
                Err(Error::DataUnderflow)?;
            }

            let checksum = Self::checksum(&packet[..len]);

            trace!("IP header decoded, total_size={}, src={}, dst={}, hlen={}, size={}, checksum={}, ours={}", packet.len(), hdr.src, hdr.dst, hdr.hlen, hdr.len, hdr.sum, checksum);

            if checksum != hdr.sum {
                Err(Error::InvalidChecksum)?;
            }

            let packet = &packet[..len];
            let hdr_len = hdr.hlen as usize;
            if packet.len() < hdr_len {
                Err(Error::DataUnderflow)?;
            }

            Ok(Some((hdr, &packet[hdr_len..])))
        } else {
            Err(Error::InvalidFormat)
        }
    }

    /// Injects the checksum into the provided packet
    pub fn inject_checksum(packet: &mut [u8], checksum: u16) {
        let checksum = checksum.to_be_bytes();

        let offset = Self::CHECKSUM_WORD << 1;
        packet[offset] = checksum[0];
        packet[offset + 1] = checksum[1];
    }

    /// Computes the checksum for an already encoded packet
    pub fn checksum(packet: &[u8]) -> u16 {
        let hlen = (packet[0] & 0x0f) as usize * 4;

        let sum = checksum_accumulate(&packet[..hlen], Self::CHECKSUM_WORD);

        checksum_finish(sum)
    }

    const SRC_OFFSET: usize = 12;
    const DST_OFFSET: usize = 16;
    const TTL_OFFSET: usize = 8;

    /// Rewrites the source address of an already encoded packet in place and recomputes the
    /// header checksum. Used by the NAT path to substitute the domain-external address for the
    /// link's original one (or vice versa on the reply path).
    pub fn patch_src(packet: &mut [u8], src: Ipv4Addr) -> Result<(), Error> {
        Self::patch_addr(packet, Self::SRC_OFFSET, src)
    }

    /// Rewrites the destination address of an already encoded packet in place and recomputes the
    /// header checksum.
    pub fn patch_dst(packet: &mut [u8], dst: Ipv4Addr) -> Result<(), Error> {
        Self::patch_addr(packet, Self::DST_OFFSET, dst)
    }

    fn patch_addr(packet: &mut [u8], offset: usize, addr: Ipv4Addr) -> Result<(), Error> {
        if packet.len() < offset + 4 {
            Err(Error::DataUnderflow)?;
        }

        packet[offset..offset + 4].copy_from_slice(&addr.octets());

        let checksum = Self::checksum(packet);
        Self::inject_checksum(packet, checksum);

        Ok(())
    }

    /// Decrements the TTL of an already encoded packet in place and recomputes the header
    /// checksum, returning the new TTL. Returns `Error::InvalidFormat` if the TTL is already zero
    /// (the caller must drop the packet rather than forward it with a wrapped-around TTL).
    pub fn decrement_ttl(packet: &mut [u8]) -> Result<u8, Error> {
        if packet.len() < Self::TTL_OFFSET + 1 {
            Err(Error::DataUnderflow)?;
        }

        let ttl = packet[Self::TTL_OFFSET];
        if ttl == 0 {
            Err(Error::InvalidFormat)?;
        }

        let ttl = ttl - 1;
        packet[Self::TTL_OFFSET] = ttl;

        let checksum = Self::checksum(packet);
        Self::inject_checksum(packet, checksum);

        trace!("IP header patched, ttl={}, checksum={}", ttl, checksum);

        Ok(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_udp_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        let len = encode(&mut buf, src, dst, 17, |out| {
            out[..payload.len()].copy_from_slice(payload);
            Ok(payload.len())
        })
        .unwrap()
        .len();
        buf.truncate(len);
        buf
    }

    #[test]
    fn decode_accepts_a_freshly_encoded_packet() {
        let packet = encode_udp_packet(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), b"hi");

        let (src, dst, proto, payload) =
            decode(&packet, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None)
                .unwrap()
                .unwrap();

        assert_eq!(src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(proto, 17);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn decode_rejects_a_corrupted_checksum() {
        let mut packet = encode_udp_packet(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), b"hi");
        packet[10] ^= 0xff;

        assert!(matches!(
            decode(&packet, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None),
            Err(Error::InvalidChecksum)
        ));
    }

    #[test]
    fn patch_src_rewrites_address_and_keeps_checksum_valid() {
        let mut packet = encode_udp_packet(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), b"hi");

        Ipv4PacketHeader::patch_src(&mut packet, Ipv4Addr::new(192, 168, 1, 1)).unwrap();

        let (src, ..) = decode(&packet, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None)
            .unwrap()
            .unwrap();
        assert_eq!(src, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn decrement_ttl_errors_instead_of_wrapping_when_already_zero() {
        let mut packet = encode_udp_packet(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), b"hi");
        packet[Ipv4PacketHeader::TTL_OFFSET] = 0;

        assert!(matches!(
            Ipv4PacketHeader::decrement_ttl(&mut packet),
            Err(Error::InvalidFormat)
        ));
    }

    #[test]
    fn decrement_ttl_decrements_and_keeps_checksum_valid() {
        let mut packet = encode_udp_packet(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), b"hi");

        let new_ttl = Ipv4PacketHeader::decrement_ttl(&mut packet).unwrap();
        assert_eq!(new_ttl, 63);

        assert!(decode(&packet, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None).is_ok());
    }
}
