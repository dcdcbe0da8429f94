use log::trace;

use core::net::{Ipv4Addr, SocketAddrV4};

use super::bytes::{BytesIn, BytesOut};

use super::{checksum_accumulate, checksum_finish, Error};

#[allow(clippy::type_complexity)]
pub fn decode(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: &[u8],
    filter_src: Option<u16>,
    filter_dst: Option<u16>,
) -> Result<Option<(SocketAddrV4, SocketAddrV4, &[u8])>, Error> {
    let data = UdpPacketHeader::decode_with_payload(packet, src, dst, filter_src, filter_dst)?.map(
        |(hdr, payload)| {
            (
                SocketAddrV4::new(src, hdr.src),
                SocketAddrV4::new(dst, hdr.dst),
                payload,
            )
        },
    );

    Ok(data)
}

pub fn encode<F>(
    buf: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    payload: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    let mut hdr = UdpPacketHeader::new(src.port(), dst.port());

    hdr.encode_with_payload(buf, *src.ip(), *dst.ip(), |buf| payload(buf))
}

/// Represents a parsed UDP header
#[derive(Clone, Debug)]
pub struct UdpPacketHeader {
    /// Source port
    pub src: u16,
    /// Destination port
    pub dst: u16,
    /// UDP length
    pub len: u16,
    /// UDP checksum
    pub sum: u16,
}

impl UdpPacketHeader {
    pub const PROTO: u8 = 17;

    pub const SIZE: usize = 8;
    pub const CHECKSUM_WORD: usize = 3;

    /// Create a new header instance
    pub fn new(src: u16, dst: u16) -> Self {
        Self {
            src,
            dst,
            len: 0,
            sum: 0,
        }
    }

    /// Decodes the header from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        Ok(Self {
            src: u16::from_be_bytes(bytes.arr()?),
            dst: u16::from_be_bytes(bytes.arr()?),
            len: u16::from_be_bytes(bytes.arr()?),
            sum: u16::from_be_bytes(bytes.arr()?),
        })
    }

    /// Encodes the header into the provided buf slice
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .push(&u16::to_be_bytes(self.src))?
            .push(&u16::to_be_bytes(self.dst))?
            .push(&u16::to_be_bytes(self.len))?
            .push(&u16::to_be_bytes(self.sum))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// Encodes the header and the provided payload into the provided buf slice
    pub fn encode_with_payload<'o, F>(
        &mut self,
        buf: &'o mut [u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        encoder: F,
    ) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        if buf.len() < Self::SIZE {
            Err(Error::BufferOverflow)?;
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(Self::SIZE);

        let payload_len = encoder(payload_buf)?;

        let len = Self::SIZE + payload_len;
        self.len = len as _;

        let hdr_len = self.encode(hdr_buf)?.len();
        assert_eq!(Self::SIZE, hdr_len);

        let packet = &mut buf[..len];

        let checksum = Self::checksum(packet, src, dst);
        self.sum = checksum;

        Self::inject_checksum(packet, checksum);

        Ok(packet)
    }

    /// Decodes the provided packet into a header and a payload slice
    pub fn decode_with_payload(
        packet: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        filter_src: Option<u16>,
        filter_dst: Option<u16>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        let hdr = Self::decode(packet)?;

        if let Some(filter_src) = filter_src {
            if filter_src != hdr.src {
                return Ok(None);
            }
        }

        if let Some(filter_dst) = filter_dst {
            if filter_dst != hdr.dst {
                return Ok(None);
            }
        }

        let len = hdr.len as usize;
        if packet.len() < len {
            Err(Error::DataUnderflow)?;
        }

        let checksum = Self::checksum(&packet[..len], src, dst);

        trace!(
            "UDP header decoded, src={}, dst={}, size={}, checksum={}, ours={}",
            hdr.src,
            hdr.dst,
            hdr.len,
            hdr.sum,
            checksum
        );

        if checksum != hdr.sum {
            Err(Error::InvalidChecksum)?;
        }

        let packet = &packet[..len];

        let payload_data = &packet[Self::SIZE..];

        Ok(Some((hdr, payload_data)))
    }

    /// Injects the checksum into the provided packet
    pub fn inject_checksum(packet: &mut [u8], checksum: u16) {
        let checksum = checksum.to_be_bytes();

        let offset = Self::CHECKSUM_WORD << 1;
        packet[offset] = checksum[0];
        packet[offset + 1] = checksum[1];
    }

    /// Computes the checksum for an already encoded packet
    pub fn checksum(packet: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let mut buf = [0; 12];

        // Pseudo IP-header for UDP checksum calculation
        let len = BytesOut::new(&mut buf)
            .push(&u32::to_be_bytes(src.into()))
            .unwrap()
            .push(&u32::to_be_bytes(dst.into()))
            .unwrap()
            .byte(0)
            .unwrap()
            .byte(UdpPacketHeader::PROTO)
            .unwrap()
            .push(&u16::to_be_bytes(packet.len() as u16))
            .unwrap()
            .len();

        let sum = checksum_accumulate(&buf[..len], usize::MAX)
            + checksum_accumulate(packet, Self::CHECKSUM_WORD);

        checksum_finish(sum)
    }

    const SRC_PORT_OFFSET: usize = 0;
    const DST_PORT_OFFSET: usize = 2;

    /// Rewrites the source port of an already encoded UDP packet in place and recomputes the
    /// checksum against the (already patched) pseudo IP header. Used by the NAT path when
    /// substituting the allocated external port for the link's original one.
    pub fn patch_src_port(
        packet: &mut [u8],
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        Self::patch_port(packet, Self::SRC_PORT_OFFSET, port, src, dst)
    }

    /// Rewrites the destination port of an already encoded UDP packet in place and recomputes
    /// the checksum.
    pub fn patch_dst_port(
        packet: &mut [u8],
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        Self::patch_port(packet, Self::DST_PORT_OFFSET, port, src, dst)
    }

    fn patch_port(
        packet: &mut [u8],
        offset: usize,
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        if packet.len() < offset + 2 {
            Err(Error::DataUnderflow)?;
        }

        packet[offset..offset + 2].copy_from_slice(&port.to_be_bytes());

        let checksum = Self::checksum(packet, src, dst);
        Self::inject_checksum(packet, checksum);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
    const DST: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 53);

    fn encoded(payload: &[u8]) -> [u8; 64] {
        let mut buf = [0u8; 64];
        let len = encode(&mut buf, SRC, DST, |out| {
            out[..payload.len()].copy_from_slice(payload);
            Ok(payload.len())
        })
        .unwrap()
        .len();
        assert!(len <= buf.len());
        buf
    }

    #[test]
    fn decode_accepts_a_freshly_encoded_packet_and_recovers_the_payload() {
        let buf = encoded(b"hello");

        let (src, dst, payload) = decode(*SRC.ip(), *DST.ip(), &buf, None, None).unwrap().unwrap();
        assert_eq!(src, SRC);
        assert_eq!(dst, DST);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn decode_rejects_a_corrupted_checksum() {
        let mut buf = encoded(b"hello");
        buf[6] ^= 0xff;

        assert!(matches!(
            decode(*SRC.ip(), *DST.ip(), &buf, None, None),
            Err(Error::InvalidChecksum)
        ));
    }

    #[test]
    fn decode_filters_on_destination_port() {
        let buf = encoded(b"hello");

        assert!(decode(*SRC.ip(), *DST.ip(), &buf, None, Some(DST.port() + 1))
            .unwrap()
            .is_none());
        assert!(decode(*SRC.ip(), *DST.ip(), &buf, None, Some(DST.port()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn patch_dst_port_rewrites_the_port_and_keeps_the_checksum_valid() {
        let mut buf = encoded(b"hello");

        UdpPacketHeader::patch_dst_port(&mut buf[..UdpPacketHeader::SIZE + 5], 5353, *SRC.ip(), *DST.ip())
            .unwrap();

        let (_, dst, payload) = decode(*SRC.ip(), *DST.ip(), &buf, None, None).unwrap().unwrap();
        assert_eq!(dst.port(), 5353);
        assert_eq!(payload, b"hello");
    }
}
