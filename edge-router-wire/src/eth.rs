use log::trace;

use super::bytes::{BytesIn, BytesOut};

use super::Error;

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;

pub type MacAddr = [u8; 6];

pub const BROADCAST: MacAddr = [0xff; 6];

#[allow(clippy::type_complexity)]
pub fn decode(
    frame: &[u8],
    filter_dst: Option<MacAddr>,
) -> Result<Option<(MacAddr, MacAddr, u16, &[u8])>, Error> {
    let data = EthPacketHeader::decode_with_payload(frame, filter_dst)?
        .map(|(hdr, payload)| (hdr.src, hdr.dst, hdr.ethertype, payload));

    Ok(data)
}

pub fn encode<F>(
    buf: &mut [u8],
    src: MacAddr,
    dst: MacAddr,
    ethertype: u16,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    let hdr = EthPacketHeader::new(src, dst, ethertype);

    hdr.encode_with_payload(buf, encoder)
}

/// Represents a parsed Ethernet II header.
#[derive(Clone, Debug)]
pub struct EthPacketHeader {
    /// Destination MAC address
    pub dst: MacAddr,
    /// Source MAC address
    pub src: MacAddr,
    /// EtherType
    pub ethertype: u16,
}

impl EthPacketHeader {
    pub const SIZE: usize = 14;

    /// Create a new header instance
    pub fn new(src: MacAddr, dst: MacAddr, ethertype: u16) -> Self {
        Self { dst, src, ethertype }
    }

    /// Decodes the header from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        Ok(Self {
            dst: bytes.arr()?,
            src: bytes.arr()?,
            ethertype: u16::from_be_bytes(bytes.arr()?),
        })
    }

    /// Encodes the header into the provided buf slice
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .push(&self.dst)?
            .push(&self.src)?
            .push(&u16::to_be_bytes(self.ethertype))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// Encodes the header and the provided payload into the provided buf slice
    pub fn encode_with_payload<'o, F>(&self, buf: &'o mut [u8], encoder: F) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        if buf.len() < Self::SIZE {
            Err(Error::BufferOverflow)?;
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(Self::SIZE);

        let payload_len = encoder(payload_buf)?;

        let hdr_len = self.encode(hdr_buf)?.len();
        assert_eq!(Self::SIZE, hdr_len);

        Ok(&buf[..Self::SIZE + payload_len])
    }

    /// Decodes the provided frame into a header and a payload slice, optionally filtering on the
    /// destination MAC (own address or broadcast).
    pub fn decode_with_payload(
        frame: &[u8],
        filter_dst: Option<MacAddr>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        if frame.len() < Self::SIZE {
            Err(Error::DataUnderflow)?;
        }

        let hdr = Self::decode(frame)?;

        if let Some(filter_dst) = filter_dst {
            if hdr.dst != filter_dst && hdr.dst != BROADCAST {
                return Ok(None);
            }
        }

        trace!(
            "Eth header decoded, src={:02x?}, dst={:02x?}, ethertype=0x{:04x}",
            hdr.src,
            hdr.dst,
            hdr.ethertype
        );

        Ok(Some((hdr, &frame[Self::SIZE..])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_frame_addressed_to_a_different_unicast_mac() {
        let mut buf = [0u8; EthPacketHeader::SIZE];
        let hdr = EthPacketHeader::new([1; 6], [2; 6], ETH_TYPE_IPV4);
        hdr.encode(&mut buf).unwrap();

        let decoded = EthPacketHeader::decode_with_payload(&buf, Some([3; 6])).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn decode_accepts_frame_addressed_to_broadcast_regardless_of_filter() {
        let mut buf = [0u8; EthPacketHeader::SIZE];
        let hdr = EthPacketHeader::new([1; 6], BROADCAST, ETH_TYPE_ARP);
        hdr.encode(&mut buf).unwrap();

        let (decoded, _) = EthPacketHeader::decode_with_payload(&buf, Some([3; 6]))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.src, [1; 6]);
        assert_eq!(decoded.ethertype, ETH_TYPE_ARP);
    }

    #[test]
    fn decode_too_short_is_an_error_not_a_panic() {
        let buf = [0u8; EthPacketHeader::SIZE - 1];
        assert!(matches!(
            EthPacketHeader::decode_with_payload(&buf, None),
            Err(Error::DataUnderflow)
        ));
    }
}
