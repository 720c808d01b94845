use super::enums::RCode;

/// Fixed 12-byte DNS message header (RFC 1035 §4.1.1).
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: RCode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub const WIRE_LEN: usize = 12;

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());

        let mut flags: u16 = 0;
        flags |= (self.qr as u16) << 15;
        flags |= ((self.opcode & 0x0F) as u16) << 11;
        flags |= (self.aa as u16) << 10;
        flags |= (self.tc as u16) << 9;
        flags |= (self.rd as u16) << 8;
        flags |= (self.ra as u16) << 7;
        flags |= ((self.z & 0x07) as u16) << 4;
        flags |= (self.rcode.code() & 0x0F) as u16;
        out.extend_from_slice(&flags.to_be_bytes());

        out.extend_from_slice(&self.qdcount.to_be_bytes());
        out.extend_from_slice(&self.ancount.to_be_bytes());
        out.extend_from_slice(&self.nscount.to_be_bytes());
        out.extend_from_slice(&self.arcount.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        let id = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let header = DnsHeader {
            id,
            qr: (flags >> 15) & 1 == 1,
            opcode: ((flags >> 11) & 0x0F) as u8,
            aa: (flags >> 10) & 1 == 1,
            tc: (flags >> 9) & 1 == 1,
            rd: (flags >> 8) & 1 == 1,
            ra: (flags >> 7) & 1 == 1,
            z: ((flags >> 4) & 0x07) as u8,
            rcode: RCode::from((flags & 0x0F) as u8),
            qdcount: u16::from_be_bytes([buf[4], buf[5]]),
            ancount: u16::from_be_bytes([buf[6], buf[7]]),
            nscount: u16::from_be_bytes([buf[8], buf[9]]),
            arcount: u16::from_be_bytes([buf[10], buf[11]]),
        };
        Some((header, Self::WIRE_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flags() {
        let header = DnsHeader {
            id: 0xBEEF,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode: RCode::NxDomain,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 1,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        let (parsed, len) = DnsHeader::parse(&bytes).unwrap();
        assert_eq!(len, 12);
        assert_eq!(parsed, header);
    }
}
