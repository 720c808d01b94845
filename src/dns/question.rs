use super::enums::{DnsClass, DnsType};
use super::names::{decode_name, encode_name};
use crate::error::ProxyError;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: DnsType,
    pub qclass: DnsClass,
}

impl DnsQuestion {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ProxyError> {
        encode_name(&self.name, out)?;
        out.extend_from_slice(&self.qtype.code().to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        Ok(())
    }

    pub fn parse(buf: &[u8], pos: usize) -> Result<(Self, usize), ProxyError> {
        let (name, mut cursor) = decode_name(buf, pos)?;
        let qtype = u16::from_be_bytes(
            buf.get(cursor..cursor + 2)
                .ok_or(ProxyError::MalformedQuery)?
                .try_into()
                .unwrap(),
        );
        cursor += 2;
        let qclass = u16::from_be_bytes(
            buf.get(cursor..cursor + 2)
                .ok_or(ProxyError::MalformedQuery)?
                .try_into()
                .unwrap(),
        );
        cursor += 2;
        Ok((
            DnsQuestion {
                name,
                qtype: DnsType::from(qtype),
                qclass: DnsClass::from(qclass),
            },
            cursor,
        ))
    }
}
