use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::{DnsClass, DnsType};
use super::names::{decode_name, encode_name};
use crate::error::ProxyError;

/// Typed record data for the types this proxy interprets; everything
/// else round-trips as an opaque byte blob (spec §4.A: "must preserve
/// unknown record types when relaying upstream responses verbatim").
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(String),
    Cname(String),
    Ptr(String),
    Mx { preference: u16, exchange: String },
    Txt(Vec<String>),
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Unknown(Vec<u8>),
}

impl RData {
    /// Stringified form used for the log record's `answers` field
    /// (spec §3).
    pub fn to_display_string(&self) -> String {
        match self {
            RData::A(addr) => addr.to_string(),
            RData::Aaaa(addr) => addr.to_string(),
            RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) => name.clone(),
            RData::Mx {
                preference,
                exchange,
            } => format!("{preference} {exchange}"),
            RData::Txt(parts) => parts.join(" "),
            RData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{priority} {weight} {port} {target}"),
            RData::Unknown(bytes) => format!("\\# {} {}", bytes.len(), hex_encode(bytes)),
        }
    }

    pub fn as_ip(&self) -> Option<std::net::IpAddr> {
        match self {
            RData::A(addr) => Some((*addr).into()),
            RData::Aaaa(addr) => Some((*addr).into()),
            _ => None,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: DnsType,
    pub rclass: DnsClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new_a(name: String, ttl: u32, addr: Ipv4Addr) -> Self {
        ResourceRecord {
            name,
            rtype: DnsType::A,
            rclass: DnsClass::IN,
            ttl,
            rdata: RData::A(addr),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ProxyError> {
        encode_name(&self.name, out)?;
        out.extend_from_slice(&self.rtype.code().to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());

        let mut rdata_buf = Vec::new();
        write_rdata(&self.rdata, &mut rdata_buf)?;
        out.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata_buf);
        Ok(())
    }

    pub fn parse(buf: &[u8], pos: usize) -> Result<(Self, usize), ProxyError> {
        let (name, mut cursor) = decode_name(buf, pos)?;
        let rtype = DnsType::from(read_u16(buf, &mut cursor)?);
        let rclass = DnsClass::from(read_u16(buf, &mut cursor)?);
        let ttl = read_u32(buf, &mut cursor)?;
        let rdlength = read_u16(buf, &mut cursor)? as usize;
        let rdata_start = cursor;
        let rdata_end = rdata_start
            .checked_add(rdlength)
            .filter(|end| *end <= buf.len())
            .ok_or(ProxyError::MalformedQuery)?;

        let rdata = parse_rdata(buf, rtype, rdata_start, rdata_end)?;
        Ok((
            ResourceRecord {
                name,
                rtype,
                rclass,
                ttl,
                rdata,
            },
            rdata_end,
        ))
    }
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, ProxyError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProxyError::MalformedQuery)?;
    *cursor += 2;
    Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, ProxyError> {
    let bytes = buf
        .get(*cursor..*cursor + 4)
        .ok_or(ProxyError::MalformedQuery)?;
    *cursor += 4;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

fn parse_rdata(buf: &[u8], rtype: DnsType, start: usize, end: usize) -> Result<RData, ProxyError> {
    let raw = buf.get(start..end).ok_or(ProxyError::MalformedQuery)?;
    match rtype {
        DnsType::A => {
            if raw.len() != 4 {
                return Err(ProxyError::MalformedQuery);
            }
            Ok(RData::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])))
        }
        DnsType::AAAA => {
            let octets: [u8; 16] = raw.try_into().map_err(|_| ProxyError::MalformedQuery)?;
            Ok(RData::Aaaa(Ipv6Addr::from(octets)))
        }
        DnsType::NS => Ok(RData::Ns(decode_name(buf, start)?.0)),
        DnsType::CNAME => Ok(RData::Cname(decode_name(buf, start)?.0)),
        DnsType::PTR => Ok(RData::Ptr(decode_name(buf, start)?.0)),
        DnsType::MX => {
            if raw.len() < 2 {
                return Err(ProxyError::MalformedQuery);
            }
            let preference = u16::from_be_bytes([raw[0], raw[1]]);
            let (exchange, _) = decode_name(buf, start + 2)?;
            Ok(RData::Mx {
                preference,
                exchange,
            })
        }
        DnsType::TXT => {
            let mut strings = Vec::new();
            let mut i = 0usize;
            while i < raw.len() {
                let len = raw[i] as usize;
                i += 1;
                let chunk = raw.get(i..i + len).ok_or(ProxyError::MalformedQuery)?;
                strings.push(String::from_utf8_lossy(chunk).to_string());
                i += len;
            }
            Ok(RData::Txt(strings))
        }
        DnsType::SOA => {
            let (mname, next) = decode_name(buf, start)?;
            let (rname, next) = decode_name(buf, next)?;
            let mut cursor = next;
            let serial = read_u32(buf, &mut cursor)?;
            let refresh = read_u32(buf, &mut cursor)?;
            let retry = read_u32(buf, &mut cursor)?;
            let expire = read_u32(buf, &mut cursor)?;
            let minimum = read_u32(buf, &mut cursor)?;
            Ok(RData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            })
        }
        DnsType::SRV => {
            if raw.len() < 6 {
                return Err(ProxyError::MalformedQuery);
            }
            let priority = u16::from_be_bytes([raw[0], raw[1]]);
            let weight = u16::from_be_bytes([raw[2], raw[3]]);
            let port = u16::from_be_bytes([raw[4], raw[5]]);
            let (target, _) = decode_name(buf, start + 6)?;
            Ok(RData::Srv {
                priority,
                weight,
                port,
                target,
            })
        }
        _ => Ok(RData::Unknown(raw.to_vec())),
    }
}

fn write_rdata(rdata: &RData, out: &mut Vec<u8>) -> Result<(), ProxyError> {
    match rdata {
        RData::A(addr) => out.extend_from_slice(&addr.octets()),
        RData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
        RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) => encode_name(name, out)?,
        RData::Mx {
            preference,
            exchange,
        } => {
            out.extend_from_slice(&preference.to_be_bytes());
            encode_name(exchange, out)?;
        }
        RData::Txt(strings) => {
            for s in strings {
                let bytes = s.as_bytes();
                let len = bytes.len().min(255);
                out.push(len as u8);
                out.extend_from_slice(&bytes[..len]);
            }
        }
        RData::Soa {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            encode_name(mname, out)?;
            encode_name(rname, out)?;
            out.extend_from_slice(&serial.to_be_bytes());
            out.extend_from_slice(&refresh.to_be_bytes());
            out.extend_from_slice(&retry.to_be_bytes());
            out.extend_from_slice(&expire.to_be_bytes());
            out.extend_from_slice(&minimum.to_be_bytes());
        }
        RData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            out.extend_from_slice(&priority.to_be_bytes());
            out.extend_from_slice(&weight.to_be_bytes());
            out.extend_from_slice(&port.to_be_bytes());
            encode_name(target, out)?;
        }
        RData::Unknown(bytes) => out.extend_from_slice(bytes),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let rr = ResourceRecord::new_a("example.com.".into(), 300, Ipv4Addr::new(9, 9, 9, 9));
        let mut buf = Vec::new();
        rr.write(&mut buf).unwrap();
        let (parsed, end) = ResourceRecord::parse(&buf, 0).unwrap();
        assert_eq!(end, buf.len());
        assert_eq!(parsed, rr);
    }

    #[test]
    fn unknown_type_round_trips_opaque_bytes() {
        let rr = ResourceRecord {
            name: "weird.example.".into(),
            rtype: DnsType::Unknown(65280),
            rclass: DnsClass::IN,
            ttl: 60,
            rdata: RData::Unknown(vec![1, 2, 3, 4, 5]),
        };
        let mut buf = Vec::new();
        rr.write(&mut buf).unwrap();
        let (parsed, _) = ResourceRecord::parse(&buf, 0).unwrap();
        assert_eq!(parsed.rdata, RData::Unknown(vec![1, 2, 3, 4, 5]));
    }
}
