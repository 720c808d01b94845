use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS resource record / question type (RFC 1035 §3.2.2 and extensions).
///
/// Unknown types are preserved numerically rather than rejected, so the
/// proxy can relay records it doesn't interpret verbatim.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    ANY,
    Unknown(u16),
}

impl DnsType {
    pub fn code(self) -> u16 {
        match self {
            DnsType::A => 1,
            DnsType::NS => 2,
            DnsType::CNAME => 5,
            DnsType::SOA => 6,
            DnsType::PTR => 12,
            DnsType::MX => 15,
            DnsType::TXT => 16,
            DnsType::AAAA => 28,
            DnsType::SRV => 33,
            DnsType::OPT => 41,
            DnsType::ANY => 255,
            DnsType::Unknown(code) => code,
        }
    }
}

impl From<u16> for DnsType {
    fn from(code: u16) -> Self {
        match code {
            1 => DnsType::A,
            2 => DnsType::NS,
            5 => DnsType::CNAME,
            6 => DnsType::SOA,
            12 => DnsType::PTR,
            15 => DnsType::MX,
            16 => DnsType::TXT,
            28 => DnsType::AAAA,
            33 => DnsType::SRV,
            41 => DnsType::OPT,
            255 => DnsType::ANY,
            other => DnsType::Unknown(other),
        }
    }
}

impl From<DnsType> for u16 {
    fn from(value: DnsType) -> Self {
        value.code()
    }
}

impl fmt::Display for DnsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsType::Unknown(code) => write!(f, "TYPE{code}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// DNS class (RFC 1035 §3.2.4). Only `IN` is meaningfully used on the
/// wire by modern resolvers; others round-trip via `Unknown`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsClass {
    IN,
    CH,
    ANY,
    Unknown(u16),
}

impl From<u16> for DnsClass {
    fn from(code: u16) -> Self {
        match code {
            1 => DnsClass::IN,
            3 => DnsClass::CH,
            255 => DnsClass::ANY,
            other => DnsClass::Unknown(other),
        }
    }
}

impl From<DnsClass> for u16 {
    fn from(value: DnsClass) -> Self {
        match value {
            DnsClass::IN => 1,
            DnsClass::CH => 3,
            DnsClass::ANY => 255,
            DnsClass::Unknown(code) => code,
        }
    }
}

/// 4-bit DNS response code (RFC 1035 §4.1.1), restricted to the
/// taxonomy this proxy ever produces or needs to interpret (spec
/// GLOSSARY: "Rcode").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RCode {
    #[default]
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Unknown(u8),
}

impl RCode {
    pub fn code(self) -> u8 {
        match self {
            RCode::NoError => 0,
            RCode::FormErr => 1,
            RCode::ServFail => 2,
            RCode::NxDomain => 3,
            RCode::NotImp => 4,
            RCode::Refused => 5,
            RCode::Unknown(code) => code,
        }
    }

    /// The spec's §4.C success predicate: "non-nil response AND
    /// rcode in {NOERROR, NXDOMAIN}".
    pub fn is_upstream_success(self) -> bool {
        matches!(self, RCode::NoError | RCode::NxDomain)
    }
}

impl From<u8> for RCode {
    fn from(code: u8) -> Self {
        match code {
            0 => RCode::NoError,
            1 => RCode::FormErr,
            2 => RCode::ServFail,
            3 => RCode::NxDomain,
            4 => RCode::NotImp,
            5 => RCode::Refused,
            other => RCode::Unknown(other),
        }
    }
}

impl From<RCode> for u8 {
    fn from(value: RCode) -> Self {
        value.code()
    }
}
