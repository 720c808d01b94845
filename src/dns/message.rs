use std::net::IpAddr;

use super::enums::{DnsClass, DnsType, RCode};
use super::header::DnsHeader;
use super::question::DnsQuestion;
use super::resource_record::ResourceRecord;
use crate::error::ProxyError;

/// A parsed DNS message: header plus the four record sections (spec
/// §3 "Response", §4.A).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Parse a DNS message from wire bytes (spec §4.A `parse`).
    pub fn parse(buf: &[u8]) -> Result<Self, ProxyError> {
        let (header, mut cursor) = DnsHeader::parse(buf).ok_or(ProxyError::MalformedQuery)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) = DnsQuestion::parse(buf, cursor)?;
            questions.push(question);
            cursor = next;
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            let (rr, next) = ResourceRecord::parse(buf, cursor)?;
            answers.push(rr);
            cursor = next;
        }

        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            let (rr, next) = ResourceRecord::parse(buf, cursor)?;
            authorities.push(rr);
            cursor = next;
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            let (rr, next) = ResourceRecord::parse(buf, cursor)?;
            additional.push(rr);
            cursor = next;
        }

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additional,
        })
    }

    /// Serialize back to wire bytes (spec §4.A `serialize`), recomputing
    /// the section counts from the actual vectors so the header is
    /// never allowed to drift from the records it claims to carry.
    pub fn serialize(&self) -> Result<Vec<u8>, ProxyError> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additional.len() as u16;

        let mut out = Vec::new();
        header.write(&mut out);
        for q in &self.questions {
            q.write(&mut out)?;
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additional)
        {
            rr.write(&mut out)?;
        }
        Ok(out)
    }

    /// First question, if any (spec §6: "only the first question is
    /// examined").
    pub fn first_question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// Stringified answer records for the log record's `answers` field
    /// (spec §4.A `extract_answers`).
    pub fn extract_answers(&self) -> Vec<String> {
        self.answers
            .iter()
            .map(|rr| format!("{} {} {}", rr.name, rr.rtype, rr.rdata.to_display_string()))
            .collect()
    }

    /// A/AAAA literals from the answer section only (spec §4.A
    /// `extract_ips`, "restricted to A/AAAA records").
    pub fn extract_ips(&self) -> Vec<IpAddr> {
        self.answers.iter().filter_map(|rr| rr.rdata.as_ip()).collect()
    }

    /// Minimum TTL across answer records, per spec §4.A ("TTL extraction
    /// for cache sizing uses the minimum TTL across answer records, 0
    /// means use the configured default"). Returns `None` when there are
    /// no answers to derive a TTL from.
    pub fn min_answer_ttl(&self) -> Option<u32> {
        self.answers.iter().map(|rr| rr.ttl).min()
    }

    /// Build a same-shaped response to `self`: same id, same question(s),
    /// `qr` set, `rd` echoed, `ra` set, given rcode and answers.
    pub fn respond(&self, rcode: RCode, answers: Vec<ResourceRecord>) -> Message {
        Message {
            header: DnsHeader {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                aa: false,
                tc: false,
                rd: self.header.rd,
                ra: true,
                z: 0,
                rcode,
                qdcount: self.questions.len() as u16,
                ancount: answers.len() as u16,
                nscount: 0,
                arcount: 0,
            },
            questions: self.questions.clone(),
            answers,
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// An empty-answer error response carrying only the rcode (FORMERR,
    /// SERVFAIL) with the client's id preserved (spec P1).
    pub fn error_response(original_id: u16, rcode: RCode) -> Message {
        Message {
            header: DnsHeader {
                id: original_id,
                qr: true,
                opcode: 0,
                aa: false,
                tc: false,
                rd: false,
                ra: true,
                z: 0,
                rcode,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Rewrite this response's query id in place (spec §4.G step 4:
    /// "rewrite the cached response's query id to the incoming id").
    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

}

pub fn question_class_in() -> DnsClass {
    DnsClass::IN
}
