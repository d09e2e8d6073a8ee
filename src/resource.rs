use crate::name::Name;
use crate::types::{Class, Type};
use byteorder::{WriteBytesExt, BE};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A resource record as the engine sees it: owner name, class, TTL and typed
/// rdata. The rrtype is implied by the [`RData`] variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub name: Name,
    pub class: Class,

    /// Remaining time to live in seconds. Already aged by the assembler
    /// before a record is emitted.
    pub ttl: u32,

    pub rdata: RData,
}

impl Record {
    pub fn rrtype(&self) -> Type {
        self.rdata.rrtype()
    }
}

/// Typed rdata for the record types the proxy expects to relay.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),

    CNAME(Name),
    NS(Name),
    PTR(Name),

    /// One or more character strings, per [rfc1035] §3.3.14.
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    TXT(Vec<Vec<u8>>),

    MX(Mx),
    SOA(Soa),
    SRV(Srv),
}

impl RData {
    pub fn rrtype(&self) -> Type {
        // This should be kept in sync with Type.
        match self {
            RData::A(_) => Type::A,
            RData::AAAA(_) => Type::AAAA,
            RData::CNAME(_) => Type::CNAME,
            RData::NS(_) => Type::NS,
            RData::PTR(_) => Type::PTR,
            RData::TXT(_) => Type::TXT,
            RData::MX(_) => Type::MX,
            RData::SOA(_) => Type::SOA,
            RData::SRV(_) => Type::SRV,
        }
    }

    /// Appends the rdata bytes (without the rdlength prefix) to `buf`.
    ///
    /// Embedded names are written uncompressed, so the produced length is
    /// final and the caller can back-patch rdlength.
    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        match self {
            RData::A(ip) => buf.extend_from_slice(&ip.octets()),
            RData::AAAA(ip) => buf.extend_from_slice(&ip.octets()),

            RData::CNAME(name) | RData::NS(name) | RData::PTR(name) => {
                write_name(buf, name);
            }

            RData::TXT(txts) => {
                for txt in txts {
                    buf.push(txt.len() as u8);
                    buf.extend_from_slice(txt);
                }
            }

            RData::MX(mx) => {
                // The unwraps can't fail writing into a Vec.
                buf.write_u16::<BE>(mx.preference).unwrap();
                write_name(buf, &mx.exchange);
            }

            RData::SOA(soa) => {
                write_name(buf, &soa.mname);
                write_name(buf, &soa.rname);
                buf.write_u32::<BE>(soa.serial).unwrap();
                buf.write_u32::<BE>(soa.refresh).unwrap();
                buf.write_u32::<BE>(soa.retry).unwrap();
                buf.write_u32::<BE>(soa.expire).unwrap();
                buf.write_u32::<BE>(soa.minimum).unwrap();
            }

            RData::SRV(srv) => {
                buf.write_u16::<BE>(srv.priority).unwrap();
                buf.write_u16::<BE>(srv.weight).unwrap();
                buf.write_u16::<BE>(srv.port).unwrap();
                write_name(buf, &srv.target);
            }
        }
    }
}

/// Writes `name` in plain label form with no compression pointers.
fn write_name(buf: &mut Vec<u8>, name: &Name) {
    for label in name.labels() {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label);
    }
    buf.push(0);
}

/// Start of authority, per [rfc1035] §3.3.13.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
#[derive(Clone, Debug, PartialEq)]
pub struct Soa {
    /// The name server that was the original or primary source of data for this zone.
    pub mname: Name,

    /// The mailbox of the person responsible for this zone.
    pub rname: Name,

    pub serial: u32,
    pub refresh: u32, // in seconds
    pub retry: u32,   // in seconds
    pub expire: u32,  // in seconds
    pub minimum: u32, // in seconds
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mx {
    /// Preference given to this RR among others at the same owner. Lower values are preferred.
    pub preference: u16,

    /// A host willing to act as a mail exchange for the owner name.
    pub exchange: Name,
}

/// See [rfc2782].
///
/// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Clone, Debug, PartialEq)]
pub struct Srv {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: Name,
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(ip) => ip.fmt(f),
            RData::AAAA(ip) => ip.fmt(f),

            RData::CNAME(name) => name.fmt(f),
            RData::NS(name) => name.fmt(f),
            RData::PTR(name) => name.fmt(f),

            RData::TXT(txts) => {
                let strs: Vec<String> = txts
                    .iter()
                    .map(|t| String::from_utf8_lossy(t).into_owned())
                    .collect();
                write!(f, "\"{}\"", strs.join(" "))
            }

            // "10 aspmx.l.google.com."
            RData::MX(mx) => write!(f, "{} {}", mx.preference, mx.exchange),

            // "ns1.google.com. dns-admin.google.com. 376337657 900 900 1800 60"
            RData::SOA(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum,
            ),

            // "5 0 389 ldap.google.com."
            RData::SRV(srv) => write!(
                f,
                "{} {} {} {}",
                srv.priority, srv.weight, srv.port, srv.target
            ),
        }
    }
}

/// Displays this record in a format resembling `dig` output.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{0: <18} {1: >6} {2: <4} {3: <6} {4}",
            self.name,
            self.ttl,
            self.class,
            self.rrtype(),
            self.rdata,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rdata_a() {
        let mut buf = Vec::new();
        RData::A(Ipv4Addr::new(203, 0, 113, 7)).write(&mut buf);
        assert_eq!(buf, vec![203, 0, 113, 7]);
    }

    #[test]
    fn test_rdata_cname_uncompressed() {
        let mut buf = Vec::new();
        RData::CNAME("b.test.".parse().unwrap()).write(&mut buf);
        assert_eq!(buf, b"\x01b\x04test\x00".to_vec());
    }

    #[test]
    fn test_rdata_soa() {
        let soa = Soa {
            mname: "ns.test.".parse().unwrap(),
            rname: "admin.test.".parse().unwrap(),
            serial: 1,
            refresh: 900,
            retry: 900,
            expire: 1800,
            minimum: 60,
        };
        let mut buf = Vec::new();
        RData::SOA(soa).write(&mut buf);
        // two names plus five 32-bit fields
        assert_eq!(buf.len(), 9 + 12 + 20);
    }

    #[test]
    fn test_display() {
        let r = Record {
            name: "example.test.".parse().unwrap(),
            class: Class::Internet,
            ttl: 50,
            rdata: RData::A(Ipv4Addr::new(203, 0, 113, 7)),
        };
        assert_eq!(r.rrtype(), Type::A);
        assert_eq!(
            r.to_string(),
            "example.test.          50 IN   A      203.0.113.7"
        );
    }
}
