use crate::bail;
use crate::name::Name;
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use num_traits::FromPrimitive;
use std::io;
use std::io::Cursor;
use strum_macros::{Display, EnumString};

/// Size of the fixed DNS message header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Payload bound for UDP clients that did not advertise EDNS(0), per [rfc1035].
///
/// Measured in data bytes after the fixed header.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
pub const MIN_DNS_MESSAGE_SIZE: usize = 512;

/// The largest amount of message data this engine will ever emit, for any
/// transport. Deliberately below the 16-bit TCP frame limit so a reply always
/// fits a length-prefixed frame.
pub const ABSOLUTE_MAX_DNS_MESSAGE_DATA: usize = 8940;

/// The second 16-bit word of a DNS message header, carried verbatim.
///
/// Individual bits are exposed through accessors; the raw word is kept so a
/// client's request flags can be echoed without reconstruction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u16);

impl Flags {
    const QR: u16 = 0x8000;
    const OPCODE_MASK: u16 = 0x7800;
    const OPCODE_SHIFT: u16 = 11;
    const AA: u16 = 0x0400;
    const TC: u16 = 0x0200;
    const RD: u16 = 0x0100;
    const CD: u16 = 0x0010;
    const RCODE_MASK: u16 = 0x000F;

    /// A response flags word with the standard-query opcode and the given rcode.
    pub fn response(rcode: Rcode) -> Flags {
        Flags(Flags::QR | (rcode as u16 & Flags::RCODE_MASK))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_response(self) -> bool {
        self.0 & Flags::QR != 0
    }

    pub fn set_response(&mut self) {
        self.0 |= Flags::QR;
    }

    /// The opcode field, or `None` for values with no assignment.
    pub fn opcode(self) -> Option<Opcode> {
        FromPrimitive::from_u16((self.0 & Flags::OPCODE_MASK) >> Flags::OPCODE_SHIFT)
    }

    pub fn rcode(self) -> Option<Rcode> {
        FromPrimitive::from_u16(self.0 & Flags::RCODE_MASK)
    }

    /// Overwrites the entire low byte with `rcode`, clearing RA, AD, CD and Z.
    ///
    /// This is the error-reply shape: everything the upstream would normally
    /// assert in the low byte is dropped along with the old rcode.
    pub fn set_rcode_byte(&mut self, rcode: Rcode) {
        self.0 = (self.0 & 0xFF00) | (rcode as u16 & 0x00FF);
    }

    pub fn aa(self) -> bool {
        self.0 & Flags::AA != 0
    }

    pub fn tc(self) -> bool {
        self.0 & Flags::TC != 0
    }

    pub fn set_tc(&mut self) {
        self.0 |= Flags::TC;
    }

    pub fn rd(self) -> bool {
        self.0 & Flags::RD != 0
    }

    pub fn cd(self) -> bool {
        self.0 & Flags::CD != 0
    }

    fn set_bit(&mut self, mask: u16, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    /// Mirrors the RD and CD bits of `request` onto this word.
    ///
    /// RD is normally reflected by the upstream so the cached value is right,
    /// but CD sticks in the cache once any client sets it; both must track the
    /// request that is being answered now, not the request that filled the
    /// cache.
    pub fn mirror_request(mut self, request: Flags) -> Flags {
        self.set_bit(Flags::RD, request.rd());
        self.set_bit(Flags::CD, request.cd());
        self
    }
}

/// The fixed DNS message header: id, flags word and the four section counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    pub id: u16,
    pub flags: Flags,
    pub questions: u16,
    pub answers: u16,
    pub authorities: u16,
    pub additionals: u16,
}

impl Header {
    /// Decodes a header from the front of `buf`, network byte order.
    pub fn parse(buf: &[u8]) -> io::Result<Header> {
        if buf.len() < HEADER_SIZE {
            bail!(
                UnexpectedEof,
                "message length {} shorter than a DNS header",
                buf.len()
            );
        }
        let mut cur = Cursor::new(buf);
        Ok(Header {
            id: cur.read_u16::<BE>()?,
            flags: Flags(cur.read_u16::<BE>()?),
            questions: cur.read_u16::<BE>()?,
            answers: cur.read_u16::<BE>()?,
            authorities: cur.read_u16::<BE>()?,
            additionals: cur.read_u16::<BE>()?,
        })
    }

    /// Encodes this header into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut cur = Cursor::new(buf);
        cur.write_u16::<BE>(self.id)?;
        cur.write_u16::<BE>(self.flags.0)?;
        cur.write_u16::<BE>(self.questions)?;
        cur.write_u16::<BE>(self.answers)?;
        cur.write_u16::<BE>(self.authorities)?;
        cur.write_u16::<BE>(self.additionals)?;
        Ok(())
    }
}

/// Question section entry: a domain name, question [`Type`] and [`Class`].
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    pub name: Name,
    pub qtype: Type,
    pub qclass: Class,
}

/// Specifies kind of query in this message. See [rfc1035] and [rfc6895].
///
/// Only [`Opcode::Query`] is honored by the proxy; everything else elicits
/// a NotImplemented reply.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // Really only 4 bits
pub enum Opcode {
    Query = 0,

    /// Inverse Query (OBSOLETE). See [rfc3425].
    ///
    /// [rfc3425]: https://datatracker.ietf.org/doc/html/rfc3425
    IQuery = 1,
    Status = 2,

    /// See [rfc1996]
    ///
    /// [rfc1996]: https://datatracker.ietf.org/doc/html/rfc1996
    Notify = 4,

    /// See [rfc2136]
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    Update = 5,

    /// DNS Stateful Operations (DSO). See [rfc8490]
    ///
    /// [rfc8490]: https://datatracker.ietf.org/doc/html/rfc8490
    DSO = 6,
    // 3 and 7-15 Remain unassigned.
}

/// Response Codes. See [rfc1035] and [DNS Parameters].
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [DNS Parameters]: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)] // In headers it is 4 bits, in extended OPTs it is 16.
pub enum Rcode {
    NoError = 0,

    /// Format Error
    FormErr = 1,

    /// Server Failure
    ServFail = 2,

    /// Non-Existent Domain
    NXDomain = 3,

    /// Not Implemented
    NotImp = 4,

    /// Query Refused
    Refused = 5,
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::NoError
    }
}

/// Resource Record Type, for example A, CNAME or SOA.
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum Type {
    Reserved = 0,

    /// IPv4 Address.
    A = 1,
    NS = 2,
    CNAME = 5,
    SOA = 6,

    /// Domain name pointer, used by reverse-mapping queries.
    PTR = 12,

    /// Mail exchange.
    MX = 15,

    /// Text strings.
    TXT = 16,

    /// IPv6 Address.
    AAAA = 28,

    /// Server Selection
    SRV = 33,

    /// EDNS(0) Opt pseudo-type. See [rfc6891].
    ///
    /// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
    OPT = 41,

    /// Any record type. Only valid as a Question Type.
    ANY = 255,
}

/// Resource Record Class, for example Internet.
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[repr(u16)]
pub enum Class {
    /// Reserved per [rfc6895]
    ///
    /// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
    Reserved = 0,

    /// The Internet (IN), see [rfc1035].
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[strum(serialize = "IN")]
    Internet = 1,

    #[strum(serialize = "CS")]
    CsNet = 2,

    #[strum(serialize = "CH")]
    Chaos = 3,

    #[strum(serialize = "HS")]
    Hesiod = 4,

    /// No class specified, see [rfc2136]
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    None = 254,

    /// * (ANY) See [rfc1035]
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[strum(serialize = "*")]
    Any = 255,
}

impl Default for Class {
    fn default() -> Self {
        Class::Internet
    }
}
