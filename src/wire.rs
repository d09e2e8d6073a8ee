//! Message emission and the request-side scanning the parser does not cover:
//! the limit-checked [`MessageWriter`], OPT RR location, EDNS(0) parsing and
//! the error-reply shape.

use crate::bail;
use crate::io::DnsReadExt;
use crate::name::Name;
use crate::resource::Record;
use crate::types::{
    Flags, Header, Question, Rcode, Type, ABSOLUTE_MAX_DNS_MESSAGE_DATA, HEADER_SIZE,
};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use log::debug;
use std::io;
use std::io::Cursor;
use std::io::Seek;
use std::io::SeekFrom;

/// Payload size advertised in the OPT RR of every response that carries one.
const RESPONSE_OPT_PAYLOAD_SIZE: u16 = 4096;

/// Wire size of the minimal OPT RR: root name, type, class, ttl, rdlength.
const RESPONSE_OPT_SIZE: usize = 11;

/// Which record section of the message a record is appended to.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// An outgoing DNS message under construction.
///
/// Every `put_*` call takes an upper bound in data bytes (the limit cursor).
/// A call that would exceed its bound rolls the buffer back to the previous
/// record boundary and fails, leaving the message exactly as it was; the
/// caller may then send the safe prefix.
///
/// Owner names are compressed against names already written to the message.
#[derive(Debug)]
pub struct MessageWriter {
    buf: Vec<u8>,
    header: Header,

    // Offsets of name suffixes already present in `buf`, for compression.
    names: Vec<(u16, Name)>,
}

impl MessageWriter {
    pub fn new(id: u16, flags: Flags) -> MessageWriter {
        MessageWriter {
            buf: vec![0; HEADER_SIZE],
            header: Header {
                id,
                flags,
                ..Header::default()
            },
            names: Vec::new(),
        }
    }

    /// Bytes of message data appended so far, header excluded.
    pub fn data_len(&self) -> usize {
        self.buf.len() - HEADER_SIZE
    }

    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    /// Replaces the flags word wholesale, e.g. with a client's verbatim
    /// request flags on the upstream path.
    pub fn set_flags(&mut self, flags: Flags) {
        self.header.flags = flags;
    }

    pub fn set_tc(&mut self) {
        self.header.flags.set_tc();
    }

    /// Appends the question section entry.
    pub fn put_question(&mut self, question: &Question, limit: usize) -> io::Result<()> {
        let mark = self.mark();
        self.write_name(&question.name);
        self.buf.write_u16::<BE>(question.qtype as u16)?;
        self.buf.write_u16::<BE>(question.qclass as u16)?;
        if self.data_len() > limit {
            self.rollback(mark);
            bail!(WriteZero, "question does not fit below {} bytes", limit);
        }
        self.header.questions += 1;
        Ok(())
    }

    /// Appends a resource record to `section`, refusing to pass `limit`.
    pub fn put_record(&mut self, section: Section, record: &Record, limit: usize) -> io::Result<()> {
        let mark = self.mark();
        self.write_name(&record.name);
        self.buf.write_u16::<BE>(record.rrtype() as u16)?;
        self.buf.write_u16::<BE>(record.class as u16)?;
        self.buf.write_u32::<BE>(record.ttl)?;

        let mut rdata = Vec::new();
        record.rdata.write(&mut rdata);
        self.buf.write_u16::<BE>(rdata.len() as u16)?;
        self.buf.extend_from_slice(&rdata);

        if self.data_len() > limit {
            self.rollback(mark);
            bail!(
                WriteZero,
                "{} record does not fit below {} bytes",
                record.rrtype(),
                limit
            );
        }
        *self.section_count(section) += 1;
        Ok(())
    }

    /// Appends the minimal response OPT RR: payload size 4096, zero extended
    /// rcode, version, flags and rdata.
    pub fn put_response_opt(&mut self, limit: usize) -> io::Result<()> {
        if self.data_len() + RESPONSE_OPT_SIZE > limit {
            bail!(WriteZero, "OPT does not fit below {} bytes", limit);
        }
        self.buf.push(0); // root name
        self.buf.write_u16::<BE>(Type::OPT as u16)?;
        self.buf.write_u16::<BE>(RESPONSE_OPT_PAYLOAD_SIZE)?;
        self.buf.write_u32::<BE>(0)?; // extended rcode, version, flags
        self.buf.write_u16::<BE>(0)?; // rdlength
        self.header.additionals += 1;
        Ok(())
    }

    /// Appends a client's OPT RR byte-for-byte, e.g. onto an upstream query.
    pub fn put_raw_opt(&mut self, opt: &[u8], limit: usize) -> io::Result<()> {
        if self.data_len() + opt.len() > limit {
            bail!(
                WriteZero,
                "raw OPT of {} bytes does not fit below {} bytes",
                opt.len(),
                limit
            );
        }
        self.buf.extend_from_slice(opt);
        self.header.additionals += 1;
        Ok(())
    }

    /// Encodes the final header and returns the wire message.
    pub fn finish(mut self) -> Vec<u8> {
        self.header
            .write(&mut self.buf[..HEADER_SIZE])
            .expect("header always fits its fixed slice");
        self.buf
    }

    fn mark(&self) -> (usize, usize) {
        (self.buf.len(), self.names.len())
    }

    fn rollback(&mut self, mark: (usize, usize)) {
        self.buf.truncate(mark.0);
        self.names.truncate(mark.1);
    }

    fn section_count(&mut self, section: Section) -> &mut u16 {
        match section {
            Section::Answer => &mut self.header.answers,
            Section::Authority => &mut self.header.authorities,
            Section::Additional => &mut self.header.additionals,
        }
    }

    /// Writes `name`, replacing the longest already-written suffix with a
    /// compression pointer.
    fn write_name(&mut self, name: &Name) {
        let labels = name.labels();
        for i in 0..labels.len() {
            let suffix = name.suffix(i);

            if let Some(&(off, _)) = self.names.iter().find(|(_, n)| *n == suffix) {
                self.buf.push(0xC0 | (off >> 8) as u8);
                self.buf.push(off as u8);
                return;
            }

            // Remember this suffix, unless its offset no longer fits a
            // 14-bit pointer.
            let off = self.buf.len();
            if off <= 0x3FFF {
                self.names.push((off as u16, suffix));
            }

            self.buf.push(labels[i].len() as u8);
            self.buf.extend_from_slice(&labels[i]);
        }
        self.buf.push(0);
    }
}

/// Parses the single question that ingress validation requires, returning it
/// with the cursor offset of the first byte after it.
pub fn parse_question(msg: &[u8]) -> io::Result<(Question, usize)> {
    let mut cur = Cursor::new(msg);
    cur.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

    let name = cur.read_name()?;
    let qtype = cur.read_type()?;
    let qclass = cur.read_class()?;

    Ok((
        Question {
            name,
            qtype,
            qclass,
        },
        cur.position() as usize,
    ))
}

/// Locates an OPT RR in the additional section of a request whose header has
/// already been decoded, returning the byte range of the whole record.
///
/// Returns `None` when there is no OPT or the additionals cannot be walked;
/// a request with a bad OPT is handled as if it had none.
pub fn locate_opt(msg: &[u8], header: &Header) -> Option<(usize, usize)> {
    let mut cur = Cursor::new(msg);
    cur.seek(SeekFrom::Start(HEADER_SIZE as u64)).ok()?;

    for _ in 0..header.questions {
        skip_name(&mut cur)?;
        cur.seek(SeekFrom::Current(4)).ok()?; // qtype, qclass
    }
    let records = header.answers as u32 + header.authorities as u32;
    for _ in 0..records {
        skip_record(&mut cur)?;
    }

    for _ in 0..header.additionals {
        let start = cur.position() as usize;
        skip_name(&mut cur)?;
        let rrtype = cur.read_u16::<BE>().ok()?;
        cur.seek(SeekFrom::Current(6)).ok()?; // class, ttl
        let rdlength = cur.read_u16::<BE>().ok()?;
        let end = cur.position() as usize + rdlength as usize;
        if end > msg.len() {
            return None;
        }
        if rrtype == Type::OPT as u16 {
            return Some((start, end));
        }
        cur.seek(SeekFrom::Start(end as u64)).ok()?;
    }

    None
}

/// Steps over an encoded name without decoding it.
fn skip_name(cur: &mut Cursor<&[u8]>) -> Option<()> {
    loop {
        let len = cur.read_u8().ok()?;
        match len & 0xC0 {
            0x00 if len == 0 => return Some(()),
            0x00 => {
                cur.seek(SeekFrom::Current(len as i64)).ok()?;
            }
            0xC0 => {
                // A pointer ends the name.
                cur.read_u8().ok()?;
                return Some(());
            }
            _ => return None,
        }
    }
}

/// Steps over a whole resource record.
fn skip_record(cur: &mut Cursor<&[u8]>) -> Option<()> {
    skip_name(cur)?;
    cur.seek(SeekFrom::Current(8)).ok()?; // type, class, ttl
    let rdlength = cur.read_u16::<BE>().ok()?;
    let end = cur.position() + rdlength as u64;
    if end > cur.get_ref().len() as u64 {
        return None;
    }
    cur.seek(SeekFrom::Start(end)).ok()?;
    Some(())
}

/// Parses the fixed part of an EDNS(0) OPT RR: root owner name, OPT rrtype,
/// and the requester's UDP payload size carried in the class field.
///
/// Everything past the class field (extended rcode, version, flags, rdata) is
/// left uninterpreted; the caller keeps the raw bytes instead.
pub fn parse_edns0(opt: &[u8]) -> io::Result<u16> {
    if opt.len() < 5 {
        bail!(UnexpectedEof, "OPT record of {} bytes too short", opt.len());
    }
    if opt[0] != 0 {
        bail!(InvalidData, "OPT owner name is not the root");
    }
    let mut cur = Cursor::new(&opt[1..]);
    let rrtype = cur.read_u16::<BE>()?;
    if rrtype != Type::OPT as u16 {
        bail!(InvalidData, "not an OPT record: Type({})", rrtype);
    }
    let payload_size = cur.read_u16::<BE>()?;
    Ok(payload_size)
}

/// Builds an error reply from a request: the header is echoed with QR set and
/// the low flags byte replaced by `rcode`, and the body (question section and
/// whatever followed it) is copied verbatim up to the absolute size bound.
///
/// RFC 1035 requires the question be copied back; returning as much of the
/// request as fits does that without re-encoding anything.
pub fn error_reply(msg: &[u8], rcode: Rcode) -> Vec<u8> {
    let len = msg.len().min(HEADER_SIZE + ABSOLUTE_MAX_DNS_MESSAGE_DATA);
    let mut reply = msg[..len].to_vec();

    let mut flags = Flags(u16::from_be_bytes([reply[2], reply[3]]));
    flags.set_response();
    flags.set_rcode_byte(rcode);
    reply[2..4].copy_from_slice(&flags.0.to_be_bytes());

    debug!("error reply rcode {} with {} bytes", rcode, reply.len());
    reply
}

/// A question in uncompressed wire form, for byte comparisons.
pub fn question_bytes(question: &Question) -> Vec<u8> {
    let mut writer = MessageWriter::new(0, Flags::default());
    writer
        .put_question(question, ABSOLUTE_MAX_DNS_MESSAGE_DATA)
        .expect("a single question always fits the absolute bound");
    writer.finish()[HEADER_SIZE..].to_vec()
}
