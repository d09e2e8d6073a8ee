//! Cursor extension traits used when parsing DNS messages.

use crate::bail;
use crate::name::Name;
use crate::types::{Class, Type};
use byteorder::{ReadBytesExt, BE};
use num_traits::FromPrimitive;
use std::io;
use std::io::Cursor;
use std::io::SeekFrom;

pub trait SeekExt: io::Seek {
    /// Returns the number of bytes remaining to be consumed.
    /// This is used as a way to check for malformed input.
    fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;

        // reset position
        self.seek(SeekFrom::Start(pos))?;

        Ok(len - pos)
    }
}

impl<'a> SeekExt for Cursor<&'a [u8]> {
    fn remaining(self: &mut std::io::Cursor<&'a [u8]>) -> io::Result<u64> {
        let pos = self.position() as usize;
        let len = self.get_ref().len();

        Ok((len - pos) as u64)
    }
}

/// All types that implement `Read` and `Seek` get methods defined
/// in `DnsReadExt` for free.
impl<R: io::Read + ?Sized + io::Seek> DnsReadExt for R {}

/// Extensions to io::Read to add some DNS specific types.
pub trait DnsReadExt: io::Read + io::Seek {
    /// Reads a domain name from the wire, following RFC 1035 compression
    /// pointers.
    ///
    /// # Errors
    ///
    /// Returns io::Error(InvalidData) on oversized labels/names, forward
    /// pointers, or an unknown label type, and a more general io::Error on
    /// any read past the end of the message.
    fn read_name(&mut self) -> io::Result<Name> {
        let mut name = Name::root();
        let start = self.stream_position()?;

        // Read each label one at a time, to build up the full domain name.
        loop {
            // Length of the next label
            let len = self.read_u8()?;
            if len == 0 {
                break;
            }

            match len & 0xC0 {
                // No compression
                0x00 => {
                    let mut label = vec![0; len.into()];
                    self.read_exact(&mut label)?;

                    if let Err(e) = name.push_label(&label) {
                        bail!(InvalidData, "invalid name: {}", e);
                    }
                }

                // Compression
                0xC0 => {
                    // Read the 14 bit pointer.
                    let b2 = self.read_u8()? as u16;
                    let ptr = ((len as u16 & !0xC0) << 8 | b2) as u64;

                    // Make sure we don't get into a loop: pointers may only
                    // point at earlier bytes.
                    if ptr >= start {
                        bail!(
                            InvalidData,
                            "invalid compressed pointer pointing to future bytes"
                        );
                    }

                    // We are going to jump backwards, so record where we
                    // currently are, to reset it later.
                    let current = self.stream_position()?;

                    // Jump and read the rest of the name from there.
                    self.seek(SeekFrom::Start(ptr))?;
                    let tail = self.read_name()?;
                    for label in tail.labels() {
                        if let Err(e) = name.push_label(label) {
                            bail!(InvalidData, "invalid name: {}", e);
                        }
                    }

                    // Reset ourselves.
                    self.seek(SeekFrom::Start(current))?;

                    break;
                }

                // Unknown
                _ => bail!(
                    InvalidData,
                    "unsupported compression type {0:b}",
                    len & 0xC0
                ),
            }
        }

        Ok(name)
    }

    /// Reads a DNS Type.
    fn read_type(&mut self) -> io::Result<Type> {
        let rrtype = self.read_u16::<BE>()?;
        let rrtype = match FromPrimitive::from_u16(rrtype) {
            Some(t) => t,
            None => bail!(InvalidData, "invalid Type({})", rrtype),
        };

        Ok(rrtype)
    }

    /// Reads a DNS Class.
    fn read_class(&mut self) -> io::Result<Class> {
        let class = self.read_u16::<BE>()?;
        let class = match FromPrimitive::from_u16(class) {
            Some(t) => t,
            None => bail!(InvalidData, "invalid Class({})", class),
        };

        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Seek;

    #[test]
    fn test_read_name_uncompressed() {
        let buf: &[u8] = b"\x07example\x04test\x00";
        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_name().unwrap().to_string(), "example.test.");
        assert_eq!(cur.remaining().unwrap(), 0);
    }

    #[test]
    fn test_read_name_compressed() {
        // "test." at offset 0, then "a" + pointer to it at offset 6.
        let buf: &[u8] = b"\x04test\x00\x01a\xC0\x00";
        let mut cur = Cursor::new(buf);
        cur.seek(SeekFrom::Start(6)).unwrap();
        assert_eq!(cur.read_name().unwrap().to_string(), "a.test.");
    }

    #[test]
    fn test_read_name_forward_pointer() {
        // Pointer at offset 0 referring to itself.
        let buf: &[u8] = b"\xC0\x00";
        let mut cur = Cursor::new(buf);
        assert!(cur.read_name().is_err());
    }

    #[test]
    fn test_read_name_truncated_label() {
        let buf: &[u8] = b"\x07exam";
        let mut cur = Cursor::new(buf);
        assert!(cur.read_name().is_err());
    }

    #[test]
    fn test_read_type_and_class() {
        let buf: &[u8] = &[0x00, 0x1C, 0x00, 0x01];
        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_type().unwrap(), Type::AAAA);
        assert_eq!(cur.read_class().unwrap(), Class::Internet);
    }
}
