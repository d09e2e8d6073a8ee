//! DNS64 (RFC 6147) support: NAT64 prefix arithmetic per [rfc6052], the
//! per-client synthesis state machine, and reverse-mapping name helpers.
//!
//! [rfc6052]: https://datatracker.ietf.org/doc/html/rfc6052

use crate::name::Name;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Prefix lengths RFC 6052 defines for IPv4-embedded IPv6 addresses.
const VALID_PREFIX_BITS: [u8; 6] = [32, 40, 48, 56, 64, 96];

/// Where the four IPv4 octets sit for each prefix length. Octet index 8 (the
/// "u" octet) is always skipped.
fn embed_positions(bits: u8) -> [usize; 4] {
    match bits {
        32 => [4, 5, 6, 7],
        40 => [5, 6, 7, 9],
        48 => [6, 7, 9, 10],
        56 => [7, 9, 10, 11],
        64 => [9, 10, 11, 12],
        96 => [12, 13, 14, 15],
        _ => unreachable!("prefix length validated on construction"),
    }
}

/// A NAT64 translation prefix: up to 96 bits under which IPv4 addresses are
/// embedded.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Nat64Prefix {
    bits: u8,
    bytes: [u8; 12],
}

impl Nat64Prefix {
    /// Builds a prefix from raw bytes and a bit length. Returns `None` for
    /// any length RFC 6052 does not define, or when `prefix` is shorter than
    /// the length requires.
    pub fn new(prefix: &[u8], bits: u8) -> Option<Nat64Prefix> {
        if !VALID_PREFIX_BITS.contains(&bits) {
            return None;
        }
        let len = bits as usize / 8;
        if prefix.len() < len {
            return None;
        }
        let mut bytes = [0; 12];
        bytes[..len].copy_from_slice(&prefix[..len]);
        Some(Nat64Prefix { bits, bytes })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    fn prefix_len(&self) -> usize {
        self.bits as usize / 8
    }

    /// Embeds `v4` under this prefix, producing the synthesized IPv6 address.
    pub fn synthesize(&self, v4: Ipv4Addr) -> Ipv6Addr {
        let mut out = [0; 16];
        out[..self.prefix_len()].copy_from_slice(&self.bytes[..self.prefix_len()]);

        let octets = v4.octets();
        for (i, &pos) in embed_positions(self.bits).iter().enumerate() {
            out[pos] = octets[i];
        }
        Ipv6Addr::from(out)
    }

    /// Recovers the embedded IPv4 address from `v6`, or `None` when `v6`
    /// does not lie under this prefix.
    pub fn extract(&self, v6: Ipv6Addr) -> Option<Ipv4Addr> {
        let octets = v6.octets();
        if octets[..self.prefix_len()] != self.bytes[..self.prefix_len()] {
            return None;
        }

        let pos = embed_positions(self.bits);
        Some(Ipv4Addr::new(
            octets[pos[0]],
            octets[pos[1]],
            octets[pos[2]],
            octets[pos[3]],
        ))
    }
}

impl fmt::Debug for Nat64Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut full = [0; 16];
        full[..12].copy_from_slice(&self.bytes);
        write!(f, "{}/{}", Ipv6Addr::from(full), self.bits)
    }
}

/// DNS64 parameters installed at init time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Dns64Config {
    pub prefix: Nat64Prefix,

    /// Synthesize AAAA from A immediately, without first trying a real AAAA
    /// query.
    pub force_aaaa_synthesis: bool,
}

/// Per-client DNS64 progress. Set at most once per transition; never moves
/// back toward `Initial`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Dns64State {
    Initial,

    /// Querying for an A record to synthesize the AAAA answer from.
    AaaaSynthesis,

    /// The ip6.arpa question was rewritten to in-addr.arpa and is being tried.
    PtrTrying,

    /// The in-addr.arpa PTR query got a usable answer.
    PtrSuccess,

    /// The in-addr.arpa PTR query produced nothing useful.
    PtrNxDomain,
}

impl Default for Dns64State {
    fn default() -> Self {
        Dns64State::Initial
    }
}

/// Decodes an `ip6.arpa` reverse-mapping name into the address it names.
///
/// The name must be exactly 32 single-hex-digit nibble labels, least
/// significant first, under `ip6.arpa`.
pub fn reverse_v6_address(name: &Name) -> Option<Ipv6Addr> {
    let labels = name.labels();
    if labels.len() != 34 {
        return None;
    }
    if !labels[32].eq_ignore_ascii_case(b"ip6") || !labels[33].eq_ignore_ascii_case(b"arpa") {
        return None;
    }

    let mut octets = [0; 16];
    for (i, label) in labels[..32].iter().enumerate() {
        if label.len() != 1 {
            return None;
        }
        let nibble = (label[0] as char).to_digit(16)? as u8;
        // Nibble 0 is the low half of the last octet.
        let shift = if i % 2 == 1 { 4 } else { 0 };
        octets[15 - i / 2] |= nibble << shift;
    }
    Some(Ipv6Addr::from(octets))
}

/// Builds the `in-addr.arpa` reverse-mapping name for `v4`.
pub fn reverse_v4_name(v4: Ipv4Addr) -> Name {
    let o = v4.octets();
    let s = format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0]);
    Name::from_str(&s).expect("reverse-mapping names are always well formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn well_known() -> Nat64Prefix {
        // 64:ff9b::/96
        Nat64Prefix::new(&"64:ff9b::".parse::<Ipv6Addr>().unwrap().octets(), 96).unwrap()
    }

    #[test]
    fn test_synthesize_well_known() {
        let v6 = well_known().synthesize(Ipv4Addr::new(192, 0, 2, 33));
        assert_eq!(v6, "64:ff9b::c000:221".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_extract_well_known() {
        let prefix = well_known();
        let v6 = "64:ff9b::c000:221".parse().unwrap();
        assert_eq!(prefix.extract(v6), Some(Ipv4Addr::new(192, 0, 2, 33)));

        // An address outside the prefix does not extract.
        assert_eq!(prefix.extract("2001:db8::1".parse().unwrap()), None);
    }

    #[test]
    fn test_synthesize_skips_u_octet() {
        // A /40 prefix splits the address around octet 8, which stays zero.
        let prefix = Nat64Prefix::new(&[0x20, 0x01, 0x0d, 0xb8, 0x01], 40).unwrap();
        let v6 = prefix.synthesize(Ipv4Addr::new(192, 0, 2, 33));
        assert_eq!(
            v6.octets(),
            [0x20, 0x01, 0x0d, 0xb8, 0x01, 192, 0, 2, 0, 33, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(prefix.extract(v6), Some(Ipv4Addr::new(192, 0, 2, 33)));
    }

    #[test]
    fn test_invalid_prefix_lengths() {
        assert!(Nat64Prefix::new(&[0; 16], 0).is_none());
        assert!(Nat64Prefix::new(&[0; 16], 33).is_none());
        assert!(Nat64Prefix::new(&[0; 16], 128).is_none());
        // Buffer shorter than the prefix length.
        assert!(Nat64Prefix::new(&[0; 4], 96).is_none());
    }

    #[test]
    fn test_reverse_v6_address() {
        let name: Name =
            "1.2.2.0.0.0.0.c.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.b.9.f.f.4.6.0.0.ip6.arpa."
                .parse()
                .unwrap();
        assert_eq!(
            reverse_v6_address(&name),
            Some("64:ff9b::c000:221".parse().unwrap())
        );
    }

    #[test]
    fn test_reverse_v6_address_rejects_others() {
        let v4name: Name = "33.2.0.192.in-addr.arpa.".parse().unwrap();
        assert_eq!(reverse_v6_address(&v4name), None);

        let short: Name = "1.2.3.ip6.arpa.".parse().unwrap();
        assert_eq!(reverse_v6_address(&short), None);

        let bad_digit: Name =
            "x.2.2.0.0.0.0.c.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.b.9.f.f.4.6.0.0.ip6.arpa."
                .parse()
                .unwrap();
        assert_eq!(reverse_v6_address(&bad_digit), None);
    }

    #[test]
    fn test_reverse_v4_name() {
        let name = reverse_v4_name(Ipv4Addr::new(192, 0, 2, 33));
        assert_eq!(name.to_string(), "33.2.0.192.in-addr.arpa.");
    }
}
