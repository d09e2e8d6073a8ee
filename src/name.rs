// Represents a domain name as its wire-format labels.
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NameError {
    #[error("label longer than {} bytes", Name::MAX_LABEL_LEN)]
    LabelTooLong,

    #[error("name longer than {} bytes on the wire", Name::MAX_WIRE_LEN)]
    NameTooLong,

    #[error("empty label in domain name")]
    EmptyLabel,
}

/// A domain name, stored as a vector of raw labels.
///
/// Labels keep whatever byte case the client sent; equality is
/// case-insensitive per DNS rules, so a name parsed from the wire compares
/// equal to the cache's copy while still echoing back byte-for-byte.
#[derive(Clone, Debug, Default)]
pub struct Name {
    labels: Vec<Vec<u8>>,
}

impl Name {
    /// Longest label allowed by [rfc1034].
    ///
    /// [rfc1034]: https://datatracker.ietf.org/doc/html/rfc1034
    const MAX_LABEL_LEN: usize = 63;

    /// Longest encoded name, including the root terminator.
    const MAX_WIRE_LEN: usize = 255;

    /// The root domain ".".
    pub fn root() -> Name {
        Name { labels: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Appends one label, re-checking the length limits.
    pub fn push_label(&mut self, label: &[u8]) -> Result<(), NameError> {
        if label.is_empty() {
            return Err(NameError::EmptyLabel);
        }
        if label.len() > Name::MAX_LABEL_LEN {
            return Err(NameError::LabelTooLong);
        }
        if self.encoded_len() + label.len() + 1 > Name::MAX_WIRE_LEN {
            return Err(NameError::NameTooLong);
        }
        self.labels.push(label.to_vec());
        Ok(())
    }

    /// The length of this name in uncompressed wire form, including the
    /// terminating root byte.
    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// The name formed by dropping the first `skip` labels.
    ///
    /// Used by the emitter's compression map; `suffix(0)` is the name itself.
    pub fn suffix(&self, skip: usize) -> Name {
        Name {
            labels: self.labels[skip.min(self.labels.len())..].to_vec(),
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Name) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for label in &self.labels {
            for &b in label.iter() {
                // Escape the separator and anything unprintable, master-file style.
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:03}", b)?,
                }
            }
            write!(f, ".")?;
        }
        Ok(())
    }
}

/// Parses a dot-separated domain name; a trailing dot is optional.
impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut name = Name::root();
        if s.is_empty() || s == "." {
            return Ok(name);
        }
        for label in s.trim_end_matches('.').split('.') {
            name.push_label(label.as_bytes())?;
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_str() {
        let name: Name = "example.test.".parse().unwrap();
        assert_eq!(name.labels().len(), 2);
        assert_eq!(name.to_string(), "example.test.");

        // A trailing dot is optional on input but always printed.
        let bare: Name = "example.test".parse().unwrap();
        assert_eq!(name, bare);
    }

    #[test]
    fn test_root() {
        let root: Name = ".".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), ".");
        assert_eq!(root.encoded_len(), 1);
    }

    #[test]
    fn test_case_insensitive_eq() {
        let a: Name = "Example.TEST.".parse().unwrap();
        let b: Name = "example.test.".parse().unwrap();
        assert_eq!(a, b);
        // But the original spelling is preserved.
        assert_eq!(a.to_string(), "Example.TEST.");
    }

    #[test]
    fn test_limits() {
        assert_eq!(
            "a..b".parse::<Name>().unwrap_err(),
            NameError::EmptyLabel
        );
        assert_eq!(
            "a".repeat(64).parse::<Name>().unwrap_err(),
            NameError::LabelTooLong
        );

        let long = format!("{}.", "a".repeat(63)).repeat(4);
        assert_eq!(long.parse::<Name>().unwrap_err(), NameError::NameTooLong);
    }

    #[test]
    fn test_encoded_len() {
        let name: Name = "example.test.".parse().unwrap();
        // 1 + 7 + 1 + 4 + 1
        assert_eq!(name.encoded_len(), 14);
    }

    #[test]
    fn test_suffix() {
        let name: Name = "a.b.test.".parse().unwrap();
        assert_eq!(name.suffix(1).to_string(), "b.test.");
        assert!(name.suffix(3).is_root());
    }
}
