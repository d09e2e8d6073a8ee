//! dnsrelay is the request/response engine of a DNS proxy: it accepts DNS
//! queries from designated input interfaces, relays them through a
//! cooperating recursive resolver, and assembles fully formed responses out
//! of the resolver's cache.
//!
//! # Features
//! * RFC 1035 wire codec: header, question and resource-record emission with
//!   name compression, plus EDNS(0) ([rfc6891]) parsing and the minimal
//!   response OPT.
//! * Per-request state machine: duplicate suppression, CNAME chasing,
//!   SOA/negative packaging, UDP truncation with the TC bit.
//! * Optional DNS64 ([rfc6147]): AAAA synthesis from A records and PTR
//!   remapping across a NAT64 prefix ([rfc6052]).
//! * UDP and TCP clients, IPv4 and IPv6.
//!
//! The engine owns no sockets and never blocks: the enclosing daemon feeds
//! it datagrams and resolver answers, and it calls back out through the
//! [`ProxyHost`] trait.
//!
//! # Usage
//!
//! ```rust
//! use dnsrelay::*;
//!
//! // The host glues the engine to the resolver, the clock and the sockets.
//! struct Host {
//!     replies: Vec<Vec<u8>>,
//! }
//!
//! impl ProxyHost for Host {
//!     fn now(&self) -> u64 {
//!         0
//!     }
//!     fn cache_group(&self, _name: &Name) -> Option<&[CacheEntry]> {
//!         None // A real host exposes its resolver's cache here.
//!     }
//!     fn start_question(&mut self, _token: ClientId, _question: &LiveQuestion) {}
//!     fn stop_question(&mut self, _token: ClientId) {}
//!     fn send_message(&mut self, payload: &[u8], _route: &ReturnPath) {
//!         self.replies.push(payload.to_vec());
//!     }
//!     fn dispose_context(&mut self, _context: PlatformContext) {}
//! }
//!
//! let mut proxy = Proxy::new();
//! proxy.init(&[InterfaceIndex(2)], InterfaceIndex(9), None);
//!
//! // A DNS query, as it would arrive from a client socket.
//! let mut query = MessageWriter::new(0x1234, Flags(0x0100));
//! query
//!     .put_question(
//!         &Question {
//!             name: "example.test.".parse().unwrap(),
//!             qtype: Type::A,
//!             qclass: Class::Internet,
//!         },
//!         ABSOLUTE_MAX_DNS_MESSAGE_DATA,
//!     )
//!     .unwrap();
//! let query = query.finish();
//!
//! let mut host = Host { replies: Vec::new() };
//! proxy.on_udp_message(
//!     &mut host,
//!     &query,
//!     "198.51.100.1".parse().unwrap(),
//!     5555,
//!     InterfaceIndex(2),
//!     SocketId(1),
//!     None,
//! );
//!
//! // The proxy question is now in flight; once the resolver delivers an
//! // answer via proxy.on_answer(..), the reply lands in host.replies.
//! assert_eq!(proxy.in_flight(), 1);
//! ```
//!
//! ## Reference
//!
//! * [rfc1035]: DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION
//! * [rfc6891]: Extension Mechanisms for DNS (EDNS(0))
//! * [rfc6147]: DNS64: DNS Extensions for NAT from IPv6 Clients to IPv4 Servers
//! * [rfc6052]: IPv6 Addressing of IPv4/IPv6 Translators
//!
//! [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
//! [rfc6147]: https://datatracker.ietf.org/doc/html/rfc6147
//! [rfc6052]: https://datatracker.ietf.org/doc/html/rfc6052

mod assemble;
pub mod config;
pub mod dns64;
pub mod io;
pub mod name;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod resource;
pub mod types;
pub mod wire;

#[macro_use]
extern crate num_derive;

/// Constructs and returns an `io::Error` of the given kind.
#[macro_export]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err(
            ::std::io::Error::new(::std::io::ErrorKind::$kind, format!($($arg)*))
        )
    };
}

// Pull up the various types that should be on the front page of the docs.
#[doc(inline)]
pub use crate::types::*;

#[doc(inline)]
pub use crate::resource::*;

#[doc(inline)]
pub use crate::proxy::Proxy;

pub use crate::config::{Dns64Params, ProxyConfig, MAX_INPUT_INTERFACES};
pub use crate::dns64::{Dns64Config, Dns64State, Nat64Prefix};
pub use crate::name::{Name, NameError};
pub use crate::registry::ClientId;
pub use crate::resolver::*;
pub use crate::wire::{MessageWriter, Section};
