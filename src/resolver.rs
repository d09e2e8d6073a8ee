//! The boundary between the engine and its host: the recursive resolver it
//! relays through, the clock, and the socket layer it replies over.
//!
//! The engine never blocks. Questions are started and stopped through
//! [`ProxyHost`], and every answer comes back as a call to
//! [`Proxy::on_answer`](crate::Proxy::on_answer) on the event-loop thread.
//! Cache borrows handed out by [`ProxyHost::cache_group`] are only held for
//! the duration of a single callback.

use crate::name::Name;
use crate::registry::ClientId;
use crate::resource::Record;
use crate::types::{Class, Flags, Type};
use std::net::IpAddr;

/// A network interface by OS index. Index zero is never a valid interface
/// and is rejected by the ingress filter.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceIndex(pub u32);

/// Stable identity of a return socket: the shared UDP socket, or the
/// per-request accepted TCP socket. TCP teardown is keyed on this.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SocketId(pub u64);

/// Opaque per-request platform state owned by the host (for TCP, the
/// accepted connection). The engine hands it back through
/// [`ProxyHost::dispose_context`] exactly once.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlatformContext(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Everything needed to route a reply back to the client it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnPath {
    pub transport: Transport,
    pub socket: SocketId,

    /// The input interface the request arrived on.
    pub iface: InterfaceIndex,

    pub addr: IpAddr,
    pub port: u16,
}

/// Policy bits the engine sets on every proxy question it starts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuestionPolicy {
    /// Give up eventually rather than querying forever; the timeout surfaces
    /// as an empty cache walk and becomes a ServFail reply.
    pub timeout: bool,

    /// Deliver negative and intermediate answers, not just the terminal
    /// record; DNS64 needs to see negative AAAA answers.
    pub return_intermediates: bool,

    /// Mark the question as proxied so the resolver forwards rather than
    /// answering from local authority.
    pub proxy_question: bool,
}

impl QuestionPolicy {
    pub fn proxied() -> QuestionPolicy {
        QuestionPolicy {
            timeout: true,
            return_intermediates: true,
            proxy_question: true,
        }
    }
}

/// The resolver-side question belonging to one client. The name and qtype
/// may be rewritten by DNS64; the client's snapshot keeps the originals.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveQuestion {
    pub name: Name,
    pub qtype: Type,
    pub qclass: Class,

    /// The output interface the resolver should query over.
    pub iface: InterfaceIndex,

    pub policy: QuestionPolicy,
}

/// A positive record or a negative marker, as held by the resolver's cache.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheData {
    Positive(Record),

    /// An authoritative "no such name/type": NXDOMAIN or NODATA for the
    /// given tuple. Contributes no answer record but still shapes the reply.
    Negative {
        name: Name,
        rrtype: Type,
        class: Class,
    },
}

/// One record of a cache group, with the metadata the assembler needs.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub data: CacheData,

    /// TTL as received from upstream; aged by the assembler against
    /// [`CacheEntry::time_received`].
    pub original_ttl: u32,

    /// [`ProxyHost::now`] at the moment the record was cached.
    pub time_received: u64,

    /// The flags word of the upstream response this record came from.
    pub response_flags: Flags,

    /// Side record: the zone SOA cached alongside a negative or sparse
    /// answer, emitted into the authority section of the reply.
    pub soa: Option<Record>,
}

impl CacheEntry {
    pub fn name(&self) -> &Name {
        match &self.data {
            CacheData::Positive(record) => &record.name,
            CacheData::Negative { name, .. } => name,
        }
    }

    pub fn rrtype(&self) -> Type {
        match &self.data {
            CacheData::Positive(record) => record.rrtype(),
            CacheData::Negative { rrtype, .. } => *rrtype,
        }
    }

    pub fn class(&self) -> Class {
        match &self.data {
            CacheData::Positive(record) => record.class,
            CacheData::Negative { class, .. } => *class,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self.data, CacheData::Negative { .. })
    }

    /// Whether this entry answers a question for (`qtype`, `qclass`) at its
    /// own name. A positive CNAME answers any question type; a negative
    /// marker only denies its exact type.
    pub fn answers(&self, qtype: Type, qclass: Class) -> bool {
        if self.class() != qclass && qclass != Class::Any {
            return false;
        }
        if qtype == Type::ANY {
            return true;
        }
        self.rrtype() == qtype || (!self.is_negative() && self.rrtype() == Type::CNAME)
    }
}

/// The host side of the engine: clock, cache access, question lifecycle,
/// message transmission and platform-context disposal.
///
/// All methods are called from the single event-loop thread. `cache_group`
/// returns the records sharing an owner name, in the order the resolver
/// keeps them; the engine copies what it needs before the callback returns.
pub trait ProxyHost {
    /// The resolver's clock, in whole seconds. Only differences are used.
    fn now(&self) -> u64;

    /// All cache records whose owner name equals `name`, or `None` if the
    /// cache holds nothing for it.
    fn cache_group(&self, name: &Name) -> Option<&[CacheEntry]>;

    /// Begins resolving `question` on behalf of the client `token`. Answers
    /// are delivered to [`Proxy::on_answer`](crate::Proxy::on_answer) with
    /// the same token.
    fn start_question(&mut self, token: ClientId, question: &LiveQuestion);

    /// Stops a question previously started for `token`. No further answers
    /// may be delivered for it.
    fn stop_question(&mut self, token: ClientId);

    /// Transmits a finished wire message along `route`.
    fn send_message(&mut self, payload: &[u8], route: &ReturnPath);

    /// Releases per-request platform state. Called exactly once per context
    /// the engine took ownership of.
    fn dispose_context(&mut self, context: PlatformContext);
}
