//! The set of in-flight client requests.

use crate::dns64::Dns64State;
use crate::name::Name;
use crate::resolver::{LiveQuestion, PlatformContext, ReturnPath, SocketId, Transport};
use crate::types::{Flags, Question, Type};
use log::debug;
use std::net::IpAddr;

/// Identity of one in-flight request. Stable for the client's lifetime and
/// used as the resolver question token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientId(pub(crate) u64);

/// Per-request state, held from ingress until the reply is sent or the
/// client is torn down.
#[derive(Debug)]
pub struct Client {
    /// Where the reply goes: transport, return socket, input interface,
    /// source address and port.
    pub route: ReturnPath,

    /// The client's DNS message id, echoed on the reply.
    pub msg_id: u16,

    /// The second header word of the request, verbatim.
    pub request_flags: Flags,

    /// The client's EDNS(0) OPT RR, byte-for-byte, when one was present and
    /// parseable.
    pub opt: Option<Vec<u8>>,

    /// UDP payload size the client advertised via EDNS(0); zero means no
    /// EDNS(0), and replies then omit the OPT and obey the 512-byte bound.
    pub rcv_buf_size: u16,

    /// Snapshot of the question as asked. Never mutated; the reply echoes
    /// it, and duplicate detection compares against it.
    pub qname: Name,
    pub qtype: Type,

    /// The resolver-side question. Its name and qtype may be rewritten by
    /// DNS64.
    pub live: LiveQuestion,

    /// The flags word of the most recent upstream response seen for this
    /// question; echoed when the cache walk comes up empty.
    pub response_flags: Flags,

    pub dns64: Dns64State,

    /// Platform state to hand back on teardown (the accepted TCP
    /// connection).
    pub context: Option<PlatformContext>,
}

/// Order-independent set of [`Client`]s keyed by [`ClientId`].
///
/// The concurrent population is small, so every lookup is a linear scan.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<(ClientId, Client)>,
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Adds `client` and returns its new identity.
    pub fn insert(&mut self, client: Client) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.clients.push((id, client));
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients
            .iter()
            .find(|(cid, _)| *cid == id)
            .map(|(_, c)| c)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients
            .iter_mut()
            .find(|(cid, _)| *cid == id)
            .map(|(_, c)| c)
    }

    /// Unlinks a client, returning its state for disposal. Safe to call with
    /// an identity that has already been removed.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let pos = self.clients.iter().position(|(cid, _)| *cid == id)?;
        Some(self.clients.swap_remove(pos).1)
    }

    /// Looks for an in-flight request with the same source address, port,
    /// message id and question. Names compare case-insensitively.
    ///
    /// The comparison uses each client's question snapshot, so a DNS64
    /// rewrite does not open the door to a second copy of the same request.
    pub fn find_duplicate(
        &self,
        addr: IpAddr,
        port: u16,
        msg_id: u16,
        question: &Question,
    ) -> Option<ClientId> {
        for (id, c) in &self.clients {
            if c.route.addr == addr
                && c.route.port == port
                && c.msg_id == msg_id
                && c.qtype == question.qtype
                && c.live.qclass == question.qclass
                && c.qname == question.name
            {
                debug!("found duplicate in-flight client for {}", question.name);
                return Some(*id);
            }
        }
        None
    }

    /// Finds the TCP client pinned to `socket`. Used only for teardown when
    /// the peer closes the connection.
    pub fn find_by_socket(&self, socket: SocketId) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, c)| c.route.transport == Transport::Tcp && c.route.socket == socket)
            .map(|(id, _)| *id)
    }
}
