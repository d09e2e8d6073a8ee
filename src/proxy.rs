//! The proxy engine: request ingress, the resolver answer callback, and
//! configuration lifecycle.
//!
//! The host's socket layer feeds datagrams to [`Proxy::on_udp_message`] and
//! [`Proxy::on_tcp_message`]; the resolver feeds answers to
//! [`Proxy::on_answer`]. All three run on the host's event-loop thread.

use crate::assemble::{assemble, AssembleError};
use crate::config::{Dns64Params, ProxyConfig};
use crate::dns64::{reverse_v4_name, reverse_v6_address, Dns64State};
use crate::registry::{Client, ClientId, ClientRegistry};
use crate::resolver::{
    InterfaceIndex, LiveQuestion, PlatformContext, ProxyHost, QuestionPolicy, ReturnPath,
    SocketId, Transport,
};
use crate::types::{
    Class, Flags, Header, Opcode, Question, Rcode, Type, ABSOLUTE_MAX_DNS_MESSAGE_DATA,
    HEADER_SIZE,
};
use crate::wire::{error_reply, locate_opt, parse_edns0, parse_question, MessageWriter};
use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use std::net::IpAddr;
use std::sync::Arc;

/// The DNS proxy engine.
///
/// Holds the active configuration snapshot and the set of in-flight client
/// requests. One instance serves both address families and both transports.
#[derive(Debug, Default)]
pub struct Proxy {
    config: ArcSwapOption<ProxyConfig>,
    registry: ClientRegistry,
}

impl Proxy {
    pub fn new() -> Proxy {
        Proxy::default()
    }

    /// Installs a configuration: the input interface set, the output
    /// interface, and optionally DNS64 parameters.
    ///
    /// An undefined DNS64 prefix length disables DNS64 rather than failing
    /// the whole call. The snapshot is published atomically; callbacks
    /// already running keep the one they loaded.
    pub fn init(
        &self,
        inputs: &[InterfaceIndex],
        output: InterfaceIndex,
        dns64: Option<Dns64Params>,
    ) {
        let config = ProxyConfig::new(inputs, output, dns64);
        info!(
            "proxy configured: input {:?}, output {}",
            config.input_interfaces(),
            config.output_interface.0
        );
        self.config.store(Some(Arc::new(config)));
    }

    /// Clears the configuration. In-flight clients drain naturally through
    /// their resolver callbacks; new datagrams fail the interface filter.
    pub fn terminate(&self) {
        info!("proxy terminated, interface configuration cleared");
        self.config.store(None);
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Entry point for a UDP datagram received by the host's socket layer.
    #[allow(clippy::too_many_arguments)]
    pub fn on_udp_message<H: ProxyHost>(
        &mut self,
        host: &mut H,
        msg: &[u8],
        src_addr: IpAddr,
        src_port: u16,
        iface: InterfaceIndex,
        socket: SocketId,
        context: Option<PlatformContext>,
    ) {
        debug!(
            "UDP message from {}:{} length {} on interface {}",
            src_addr,
            src_port,
            msg.len(),
            iface.0
        );
        self.ingress(
            host,
            msg,
            src_addr,
            src_port,
            iface,
            socket,
            Transport::Udp,
            context,
        );
    }

    /// Entry point for one message on an accepted TCP connection.
    ///
    /// An empty message means the peer closed the connection; that, or a
    /// message arriving on an interface no longer in the input set, tears
    /// down the client pinned to `socket`. The filter runs on every message,
    /// not just at accept, because a connection can outlive a
    /// reconfiguration.
    #[allow(clippy::too_many_arguments)]
    pub fn on_tcp_message<H: ProxyHost>(
        &mut self,
        host: &mut H,
        msg: &[u8],
        src_addr: IpAddr,
        src_port: u16,
        iface: InterfaceIndex,
        socket: SocketId,
        context: Option<PlatformContext>,
    ) {
        debug!(
            "TCP message from {}:{} length {} on interface {}",
            src_addr,
            src_port,
            msg.len(),
            iface.0
        );

        let admitted = self
            .config
            .load_full()
            .map_or(false, |c| c.admits(iface));

        if msg.is_empty() || !admitted {
            match self.registry.find_by_socket(socket) {
                Some(token) => {
                    info!("tearing down TCP client on closed or rejected socket");
                    self.teardown(host, token);
                }
                None => warn!("TCP teardown: no client for the socket"),
            }
            return;
        }

        self.ingress(
            host,
            msg,
            src_addr,
            src_port,
            iface,
            socket,
            Transport::Tcp,
            context,
        );
    }

    /// Validates a request and, if it survives, creates a client and starts
    /// the proxy question.
    #[allow(clippy::too_many_arguments)]
    fn ingress<H: ProxyHost>(
        &mut self,
        host: &mut H,
        msg: &[u8],
        src_addr: IpAddr,
        src_port: u16,
        iface: InterfaceIndex,
        socket: SocketId,
        transport: Transport,
        context: Option<PlatformContext>,
    ) {
        let config = match self.config.load_full() {
            Some(config) => config,
            None => {
                warn!("dropping query on interface {}: not configured", iface.0);
                return;
            }
        };
        if !config.admits(iface) {
            warn!(
                "rejecting query on interface {}, input set is {:?}",
                iface.0,
                config.input_interfaces()
            );
            return;
        }

        if msg.len() < HEADER_SIZE {
            debug!(
                "message from {}:{} length {} too short",
                src_addr,
                src_port,
                msg.len()
            );
            return;
        }
        let header = match Header::parse(msg) {
            Ok(header) => header,
            Err(_) => return,
        };

        let route = ReturnPath {
            transport,
            socket,
            iface,
            addr: src_addr,
            port: src_port,
        };

        if header.flags.is_response() || header.flags.opcode() != Some(Opcode::Query) {
            info!("not a standard query from {}:{}", src_addr, src_port);
            send_error(host, msg, Rcode::NotImp, &route, context);
            return;
        }

        if header.questions != 1 || header.answers != 0 || header.authorities != 0 {
            info!(
                "malformed message from {}:{}: Q:{} An:{} Au:{}",
                src_addr, src_port, header.questions, header.answers, header.authorities
            );
            send_error(host, msg, Rcode::FormErr, &route, context);
            return;
        }

        let question = match parse_question(msg) {
            Ok((question, _)) => question,
            Err(e) => {
                info!(
                    "question cannot be parsed from {}:{}: {}",
                    src_addr, src_port, e
                );
                send_error(host, msg, Rcode::FormErr, &route, context);
                return;
            }
        };
        debug!(
            "question {} {} from {}:{}",
            question.name, question.qtype, src_addr, src_port
        );

        // Be liberal with EDNS(0): a bad OPT is treated as if there were none.
        let mut opt = None;
        let mut rcv_buf_size = 0;
        if let Some((start, end)) = locate_opt(msg, &header) {
            match parse_edns0(&msg[start..end]) {
                Ok(payload_size) => {
                    rcv_buf_size = payload_size;
                    opt = Some(msg[start..end].to_vec());
                }
                Err(e) => info!(
                    "ignoring unparseable EDNS(0) option from {}:{}: {}",
                    src_addr, src_port, e
                ),
            }
        }

        if self
            .registry
            .find_duplicate(src_addr, src_port, header.id, &question)
            .is_some()
        {
            info!(
                "dropping duplicate request from {}:{}, the in-flight copy will answer",
                src_addr, src_port
            );
            return;
        }

        let mut live = LiveQuestion {
            name: question.name.clone(),
            qtype: question.qtype,
            qclass: question.qclass,
            iface: config.output_interface,
            policy: QuestionPolicy::proxied(),
        };

        let mut dns64_state = Dns64State::Initial;
        if let Some(dns64) = &config.dns64 {
            if question.qtype == Type::PTR {
                // An ip6.arpa question under the NAT64 prefix becomes an
                // in-addr.arpa question for the embedded IPv4 address.
                if let Some(v4) = reverse_v6_address(&question.name)
                    .and_then(|v6| dns64.prefix.extract(v6))
                {
                    live.name = reverse_v4_name(v4);
                    dns64_state = Dns64State::PtrTrying;
                    info!("rewrote {} to {}", question.name, live.name);
                }
            } else if question.qtype == Type::AAAA && dns64.force_aaaa_synthesis {
                live.qtype = Type::A;
                dns64_state = Dns64State::AaaaSynthesis;
            }
        }

        let client = Client {
            route,
            msg_id: header.id,
            request_flags: header.flags,
            opt,
            rcv_buf_size,
            qname: question.name,
            qtype: question.qtype,
            live: live.clone(),
            response_flags: Flags::default(),
            dns64: dns64_state,
            context,
        };

        let token = self.registry.insert(client);
        host.start_question(token, &live);
    }

    /// Resolver callback: one record arrived for the client's live question.
    ///
    /// Events with `add_record` false are lifecycle noise and ignored.
    pub fn on_answer<H: ProxyHost>(
        &mut self,
        host: &mut H,
        token: ClientId,
        answer: &crate::resolver::CacheEntry,
        add_record: bool,
    ) {
        if !add_record {
            return;
        }

        let config = self.config.load_full();
        let dns64 = config.as_ref().and_then(|c| c.dns64);

        let client = match self.registry.get_mut(token) {
            Some(client) => client,
            None => {
                warn!("answer for a client no longer in the registry");
                return;
            }
        };
        debug!(
            "answer {} for {} ({})",
            answer.rrtype(),
            client.qname,
            client.live.qtype
        );

        // Remember what the upstream said, for the empty-cache reply below.
        if !answer.response_flags.is_zero() {
            client.response_flags = answer.response_flags;
        }

        if dns64.is_some() {
            match client.dns64 {
                Dns64State::Initial => {
                    // A negative AAAA answer restarts the question as A so
                    // the reply can be synthesized. RFC 6147 §5.1.6.
                    if answer.is_negative()
                        && client.live.qtype == Type::AAAA
                        && answer.rrtype() == Type::AAAA
                        && answer.class() == Class::Internet
                    {
                        info!("negative AAAA for {}, retrying as A", client.qname);
                        host.stop_question(token);
                        client.dns64 = Dns64State::AaaaSynthesis;
                        client.live.qtype = Type::A;
                        let live = client.live.clone();
                        host.start_question(token, &live);
                        return;
                    }
                }
                Dns64State::PtrTrying => {
                    // Only a positive PTR makes the rewrite stick.
                    client.dns64 = if !answer.is_negative()
                        && client.live.qtype == Type::PTR
                        && answer.rrtype() == Type::PTR
                        && answer.class() == Class::Internet
                    {
                        Dns64State::PtrSuccess
                    } else {
                        Dns64State::PtrNxDomain
                    };
                }
                _ => {}
            }
        }

        let payload = if client.dns64 == Dns64State::PtrNxDomain {
            // The rewritten PTR went nowhere: NXDOMAIN with the original
            // question and no records.
            question_only_reply(client, Flags::response(Rcode::NXDomain))
        } else {
            if !answer.is_negative() && answer.rrtype() != client.live.qtype {
                // A CNAME chain is being followed; answer when the terminal
                // record arrives.
                debug!(
                    "received {} while waiting for {}, not answering yet",
                    answer.rrtype(),
                    client.live.qtype
                );
                return;
            }

            match assemble(&*host, client, dns64.as_ref()) {
                Ok(mut assembly) => {
                    if assembly.truncated {
                        match client.route.transport {
                            Transport::Udp => {
                                info!("response for {} truncated, setting TC", client.qname);
                                assembly.writer.set_tc();
                            }
                            // A truncated TCP reply cannot be continued;
                            // send what fits.
                            Transport::Tcp => error!(
                                "response for {} does not fit a TCP frame",
                                client.qname
                            ),
                        }
                    }
                    Some(assembly.writer.finish())
                }
                Err(AssembleError::NoRecords) => {
                    // Nothing in the cache: answer anyway so the client is
                    // not left waiting. Echo the upstream's flags when we
                    // saw them, otherwise ServFail.
                    let flags = if client.response_flags.is_zero() {
                        Flags::response(Rcode::ServFail)
                    } else {
                        client.response_flags
                    };
                    info!("no records for {}, sending empty response", client.qname);
                    question_only_reply(client, flags)
                }
            }
        };

        if let Some(payload) = payload {
            let route = client.route.clone();
            host.send_message(&payload, &route);
        }

        self.teardown(host, token);
    }

    /// Stamps a client's verbatim request flags and EDNS(0) OPT onto the
    /// upstream query the resolver is about to send for it.
    pub fn decorate_upstream_query(&self, token: ClientId, writer: &mut MessageWriter) {
        let client = match self.registry.get(token) {
            Some(client) => client,
            None => return,
        };
        writer.set_flags(client.request_flags);
        if let Some(opt) = &client.opt {
            if let Err(e) = writer.put_raw_opt(opt, ABSOLUTE_MAX_DNS_MESSAGE_DATA) {
                info!("cannot append client OPT to upstream query: {}", e);
            }
        }
    }

    /// Disposes a client exactly once: stop the question, unlink, hand the
    /// platform context back, drop the record.
    fn teardown<H: ProxyHost>(&mut self, host: &mut H, token: ClientId) {
        host.stop_question(token);
        if let Some(mut client) = self.registry.remove(token) {
            if let Some(context) = client.context.take() {
                host.dispose_context(context);
            }
        }
    }
}

/// A reply carrying only the echoed question, with the given flags.
fn question_only_reply(client: &Client, flags: Flags) -> Option<Vec<u8>> {
    let mut writer = MessageWriter::new(client.msg_id, flags);
    let question = Question {
        name: client.qname.clone(),
        qtype: client.qtype,
        qclass: client.live.qclass,
    };
    match writer.put_question(&question, ABSOLUTE_MAX_DNS_MESSAGE_DATA) {
        Ok(()) => Some(writer.finish()),
        Err(e) => {
            warn!("cannot emit question for {}: {}", client.qname, e);
            None
        }
    }
}

/// Replies to a request with an error rcode, echoing its header and body,
/// then disposes the platform context.
fn send_error<H: ProxyHost>(
    host: &mut H,
    msg: &[u8],
    rcode: Rcode,
    route: &ReturnPath,
    context: Option<PlatformContext>,
) {
    let reply = error_reply(msg, rcode);
    host.send_message(&reply, route);
    if let Some(context) = context {
        host.dispose_context(context);
    }
}
