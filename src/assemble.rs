//! Builds a client's reply out of the resolver's cache.

use crate::dns64::{Dns64Config, Dns64State};
use crate::name::Name;
use crate::registry::Client;
use crate::resolver::{CacheData, ProxyHost, Transport};
use crate::resource::{RData, Record};
use crate::types::{
    Class, Question, Type, ABSOLUTE_MAX_DNS_MESSAGE_DATA, MIN_DNS_MESSAGE_SIZE,
};
use crate::wire::{MessageWriter, Section};
use log::{debug, info, warn};
use thiserror::Error;

/// How many CNAME links the assembler will follow before giving up. The
/// cache is outside our control, so a chain (or loop) longer than this stops
/// the walk instead of running away.
const MAX_CNAME_CHAIN: usize = 8;

#[derive(Error, Debug, PartialEq)]
pub enum AssembleError {
    /// The cache held nothing answering the live question; the caller turns
    /// this into a ServFail-style reply.
    #[error("no cache records answer the question")]
    NoRecords,
}

/// A finished (or safely cut short) reply.
#[derive(Debug)]
pub(crate) struct Assembly {
    pub writer: MessageWriter,

    /// A record did not fit the size bound; `writer` stops at the last
    /// record boundary that did. The caller decides what the TC bit does.
    pub truncated: bool,
}

/// Walks the cache for the client's working question and packs the reply:
/// answers (CNAME chains included), one optional authority SOA, and the
/// response OPT when the client spoke EDNS(0).
pub(crate) fn assemble<H: ProxyHost>(
    host: &H,
    client: &Client,
    dns64: Option<&Dns64Config>,
) -> Result<Assembly, AssembleError> {
    let now = host.now();

    let data_limit = match client.route.transport {
        Transport::Udp => {
            if client.rcv_buf_size == 0 {
                MIN_DNS_MESSAGE_SIZE
            } else {
                (client.rcv_buf_size as usize).min(ABSOLUTE_MAX_DNS_MESSAGE_DATA)
            }
        }
        // For TCP the limit comes from the 16-bit frame length, and the
        // absolute bound is below that already.
        Transport::Tcp => ABSOLUTE_MAX_DNS_MESSAGE_DATA,
    };
    debug!("assembling {} with limit {}", client.qname, data_limit);

    // Replies always echo the question as the client asked it.
    let question = Question {
        name: client.qname.clone(),
        qtype: client.qtype,
        qclass: client.live.qclass,
    };

    // After a PTR rewrite succeeded, the walk starts at the rewritten
    // in-addr.arpa name; otherwise at the client's own qname.
    let mut working: Name = if client.dns64 == Dns64State::PtrSuccess {
        client.live.name.clone()
    } else {
        client.qname.clone()
    };

    let mut writer = MessageWriter::new(client.msg_id, Default::default());
    writer
        .put_question(&question, ABSOLUTE_MAX_DNS_MESSAGE_DATA)
        .map_err(|e| {
            warn!("cannot emit question for {}: {}", client.qname, e);
            AssembleError::NoRecords
        })?;

    let mut matched = false;
    let mut soa: Option<Record> = None;
    let mut hops = 0;

    loop {
        let group = match host.cache_group(&working) {
            Some(group) => group,
            None => {
                debug!("no cache group for {}", working);
                return Err(AssembleError::NoRecords);
            }
        };

        let mut cname: Option<Name> = None;

        for entry in group {
            if entry.name() != &working || !entry.answers(client.live.qtype, client.live.qclass) {
                continue;
            }

            if !matched {
                // The first matching record carries the upstream's flags;
                // mirror the client's RD and CD onto them.
                writer.set_flags(entry.response_flags.mirror_request(client.request_flags));
                matched = true;

                if client.dns64 == Dns64State::PtrSuccess {
                    // Map the original ip6.arpa name onto the in-addr.arpa
                    // name the answers live under. RFC 6147 §5.3.1.
                    let link = Record {
                        name: client.qname.clone(),
                        class: Class::Internet,
                        ttl: 0,
                        rdata: RData::CNAME(client.live.name.clone()),
                    };
                    if writer.put_record(Section::Answer, &link, data_limit).is_err() {
                        return Ok(Assembly {
                            writer,
                            truncated: true,
                        });
                    }
                }
            }

            if let CacheData::Positive(record) = &entry.data {
                let age = now.saturating_sub(entry.time_received);
                let ttl = entry.original_ttl.saturating_sub(age.min(u64::from(u32::MAX)) as u32);

                let mut emit = record.clone();
                emit.ttl = ttl;

                if client.dns64 == Dns64State::AaaaSynthesis && record.rrtype() == Type::A {
                    // Substitute the synthesized AAAA for the A record.
                    match (dns64, &record.rdata) {
                        (Some(dns64), RData::A(v4)) => {
                            emit.rdata = RData::AAAA(dns64.prefix.synthesize(*v4));
                        }
                        _ => {
                            warn!("cannot synthesize AAAA for {}, skipping", record.name);
                            continue;
                        }
                    }
                }

                info!("answering {} with {}", client.qname, emit);
                if writer.put_record(Section::Answer, &emit, data_limit).is_err() {
                    return Ok(Assembly {
                        writer,
                        truncated: true,
                    });
                }
            }

            if let Some(side) = &entry.soa {
                soa = Some(side.clone());
            }

            // A CNAME answering a non-CNAME question means the chain
            // continues; finish this group, then walk the target.
            if entry.rrtype() == Type::CNAME && client.live.qtype != Type::CNAME {
                if let CacheData::Positive(Record {
                    rdata: RData::CNAME(target),
                    ..
                }) = &entry.data
                {
                    cname = Some(target.clone());
                }
            }
        }

        match cname {
            Some(target) => {
                hops += 1;
                if hops > MAX_CNAME_CHAIN {
                    warn!(
                        "not following CNAME to {} after {} links",
                        target, MAX_CNAME_CHAIN
                    );
                    break;
                }
                working = target;
            }
            None => break,
        }
    }

    if !matched {
        debug!("no records in cache answer {}", client.qname);
        return Err(AssembleError::NoRecords);
    }

    // The side SOA goes to the authority section once, with its stored TTL.
    if let Some(soa) = soa {
        info!("adding authority {}", soa);
        if writer.put_record(Section::Authority, &soa, data_limit).is_err() {
            return Ok(Assembly {
                writer,
                truncated: true,
            });
        }
    }

    if client.rcv_buf_size != 0 && writer.put_response_opt(data_limit).is_err() {
        return Ok(Assembly {
            writer,
            truncated: true,
        });
    }

    Ok(Assembly {
        writer,
        truncated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Client;
    use crate::resolver::{
        CacheEntry, InterfaceIndex, LiveQuestion, PlatformContext, QuestionPolicy, ReturnPath,
        SocketId,
    };
    use crate::resource::Soa;
    use crate::types::{Flags, Header, HEADER_SIZE};
    use pretty_assertions::assert_eq;
    use std::net::{IpAddr, Ipv4Addr};

    struct CacheOnlyHost {
        now: u64,
        groups: Vec<(Name, Vec<CacheEntry>)>,
    }

    impl ProxyHost for CacheOnlyHost {
        fn now(&self) -> u64 {
            self.now
        }

        fn cache_group(&self, name: &Name) -> Option<&[CacheEntry]> {
            self.groups
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, entries)| entries.as_slice())
        }

        fn start_question(&mut self, _token: crate::registry::ClientId, _q: &LiveQuestion) {}
        fn stop_question(&mut self, _token: crate::registry::ClientId) {}
        fn send_message(&mut self, _payload: &[u8], _route: &ReturnPath) {}
        fn dispose_context(&mut self, _context: PlatformContext) {}
    }

    fn udp_client(qname: &str, qtype: Type, rcv_buf_size: u16) -> Client {
        let name: Name = qname.parse().unwrap();
        Client {
            route: ReturnPath {
                transport: Transport::Udp,
                socket: SocketId(1),
                iface: InterfaceIndex(2),
                addr: IpAddr::from(Ipv4Addr::new(198, 51, 100, 1)),
                port: 5555,
            },
            msg_id: 0x1234,
            request_flags: Flags(0x0100),
            opt: None,
            rcv_buf_size,
            qname: name.clone(),
            qtype,
            live: LiveQuestion {
                name,
                qtype,
                qclass: Class::Internet,
                iface: InterfaceIndex(9),
                policy: QuestionPolicy::proxied(),
            },
            response_flags: Flags::default(),
            dns64: Dns64State::Initial,
            context: None,
        }
    }

    fn a_entry(name: &str, ttl: u32, received: u64, ip: [u8; 4]) -> CacheEntry {
        CacheEntry {
            data: CacheData::Positive(Record {
                name: name.parse().unwrap(),
                class: Class::Internet,
                ttl,
                rdata: RData::A(Ipv4Addr::from(ip)),
            }),
            original_ttl: ttl,
            time_received: received,
            response_flags: Flags(0x8180),
            soa: None,
        }
    }

    fn cname_entry(name: &str, target: &str) -> CacheEntry {
        CacheEntry {
            data: CacheData::Positive(Record {
                name: name.parse().unwrap(),
                class: Class::Internet,
                ttl: 300,
                rdata: RData::CNAME(target.parse().unwrap()),
            }),
            original_ttl: 300,
            time_received: 100,
            response_flags: Flags(0x8180),
            soa: None,
        }
    }

    fn group(name: &str, entries: Vec<CacheEntry>) -> (Name, Vec<CacheEntry>) {
        (name.parse().unwrap(), entries)
    }

    #[test]
    fn test_single_answer_with_aged_ttl() {
        let host = CacheOnlyHost {
            now: 110,
            groups: vec![group(
                "example.test.",
                vec![a_entry("example.test.", 60, 100, [203, 0, 113, 7])],
            )],
        };
        let client = udp_client("example.test.", Type::A, 0);

        let asm = assemble(&host, &client, None).unwrap();
        assert!(!asm.truncated);

        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        assert_eq!(h.answers, 1);
        assert_eq!(h.authorities, 0);
        assert_eq!(h.additionals, 0);
        assert!(msg.len() <= HEADER_SIZE + MIN_DNS_MESSAGE_SIZE);

        // TTL aged from 60 by the 10 seconds since receipt.
        let ttl_off = msg.len() - 10;
        assert_eq!(&msg[ttl_off..ttl_off + 4], &[0, 0, 0, 50]);
    }

    #[test]
    fn test_cname_chain_in_order() {
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![
                group("a.test.", vec![cname_entry("a.test.", "b.test.")]),
                group("b.test.", vec![a_entry("b.test.", 60, 100, [192, 0, 2, 1])]),
            ],
        };
        let client = udp_client("a.test.", Type::A, 1232);

        let asm = assemble(&host, &client, None).unwrap();
        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        assert_eq!(h.answers, 2);
        // EDNS client gets the response OPT.
        assert_eq!(h.additionals, 1);
    }

    #[test]
    fn test_no_records_is_an_error() {
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![],
        };
        let client = udp_client("missing.test.", Type::A, 0);
        assert_eq!(
            assemble(&host, &client, None).unwrap_err(),
            AssembleError::NoRecords
        );
    }

    #[test]
    fn test_group_without_matching_type_is_an_error() {
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![group(
                "a.test.",
                vec![a_entry("a.test.", 60, 100, [192, 0, 2, 1])],
            )],
        };
        let client = udp_client("a.test.", Type::MX, 0);
        assert_eq!(
            assemble(&host, &client, None).unwrap_err(),
            AssembleError::NoRecords
        );
    }

    #[test]
    fn test_negative_entry_shapes_reply_without_answers() {
        let soa = Record {
            name: "test.".parse().unwrap(),
            class: Class::Internet,
            ttl: 900,
            rdata: RData::SOA(Soa {
                mname: "ns.test.".parse().unwrap(),
                rname: "admin.test.".parse().unwrap(),
                serial: 1,
                refresh: 900,
                retry: 900,
                expire: 1800,
                minimum: 60,
            }),
        };
        let entry = CacheEntry {
            data: CacheData::Negative {
                name: "gone.test.".parse().unwrap(),
                rrtype: Type::A,
                class: Class::Internet,
            },
            original_ttl: 60,
            time_received: 100,
            response_flags: Flags(0x8183), // NXDomain from upstream
            soa: Some(soa),
        };
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![group("gone.test.", vec![entry])],
        };
        let client = udp_client("gone.test.", Type::A, 0);

        let asm = assemble(&host, &client, None).unwrap();
        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        assert_eq!(h.answers, 0);
        assert_eq!(h.authorities, 1);
        assert_eq!(h.flags.rcode(), Some(crate::types::Rcode::NXDomain));
        // RD mirrored from the request even though the cache agreed.
        assert!(h.flags.rd());
    }

    #[test]
    fn test_truncation_returns_safe_prefix() {
        // 30 A records cannot fit 512 bytes of data.
        let records: Vec<CacheEntry> = (0..30)
            .map(|i| a_entry("big.test.", 60, 100, [10, 0, 0, i as u8]))
            .collect();
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![group("big.test.", records)],
        };
        let mut client = udp_client("big.test.", Type::A, 0);
        client.rcv_buf_size = 0;

        // Shrink further via EDNS to force the cut early.
        client.rcv_buf_size = 100;
        let asm = assemble(&host, &client, None).unwrap();
        assert!(asm.truncated);

        let msg = asm.writer.finish();
        assert!(msg.len() <= HEADER_SIZE + 100);
        let h = Header::parse(&msg).unwrap();
        // Whatever was packed is whole records.
        assert!(h.answers > 0 && h.answers < 30);
    }

    #[test]
    fn test_cname_loop_stops_at_bound() {
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![
                group("x.test.", vec![cname_entry("x.test.", "y.test.")]),
                group("y.test.", vec![cname_entry("y.test.", "x.test.")]),
            ],
        };
        let client = udp_client("x.test.", Type::A, 4096);

        // Terminates despite the cycle, with one CNAME per hop taken.
        let asm = assemble(&host, &client, None).unwrap();
        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        assert_eq!(h.answers as usize, MAX_CNAME_CHAIN + 1);
    }

    #[test]
    fn test_aaaa_synthesis_rewrites_a_records() {
        use crate::dns64::Nat64Prefix;

        let host = CacheOnlyHost {
            now: 100,
            groups: vec![group(
                "host.test.",
                vec![a_entry("host.test.", 60, 100, [192, 0, 2, 33])],
            )],
        };
        let mut client = udp_client("host.test.", Type::AAAA, 0);
        client.live.qtype = Type::A;
        client.dns64 = Dns64State::AaaaSynthesis;

        let prefix =
            Nat64Prefix::new(&"64:ff9b::".parse::<std::net::Ipv6Addr>().unwrap().octets(), 96)
                .unwrap();
        let dns64 = Dns64Config {
            prefix,
            force_aaaa_synthesis: false,
        };

        let asm = assemble(&host, &client, Some(&dns64)).unwrap();
        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        assert_eq!(h.answers, 1);

        // The answer rdata is the synthesized IPv6 address.
        let rdata = &msg[msg.len() - 16..];
        assert_eq!(
            rdata,
            &"64:ff9b::c000:221"
                .parse::<std::net::Ipv6Addr>()
                .unwrap()
                .octets()[..]
        );
        // And the rdlength says 16.
        assert_eq!(&msg[msg.len() - 18..msg.len() - 16], &[0, 16]);
    }

    #[test]
    fn test_ptr_success_prepends_cname() {
        let v6name = "1.2.2.0.0.0.0.c.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.b.9.f.f.4.6.0.0.ip6.arpa.";
        let ptr = CacheEntry {
            data: CacheData::Positive(Record {
                name: "33.2.0.192.in-addr.arpa.".parse().unwrap(),
                class: Class::Internet,
                ttl: 60,
                rdata: RData::PTR("host.test.".parse().unwrap()),
            }),
            original_ttl: 60,
            time_received: 100,
            response_flags: Flags(0x8180),
            soa: None,
        };
        let host = CacheOnlyHost {
            now: 100,
            groups: vec![group("33.2.0.192.in-addr.arpa.", vec![ptr])],
        };

        let mut client = udp_client(v6name, Type::PTR, 0);
        client.live.name = "33.2.0.192.in-addr.arpa.".parse().unwrap();
        client.dns64 = Dns64State::PtrSuccess;

        let asm = assemble(&host, &client, None).unwrap();
        let msg = asm.writer.finish();
        let h = Header::parse(&msg).unwrap();
        // Synthetic CNAME first, then the PTR answer.
        assert_eq!(h.answers, 2);

        // The question echoes the ip6.arpa name the client asked.
        let (q, _) = crate::wire::parse_question(&msg).unwrap();
        assert_eq!(q.name.to_string(), v6name);
        assert_eq!(q.qtype, Type::PTR);
    }
}
