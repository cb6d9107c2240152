//! The message dispatcher: decode, authorize, route, reply.
//!
//! One dispatcher serves every connection of a switch. Messages from a
//! connection are handled in arrival order and replies go out in the same
//! order, so a barrier reply can be sent the moment the request is seen.
//! A handler either succeeds or returns one structured error; turning
//! errors into error replies (carrying the offending message's xid and
//! first bytes) happens in exactly one place here.

use bytes::BytesMut;

use crate::connection::{ConnId, ConnectionType};
use crate::message::*;
use crate::nicira::{self, NxStatsRequest};
use crate::ofp_header::OfpHeader;
use crate::ofp_message::{ActionEntryError, MatchEntryError, OfpSerializationError};
use crate::ofp_serialization::{self, VersionSet};
use crate::openflow0x01::FlowStats0x01;
use crate::pktbuf;
use crate::port_table::{OFPP_LOCAL, OFPP_MAX};
use crate::rate_limit::RateLimit;
use crate::switch::{Switch, SwitchError};

/// How many bytes of an offending request an error reply echoes back.
const ERROR_BODY_LIMIT: usize = 64;

/// Ceiling for one stats reply message, header included.
const STATS_REPLY_LIMIT: usize = 65535;

/// Map a decoder failure onto the on-wire error taxonomy.
pub fn error_type_of(err: &OfpSerializationError) -> ErrorType {
    match err {
        OfpSerializationError::IoError { .. } => ErrorType::BadRequest(BadRequest::BadLen),
        OfpSerializationError::BadLength { .. } => ErrorType::BadRequest(BadRequest::BadLen),
        OfpSerializationError::UnsupportedVersion { .. } => {
            ErrorType::BadRequest(BadRequest::BadVersion)
        }
        OfpSerializationError::UnsupportedMessageCode { .. } => {
            ErrorType::BadRequest(BadRequest::BadType)
        }
        OfpSerializationError::UnimplementedFeatureInVersion { .. } => {
            ErrorType::BadRequest(BadRequest::BadType)
        }
        OfpSerializationError::UnexpectedValueError { .. } => {
            ErrorType::BadRequest(BadRequest::BadType)
        }
        OfpSerializationError::BadMatchEntry { kind, .. } => ErrorType::BadMatch(match kind {
            MatchEntryError::BadField => BadMatch::BadField,
            MatchEntryError::BadPrereq => BadMatch::BadPrereq,
            MatchEntryError::DupField => BadMatch::DupField,
            MatchEntryError::BadValue => BadMatch::BadValue,
            MatchEntryError::BadMask => BadMatch::BadMask,
            MatchEntryError::BadLength => BadMatch::BadLen,
        }),
        OfpSerializationError::BadActionEntry { kind, .. } => ErrorType::BadAction(match kind {
            ActionEntryError::BadType => BadAction::BadType,
            ActionEntryError::BadLength => BadAction::BadLen,
            ActionEntryError::BadVendor => BadAction::BadVendor,
            ActionEntryError::BadVendorType => BadAction::BadVendorType,
            ActionEntryError::BadOutPort => BadAction::BadOutPort,
            ActionEntryError::BadArgument => BadAction::BadArgument,
            ActionEntryError::BadQueue => BadAction::BadQueue,
        }),
    }
}

pub struct Dispatcher {
    enabled: VersionSet,
    decode_rl: RateLimit,
    ignored_rl: RateLimit,
    io_rl: RateLimit,
}

impl Dispatcher {
    pub fn new(enabled: VersionSet) -> Dispatcher {
        Dispatcher {
            enabled,
            decode_rl: RateLimit::default(),
            ignored_rl: RateLimit::default(),
            io_rl: RateLimit::default(),
        }
    }

    /// Process complete messages buffered from one connection, in arrival
    /// order. Returns how many messages were consumed.
    pub fn run_connection(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        buffer: &mut BytesMut,
        now_ms: u64,
    ) -> usize {
        let mut handled = 0;
        loop {
            if buffer.len() < OfpHeader::size() {
                return handled;
            }
            let header = match OfpHeader::parse(&buffer[..OfpHeader::size()]) {
                Ok(header) => header,
                Err(_) => unreachable!("eight bytes always form a header"),
            };
            if header.length() < OfpHeader::size() {
                crate::warn_rl!(
                    self.decode_rl,
                    now_ms,
                    "conn {}: discarding frame with impossible length {}",
                    conn,
                    header.length()
                );
                buffer.clear();
                return handled;
            }
            if buffer.len() < header.length() {
                return handled;
            }
            let frame = buffer.split_to(header.length());
            self.handle_frame(sw, conn, &frame, now_ms);
            handled += 1;
        }
    }

    /// Decode and dispatch one framed message.
    pub fn handle_frame(&mut self, sw: &mut Switch, conn: ConnId, frame: &[u8], now_ms: u64) {
        let header = match OfpHeader::parse(frame) {
            Ok(header) => header,
            Err(e) => {
                crate::warn_rl!(self.decode_rl, now_ms, "conn {}: bad header: {}", conn, e);
                return;
            }
        };
        let xid = header.xid();
        let body = BytesMut::from(&frame[OfpHeader::size().min(frame.len())..]);
        let outcome = ofp_serialization::parse_with_versions(&header, &body, self.enabled)
            .map_err(|e| {
                crate::warn_rl!(self.decode_rl, now_ms, "conn {}: {}", conn, e);
                SwitchError::Of(error_type_of(&e))
            })
            .and_then(|(_, message)| self.handle_message(sw, conn, &header, message, now_ms));
        match outcome {
            Ok(()) => {}
            Err(SwitchError::Of(et)) => {
                let echo = frame[..frame.len().min(ERROR_BODY_LIMIT)].to_vec();
                send(sw, conn, xid, Message::Error(Error::Error(et, echo)));
            }
            Err(SwitchError::Io(e)) => {
                crate::warn_rl!(self.io_rl, now_ms, "conn {}: datapath error: {}", conn, e);
            }
        }
    }

    fn handle_message(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        header: &OfpHeader,
        message: Message,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        let xid = header.xid();
        match message {
            Message::Hello => self.handle_hello(sw, conn, header),
            Message::EchoRequest(payload) => {
                send(sw, conn, xid, Message::EchoReply(payload));
                Ok(())
            }
            Message::EchoReply(_) => Ok(()),
            Message::FeaturesReq => {
                let reply = features_reply(sw);
                send(sw, conn, xid, Message::FeaturesReply(reply));
                Ok(())
            }
            Message::GetConfigReq => {
                let config = SwitchConfig {
                    frag_policy: if sw.provider.get_drop_frags() {
                        FragPolicy::Drop
                    } else {
                        FragPolicy::Normal
                    },
                    miss_send_len: sw
                        .connmgr
                        .get(conn)
                        .map(|c| c.miss_send_len)
                        .unwrap_or(128),
                };
                send(sw, conn, xid, Message::GetConfigReply(config));
                Ok(())
            }
            Message::SetConfig(config) => {
                reject_slave_controller(sw, conn)?;
                sw.provider
                    .set_drop_frags(config.frag_policy == FragPolicy::Drop);
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.miss_send_len = config.miss_send_len;
                }
                Ok(())
            }
            Message::FlowMod(fm) => self.handle_flow_mod(sw, conn, fm, now_ms),
            Message::PacketOut(po) => {
                reject_slave_controller(sw, conn)?;
                let (packet, in_port) = match po.output_payload {
                    Payload::Buffered(id, _) => match sw.connmgr.get_mut(conn) {
                        Some(conn_state) => conn_state
                            .pktbuf
                            .retrieve(id)
                            .map_err(|code| SwitchError::Of(ErrorType::BadRequest(code)))?,
                        None => return Ok(()),
                    },
                    Payload::NotBuffered(data) => (data, po.port_id.unwrap_or(0)),
                };
                let in_port = po.port_id.unwrap_or(in_port);
                sw.provider
                    .packet_out(&po.apply_actions, &packet, Some(in_port))?;
                Ok(())
            }
            Message::PortMod(pm) => {
                reject_slave_controller(sw, conn)?;
                sw.apply_port_mod(&pm)
            }
            Message::BarrierRequest => {
                // Everything executes synchronously with respect to this
                // dispatcher, so the reply can go out immediately.
                send(sw, conn, xid, Message::BarrierReply);
                Ok(())
            }
            Message::StatsRequest(sr) => self.handle_stats_request(sw, conn, xid, sr, now_ms),
            Message::QueueGetConfigReq { port } => {
                if (port >= OFPP_MAX && port != OFPP_LOCAL) || !sw.ports.contains(port) {
                    return Err(SwitchError::Of(ErrorType::QueueOpFailed(
                        QueueOpFailed::BadPort,
                    )));
                }
                // No queues are configured through this switch.
                Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::BadType)))
            }
            Message::Vendor(nx) => self.handle_vendor(sw, conn, xid, nx, now_ms),
            // Messages only this side ever sends; receiving one back is a
            // controller bug.
            Message::StatsReply(_) => {
                Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::BadStat)))
            }
            other => {
                crate::warn_rl!(
                    self.ignored_rl,
                    now_ms,
                    "conn {}: unexpected message ignored: {:?}",
                    conn,
                    other
                );
                Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::BadType)))
            }
        }
    }

    fn handle_hello(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        header: &OfpHeader,
    ) -> Result<(), SwitchError> {
        let agreed = header.version().min(self.enabled.highest());
        if !self.enabled.contains(agreed) {
            return Err(SwitchError::Of(ErrorType::HelloFailed(
                HelloFailed::Incompatible,
            )));
        }
        if let Some(c) = sw.connmgr.get_mut(conn) {
            c.version = agreed;
        }
        Ok(())
    }

    fn handle_flow_mod(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        fm: FlowMod,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        reject_slave_controller(sw, conn)?;
        // The emergency flow cache is not supported; there is no good error
        // code for that, so report the table as full.
        if fm.emergency {
            return Err(SwitchError::Of(ErrorType::FlowModFailed(
                FlowModFailed::AllTablesFull,
            )));
        }
        match fm.command {
            FlowModCmd::AddFlow => sw.add_flow(Some(conn), &fm, now_ms),
            FlowModCmd::ModFlow => sw.modify_flows_loose(Some(conn), &fm, now_ms),
            FlowModCmd::ModStrictFlow => sw.modify_flow_strict(Some(conn), &fm, now_ms),
            FlowModCmd::DeleteFlow => {
                sw.delete_flows_loose(&fm, now_ms);
                Ok(())
            }
            FlowModCmd::DeleteStrictFlow => {
                sw.delete_flow_strict(&fm, now_ms);
                Ok(())
            }
        }
    }

    fn handle_vendor(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        xid: u32,
        nx: NxMessage,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        match nx {
            NxMessage::TunIdFromCookie(set) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.flow_format = if set {
                        FlowFormat::TunIdFromCookie
                    } else {
                        FlowFormat::OpenFlow10
                    };
                }
                Ok(())
            }
            NxMessage::RoleRequest(role) => {
                let conn_type = sw
                    .connmgr
                    .get(conn)
                    .map(|c| c.conn_type)
                    .unwrap_or(ConnectionType::Service);
                if conn_type != ConnectionType::Primary {
                    crate::warn_rl!(
                        self.ignored_rl,
                        now_ms,
                        "conn {}: ignoring role request on service connection",
                        conn
                    );
                    return Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::EPerm)));
                }
                if role == ControllerRole::Master {
                    // At most one master: demote any other master to slave.
                    for other in sw.connmgr.iter_mut() {
                        if other.id != conn && other.role == ControllerRole::Master {
                            other.role = ControllerRole::Slave;
                        }
                    }
                }
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.role = role;
                }
                send(sw, conn, xid, Message::Vendor(NxMessage::RoleReply(role)));
                Ok(())
            }
            NxMessage::SetFlowFormat(format) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.flow_format = format;
                }
                Ok(())
            }
            NxMessage::FlowMod(fm) => self.handle_flow_mod(sw, conn, fm, now_ms),
            NxMessage::FlowModTableId(set) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.flow_mod_table_id = set;
                }
                Ok(())
            }
            NxMessage::SetPacketInFormat(format) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.packet_in_format = format;
                }
                Ok(())
            }
            NxMessage::SetControllerId(id) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.controller_id = id;
                }
                Ok(())
            }
            NxMessage::SetAsyncConfig(config) => {
                if let Some(c) = sw.connmgr.get_mut(conn) {
                    c.async_config = config;
                }
                Ok(())
            }
            NxMessage::FlowAge => Ok(()),
            // Switch-to-controller messages bounced back at us.
            NxMessage::RoleReply(_) | NxMessage::FlowRemoved(_) | NxMessage::PacketIn(_) => {
                Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::BadSubType)))
            }
        }
    }

    fn handle_stats_request(
        &mut self,
        sw: &mut Switch,
        conn: ConnId,
        xid: u32,
        sr: StatsReq,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        match sr.body {
            StatsReqBody::DescBody => {
                let d = sw.descriptions.clone();
                send(
                    sw,
                    conn,
                    xid,
                    Message::StatsReply(StatsResp {
                        req_type: StatsReqType::Desc,
                        flags: 0,
                        body: StatsRespBody::DescBody {
                            manufacturer_desc: d.manufacturer,
                            hardware_desc: d.hardware,
                            software_desc: d.software,
                            serial_number: d.serial,
                            datapath_desc: d.datapath,
                        },
                    }),
                );
                Ok(())
            }
            StatsReqBody::FlowStatsBody {
                pattern,
                table_id,
                out_port,
            } => {
                if sr.req_type == StatsReqType::Aggregate {
                    let (packet_count, byte_count, flow_count) =
                        sw.aggregate_stats(&pattern, out_port, table_id, now_ms);
                    send(
                        sw,
                        conn,
                        xid,
                        Message::StatsReply(StatsResp {
                            req_type: StatsReqType::Aggregate,
                            flags: 0,
                            body: StatsRespBody::AggregateStatsBody {
                                packet_count,
                                byte_count,
                                flow_count,
                            },
                        }),
                    );
                } else {
                    let entries = sw.collect_flow_stats(&pattern, out_port, table_id, now_ms);
                    for reply in chunk_flow_stats(entries) {
                        send(sw, conn, xid, Message::StatsReply(reply));
                    }
                }
                Ok(())
            }
            StatsReqBody::TableBody => {
                let reply = StatsResp {
                    req_type: StatsReqType::Table,
                    flags: 0,
                    body: StatsRespBody::TableBody {
                        table_stats: vec![TableStats {
                            table_id: 0,
                            name: "classifier".to_string(),
                            wildcards: Wildcards::all(),
                            max_entries: 1024 * 1024,
                            active_count: sw.classifier.len() as u32,
                            lookup_count: 0,
                            matched_count: 0,
                        }],
                    },
                };
                send(sw, conn, xid, Message::StatsReply(reply));
                Ok(())
            }
            StatsReqBody::PortBody { port_no } => {
                let targets: Vec<u16> = if port_no == crate::port_table::OFPP_NONE
                    || port_no == 0xfffc
                {
                    sw.ports.numbers()
                } else if sw.ports.contains(port_no) {
                    vec![port_no]
                } else {
                    Vec::new()
                };
                let mut port_stats = Vec::new();
                for number in targets {
                    let port = sw.ports.get(number).unwrap();
                    let mut stats =
                        sw.provider
                            .netdev_get_stats(&port.netdev)
                            .unwrap_or(PortStats {
                                port_no: number,
                                packets: TransmissionCounter { rx: 0, tx: 0 },
                                bytes: TransmissionCounter { rx: 0, tx: 0 },
                                dropped: TransmissionCounter { rx: 0, tx: 0 },
                                errors: TransmissionCounter { rx: 0, tx: 0 },
                                rx_frame_errors: 0,
                                rx_over_errors: 0,
                                rx_crc_errors: 0,
                                collisions: 0,
                            });
                    stats.port_no = number;
                    port_stats.push(stats);
                }
                send(
                    sw,
                    conn,
                    xid,
                    Message::StatsReply(StatsResp {
                        req_type: StatsReqType::Port,
                        flags: 0,
                        body: StatsRespBody::PortBody { port_stats },
                    }),
                );
                Ok(())
            }
            StatsReqBody::QueueBody { port_no, .. } => {
                let port_ok = port_no == crate::port_table::OFPP_NONE
                    || port_no == 0xfffc
                    || sw.ports.contains(port_no);
                if !port_ok {
                    return Err(SwitchError::Of(ErrorType::QueueOpFailed(
                        QueueOpFailed::BadPort,
                    )));
                }
                // No queues are configured; an empty reply is the answer.
                send(
                    sw,
                    conn,
                    xid,
                    Message::StatsReply(StatsResp {
                        req_type: StatsReqType::Queue,
                        flags: 0,
                        body: StatsRespBody::QueueBody {
                            queue_stats: Vec::new(),
                        },
                    }),
                );
                Ok(())
            }
            StatsReqBody::VendorBody { vendor, body } => {
                if vendor != nicira::NX_VENDOR_ID {
                    return Err(SwitchError::Of(ErrorType::BadRequest(
                        BadRequest::BadVendor,
                    )));
                }
                let request = nicira::parse_nx_stats_request(&body)
                    .map_err(|e| SwitchError::Of(error_type_of(&e)))?;
                match request {
                    NxStatsRequest::Flow {
                        pattern,
                        out_port,
                        table_id,
                    } => {
                        let entries = sw.collect_flow_stats(&pattern, out_port, table_id, now_ms);
                        for reply in chunk_nx_flow_stats(entries)
                            .map_err(SwitchError::Of)?
                        {
                            send(sw, conn, xid, Message::StatsReply(reply));
                        }
                        Ok(())
                    }
                    NxStatsRequest::Aggregate {
                        pattern,
                        out_port,
                        table_id,
                    } => {
                        let (packets, bytes, flows) =
                            sw.aggregate_stats(&pattern, out_port, table_id, now_ms);
                        let mut reply_body = nicira::nx_stats_reply_prefix(nicira::NXST_AGGREGATE);
                        reply_body.extend_from_slice(&packets.to_be_bytes());
                        reply_body.extend_from_slice(&bytes.to_be_bytes());
                        reply_body.extend_from_slice(&flows.to_be_bytes());
                        reply_body.extend_from_slice(&[0; 4]);
                        send(
                            sw,
                            conn,
                            xid,
                            Message::StatsReply(StatsResp {
                                req_type: StatsReqType::Vendor,
                                flags: 0,
                                body: StatsRespBody::VendorBody {
                                    vendor: nicira::NX_VENDOR_ID,
                                    body: reply_body,
                                },
                            }),
                        );
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Queue a reply on a connection (no-op when it disconnected mid-dispatch).
fn send(sw: &mut Switch, conn: ConnId, xid: u32, message: Message) {
    if let Some(c) = sw.connmgr.get_mut(conn) {
        c.send(xid, message);
    }
}

/// Mutating requests from a primary connection in the slave role are
/// rejected; service connections are exempt.
fn reject_slave_controller(sw: &Switch, conn: ConnId) -> Result<(), SwitchError> {
    match sw.connmgr.get(conn) {
        Some(c)
            if c.conn_type == ConnectionType::Primary && c.role == ControllerRole::Slave =>
        {
            Err(SwitchError::Of(ErrorType::BadRequest(BadRequest::EPerm)))
        }
        _ => Ok(()),
    }
}

fn features_reply(sw: &Switch) -> SwitchFeatures {
    SwitchFeatures {
        datapath_id: sw.datapath_id,
        num_buffers: pktbuf::PacketBuffers::capacity() as u32,
        num_tables: 2,
        supported_capabilities: Capabilities {
            flow_stats: true,
            table_stats: true,
            port_stats: true,
            stp: false,
            ip_reasm: false,
            queue_stats: false,
            arp_match_ip: true,
        },
        supported_actions: Some(SupportedActions::all()),
        ports: Some(sw.ports.iter().map(|p| p.desc.clone()).collect()),
    }
}

/// Split flow-stats entries across replies so no message exceeds the
/// 16-bit length limit; every reply but the last carries the MORE flag.
fn chunk_flow_stats(entries: Vec<FlowStats>) -> Vec<StatsResp> {
    let mut chunks: Vec<Vec<FlowStats>> = vec![Vec::new()];
    let mut used = 12; // header + stats reply prefix
    for entry in entries {
        let size = FlowStats0x01::size_of(&entry);
        if used + size > STATS_REPLY_LIMIT && !chunks.last().unwrap().is_empty() {
            chunks.push(Vec::new());
            used = 12;
        }
        used += size;
        chunks.last_mut().unwrap().push(entry);
    }
    let n = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, flow_stats)| StatsResp {
            req_type: StatsReqType::Flow,
            flags: if i + 1 < n { STATS_REPLY_MORE } else { 0 },
            body: StatsRespBody::FlowStatsBody { flow_stats },
        })
        .collect()
}

/// The NXM equivalent: entries are marshaled eagerly since their size
/// depends on the match encoding.
fn chunk_nx_flow_stats(entries: Vec<FlowStats>) -> Result<Vec<StatsResp>, ErrorType> {
    let mut bodies: Vec<Vec<u8>> = vec![nicira::nx_stats_reply_prefix(nicira::NXST_FLOW)];
    for entry in entries {
        let mut scratch = Vec::new();
        nicira::put_nx_flow_stats(&mut scratch, &entry)
            .map_err(|e| error_type_of(&e))?;
        let last = bodies.last_mut().unwrap();
        if 12 + last.len() + scratch.len() > STATS_REPLY_LIMIT && last.len() > 8 {
            bodies.push(nicira::nx_stats_reply_prefix(nicira::NXST_FLOW));
        }
        bodies.last_mut().unwrap().extend_from_slice(&scratch);
    }
    let n = bodies.len();
    Ok(bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| StatsResp {
            req_type: StatsReqType::Vendor,
            flags: if i + 1 < n { STATS_REPLY_MORE } else { 0 },
            body: StatsRespBody::VendorBody {
                vendor: nicira::NX_VENDOR_ID,
                body,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::testing::TestDatapath;
    use crate::message::{Action, Mask, PseudoPort};
    use crate::ofp_header::OPENFLOW_0_01_VERSION;
    use crate::ofp_serialization::marshal;
    use crate::openflow0x01::{OfpPort, ALL_TABLES};

    fn setup(name: &str) -> (Dispatcher, Switch, ConnId) {
        let mut sw = Switch::create(name, "system", Box::new(TestDatapath::new())).unwrap();
        let conn = sw.connect_controller(ConnectionType::Primary);
        (Dispatcher::new(VersionSet::all()), sw, conn)
    }

    fn frame(xid: u32, message: Message) -> Vec<u8> {
        marshal(OPENFLOW_0_01_VERSION, xid, message).unwrap()
    }

    fn replies(sw: &mut Switch, conn: ConnId) -> Vec<Message> {
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        frames
            .into_iter()
            .map(|data| {
                let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
                let body = BytesMut::from(&data[OfpHeader::size()..]);
                ofp_serialization::parse(&header, &body).unwrap().1
            })
            .collect()
    }

    fn ip_pattern(prefix: u32, wild_bits: Option<u32>) -> Pattern {
        let mut p = Pattern::match_all();
        p.dl_typ = Some(0x0800);
        p.nw_src = Some(Mask {
            value: prefix,
            mask: wild_bits,
        });
        p
    }

    fn add_flow_mod(prio: u16, pattern: Pattern, out: u16) -> Message {
        Message::FlowMod(FlowMod::add_flow(
            prio,
            pattern,
            vec![Action::Output(PseudoPort::PhysicalPort(out))],
        ))
    }

    #[test]
    fn echo_is_answered_with_same_xid_and_payload() {
        let (mut dispatcher, mut sw, conn) = setup("h-echo");
        let request = frame(0x55, Message::EchoRequest(vec![1, 2, 3]));
        dispatcher.handle_frame(&mut sw, conn, &request, 0);
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        assert_eq!(frames.len(), 1);
        let header = OfpHeader::parse(&frames[0][..8]).unwrap();
        assert_eq!(header.xid(), 0x55);
        assert_eq!(&frames[0][8..], &[1, 2, 3]);
        assert_eq!(frames[0][1], 3); // OFPT_ECHO_REPLY
    }

    #[test]
    fn barrier_reply_is_immediate() {
        let (mut dispatcher, mut sw, conn) = setup("h-barrier");
        dispatcher.handle_frame(&mut sw, conn, &frame(9, Message::BarrierRequest), 0);
        assert_eq!(replies(&mut sw, conn), vec![Message::BarrierReply]);
    }

    #[test]
    fn features_reply_carries_datapath_id() {
        let (mut dispatcher, mut sw, conn) = setup("h-features");
        sw.set_datapath_id(0xaabb);
        dispatcher.handle_frame(&mut sw, conn, &frame(1, Message::FeaturesReq), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::FeaturesReply(sf)] => {
                assert_eq!(sf.datapath_id, 0xaabb);
                assert!(sf.supported_capabilities.flow_stats);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn flow_mod_installs_through_the_wire() {
        let (mut dispatcher, mut sw, conn) = setup("h-flowmod");
        let msg = add_flow_mod(100, ip_pattern(0x0a000001, None), 2);
        dispatcher.handle_frame(&mut sw, conn, &frame(2, msg), 0);
        assert!(replies(&mut sw, conn).is_empty());
        assert_eq!(sw.classifier.len(), 1);
    }

    #[test]
    fn slave_is_rejected_then_master_succeeds() {
        let (mut dispatcher, mut sw, conn) = setup("h-slave");
        let fm = frame(3, add_flow_mod(100, ip_pattern(1, None), 2));

        // Become a slave, then try to mutate.
        let role = frame(
            4,
            Message::Vendor(NxMessage::RoleRequest(ControllerRole::Slave)),
        );
        dispatcher.handle_frame(&mut sw, conn, &role, 0);
        assert_eq!(
            replies(&mut sw, conn),
            vec![Message::Vendor(NxMessage::RoleReply(ControllerRole::Slave))]
        );
        dispatcher.handle_frame(&mut sw, conn, &fm, 0);
        match &replies(&mut sw, conn)[..] {
            [Message::Error(Error::Error(ErrorType::BadRequest(BadRequest::EPerm), echoed))] => {
                assert_eq!(&echoed[..], &fm[..fm.len().min(64)]);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
        assert!(sw.classifier.is_empty());

        // Same connection, promoted to master: the same flow mod succeeds.
        let role = frame(
            5,
            Message::Vendor(NxMessage::RoleRequest(ControllerRole::Master)),
        );
        dispatcher.handle_frame(&mut sw, conn, &role, 0);
        dispatcher.handle_frame(&mut sw, conn, &fm, 0);
        assert_eq!(sw.classifier.len(), 1);
    }

    #[test]
    fn service_connections_are_exempt_from_slave_checks() {
        let (mut dispatcher, mut sw, _conn) = setup("h-service");
        let service = sw.connect_controller(ConnectionType::Service);
        sw.connmgr.get_mut(service).unwrap().role = ControllerRole::Slave;
        let fm = frame(3, add_flow_mod(100, ip_pattern(1, None), 2));
        dispatcher.handle_frame(&mut sw, service, &fm, 0);
        assert_eq!(sw.classifier.len(), 1);
    }

    #[test]
    fn overlap_error_reaches_the_offender_only() {
        let (mut dispatcher, mut sw, conn) = setup("h-overlap");
        let other = sw.connect_controller(ConnectionType::Primary);
        let wide = add_flow_mod(100, ip_pattern(0x0a000000, Some(8)), 2);
        dispatcher.handle_frame(&mut sw, conn, &frame(1, wide), 0);
        let mut narrow = FlowMod::add_flow(
            100,
            ip_pattern(0x0a000001, None),
            vec![Action::Output(PseudoPort::PhysicalPort(3))],
        );
        narrow.check_overlap = true;
        dispatcher.handle_frame(&mut sw, conn, &frame(2, Message::FlowMod(narrow)), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::Error(Error::Error(
                ErrorType::FlowModFailed(FlowModFailed::Overlap),
                _,
            ))] => {}
            other => panic!("unexpected replies: {:?}", other),
        }
        assert!(replies(&mut sw, other).is_empty());
        assert_eq!(sw.classifier.len(), 1);
    }

    #[test]
    fn malformed_flow_mod_leaves_table_untouched() {
        let (mut dispatcher, mut sw, conn) = setup("h-malformed");
        let mut data = frame(7, add_flow_mod(10, ip_pattern(1, None), 1));
        // Corrupt the action type in place.
        let actions_off = data.len() - 8;
        data[actions_off] = 0x77;
        data[actions_off + 1] = 0x77;
        dispatcher.handle_frame(&mut sw, conn, &data, 0);
        match &replies(&mut sw, conn)[..] {
            [Message::Error(Error::Error(ErrorType::BadAction(BadAction::BadType), echoed))] => {
                assert_eq!(echoed.len(), 64);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
        assert!(sw.classifier.is_empty());
    }

    #[test]
    fn packet_out_with_unknown_buffer_reports_and_drops() {
        let (mut dispatcher, mut sw, conn) = setup("h-pktout");
        let po = Message::PacketOut(PacketOut {
            output_payload: Payload::Buffered(0x1234, vec![]),
            port_id: Some(1),
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(6, po), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::Error(Error::Error(ErrorType::BadRequest(code), _))] => {
                assert!(matches!(
                    code,
                    BadRequest::BufferEmpty | BadRequest::BufferUnknown
                ));
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn buffered_flow_mod_executes_stored_packet() {
        let dp = TestDatapath::new();
        let state = dp.handle();
        let mut sw = Switch::create("h-buffered", "system", Box::new(dp)).unwrap();
        let conn = sw.connect_controller(ConnectionType::Primary);
        let mut dispatcher = Dispatcher::new(VersionSet::all());

        // Punt a packet so the connection holds a buffer.
        sw.connmgr.get_mut(conn).unwrap().miss_send_len = 4;
        let packet: Vec<u8> = (0..16).collect();
        sw.deliver_packet_in(&packet, 3, PacketInReason::NoMatch);
        let punt = replies(&mut sw, conn);
        let buffer_id = match &punt[..] {
            [Message::PacketIn(pi)] => match pi.input_payload {
                Payload::Buffered(id, _) => id,
                _ => panic!("expected a buffered packet-in"),
            },
            other => panic!("unexpected replies: {:?}", other),
        };

        let mut fm = FlowMod::add_flow(
            50,
            Pattern::match_all(),
            vec![Action::Output(PseudoPort::PhysicalPort(1))],
        );
        fm.apply_to_packet = Some(buffer_id);
        dispatcher.handle_frame(&mut sw, conn, &frame(8, Message::FlowMod(fm)), 0);
        assert_eq!(state.borrow().executed, vec![(packet, 3)]);
    }

    #[test]
    fn desc_stats_reflect_configured_descriptions() {
        let (mut dispatcher, mut sw, conn) = setup("h-desc");
        sw.set_descriptions(Some("acme"), None, None, Some("sn-1"), None);
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Desc,
            flags: 0,
            body: StatsReqBody::DescBody,
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(1, req), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::StatsReply(StatsResp {
                body:
                    StatsRespBody::DescBody {
                        manufacturer_desc,
                        serial_number,
                        ..
                    },
                ..
            })] => {
                assert_eq!(manufacturer_desc, "acme");
                assert_eq!(serial_number, "sn-1");
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn flow_stats_roundtrip_through_the_wire() {
        let (mut dispatcher, mut sw, conn) = setup("h-flowstats");
        dispatcher.handle_frame(
            &mut sw,
            conn,
            &frame(1, add_flow_mod(100, ip_pattern(0x0a000001, None), 2)),
            0,
        );
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Flow,
            flags: 0,
            body: StatsReqBody::FlowStatsBody {
                pattern: Pattern::match_all(),
                table_id: ALL_TABLES,
                out_port: OfpPort::OFPPNone as u16,
            },
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(2, req), 1_000);
        match &replies(&mut sw, conn)[..] {
            [Message::StatsReply(StatsResp {
                flags,
                body: StatsRespBody::FlowStatsBody { flow_stats },
                ..
            })] => {
                assert_eq!(*flags, 0);
                assert_eq!(flow_stats.len(), 1);
                assert_eq!(flow_stats[0].priority, 100);
                assert_eq!(flow_stats[0].duration_sec, 1);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn oversized_flow_stats_are_chunked_with_more_flag() {
        let (mut dispatcher, mut sw, conn) = setup("h-chunk");
        for i in 0..800u32 {
            let pattern = ip_pattern(0x0a000000 + i, None);
            sw.add_flow(None, &FlowMod::add_flow(10, pattern, vec![]), 0)
                .unwrap();
        }
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Flow,
            flags: 0,
            body: StatsReqBody::FlowStatsBody {
                pattern: Pattern::match_all(),
                table_id: ALL_TABLES,
                out_port: OfpPort::OFPPNone as u16,
            },
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(2, req), 0);
        let messages = replies(&mut sw, conn);
        assert!(messages.len() >= 2, "expected chunked replies");
        let mut total = 0;
        for (i, message) in messages.iter().enumerate() {
            match message {
                Message::StatsReply(StatsResp { flags, body, .. }) => {
                    if i + 1 < messages.len() {
                        assert_eq!(*flags, STATS_REPLY_MORE);
                    } else {
                        assert_eq!(*flags, 0);
                    }
                    if let StatsRespBody::FlowStatsBody { flow_stats } = body {
                        total += flow_stats.len();
                    }
                }
                other => panic!("unexpected reply: {:?}", other),
            }
        }
        assert_eq!(total, 800);
    }

    #[test]
    fn invalid_table_id_yields_empty_results_not_error() {
        let (mut dispatcher, mut sw, conn) = setup("h-badtable");
        dispatcher.handle_frame(
            &mut sw,
            conn,
            &frame(1, add_flow_mod(100, ip_pattern(1, None), 2)),
            0,
        );
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Flow,
            flags: 0,
            body: StatsReqBody::FlowStatsBody {
                pattern: Pattern::match_all(),
                table_id: 7,
                out_port: OfpPort::OFPPNone as u16,
            },
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(2, req), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::StatsReply(StatsResp {
                body: StatsRespBody::FlowStatsBody { flow_stats },
                ..
            })] => assert!(flow_stats.is_empty()),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn table_stats_name_the_classifier() {
        let (mut dispatcher, mut sw, conn) = setup("h-tablestats");
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Table,
            flags: 0,
            body: StatsReqBody::TableBody,
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(3, req), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::StatsReply(StatsResp {
                body: StatsRespBody::TableBody { table_stats },
                ..
            })] => {
                assert_eq!(table_stats.len(), 1);
                assert_eq!(table_stats[0].name, "classifier");
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn queue_stats_for_unknown_port_fail_with_bad_port() {
        let (mut dispatcher, mut sw, conn) = setup("h-queue");
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Queue,
            flags: 0,
            body: StatsReqBody::QueueBody {
                port_no: 42,
                queue_id: 0xffffffff,
            },
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(4, req), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::Error(Error::Error(
                ErrorType::QueueOpFailed(QueueOpFailed::BadPort),
                _,
            ))] => {}
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn nx_flow_stats_return_vendor_reply() {
        let (mut dispatcher, mut sw, conn) = setup("h-nxstats");
        dispatcher.handle_frame(
            &mut sw,
            conn,
            &frame(1, add_flow_mod(100, ip_pattern(0x0a000001, None), 2)),
            0,
        );
        let body = nicira::marshal_nx_stats_request(&NxStatsRequest::Flow {
            pattern: Pattern::match_all(),
            out_port: OfpPort::OFPPNone as u16,
            table_id: ALL_TABLES,
        });
        let req = Message::StatsRequest(StatsReq {
            req_type: StatsReqType::Vendor,
            flags: 0,
            body: StatsReqBody::VendorBody {
                vendor: nicira::NX_VENDOR_ID,
                body,
            },
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(2, req), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::StatsReply(StatsResp {
                body: StatsRespBody::VendorBody { vendor, body },
                ..
            })] => {
                assert_eq!(*vendor, nicira::NX_VENDOR_ID);
                let entries = nicira::parse_nx_flow_stats(body).unwrap();
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].priority, 100);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn set_config_updates_frag_policy_and_miss_send_len() {
        let (mut dispatcher, mut sw, conn) = setup("h-config");
        let set = Message::SetConfig(SwitchConfig {
            frag_policy: FragPolicy::Drop,
            miss_send_len: 64,
        });
        dispatcher.handle_frame(&mut sw, conn, &frame(1, set), 0);
        assert!(sw.provider.get_drop_frags());
        assert_eq!(sw.connmgr.get(conn).unwrap().miss_send_len, 64);
        dispatcher.handle_frame(&mut sw, conn, &frame(2, Message::GetConfigReq), 0);
        match &replies(&mut sw, conn)[..] {
            [Message::GetConfigReply(config)] => {
                assert_eq!(config.frag_policy, FragPolicy::Drop);
                assert_eq!(config.miss_send_len, 64);
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn hello_negotiates_the_common_version() {
        let (mut dispatcher, mut sw, conn) = setup("h-hello");
        let hello = marshal(crate::ofp_header::OPENFLOW_0_03_VERSION, 1, Message::Hello).unwrap();
        dispatcher.handle_frame(&mut sw, conn, &hello, 0);
        assert_eq!(
            sw.connmgr.get(conn).unwrap().version,
            crate::ofp_header::OPENFLOW_0_03_VERSION
        );
        // Replies now encode in the negotiated dialect.
        dispatcher.handle_frame(
            &mut sw,
            conn,
            &marshal(
                crate::ofp_header::OPENFLOW_0_03_VERSION,
                2,
                Message::BarrierRequest,
            )
            .unwrap(),
            0,
        );
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        assert_eq!(frames[0][0], crate::ofp_header::OPENFLOW_0_03_VERSION);
    }

    #[test]
    fn run_connection_frames_the_stream() {
        let (mut dispatcher, mut sw, conn) = setup("h-stream");
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&frame(1, Message::EchoRequest(vec![1])));
        let second = frame(2, Message::BarrierRequest);
        buffer.extend_from_slice(&second[..5]);
        assert_eq!(dispatcher.run_connection(&mut sw, conn, &mut buffer, 0), 1);
        buffer.extend_from_slice(&second[5..]);
        assert_eq!(dispatcher.run_connection(&mut sw, conn, &mut buffer, 0), 1);
        assert_eq!(
            replies(&mut sw, conn),
            vec![Message::EchoReply(vec![1]), Message::BarrierReply]
        );
    }

    #[test]
    fn nx_flow_mod_with_nxm_match_installs() {
        let (mut dispatcher, mut sw, conn) = setup("h-nxflowmod");
        let mut pattern = Pattern::match_all();
        pattern.tun_id = Some(Mask::exact(0x42));
        let fm = FlowMod::add_flow(
            200,
            pattern.clone(),
            vec![Action::Output(PseudoPort::PhysicalPort(1))],
        );
        let msg = Message::Vendor(NxMessage::FlowMod(fm));
        dispatcher.handle_frame(&mut sw, conn, &frame(5, msg), 0);
        assert!(sw.classifier.find_exactly(&pattern, 200).is_some());
    }
}
