//! Wire-independent message model shared by every protocol dialect.
//!
//! The structures here carry the decoded form of OpenFlow messages; the
//! `openflow0x0*` modules translate them to and from the per-version wire
//! layouts, and the switch core consumes them directly.

/// Per-field wildcard bits of an OpenFlow 1.0 match.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Wildcards {
    pub in_port: bool,
    pub dl_vlan: bool,
    pub dl_src: bool,
    pub dl_dst: bool,
    pub dl_type: bool,
    pub nw_proto: bool,
    pub tp_src: bool,
    pub tp_dst: bool,
    pub nw_src: u32,
    pub nw_dst: u32,
    pub dl_vlan_pcp: bool,
    pub nw_tos: bool,
}

impl Wildcards {
    fn mask_bits(x: &Option<Mask<u32>>) -> u32 {
        match *x {
            None => 32,
            Some(ref x) => x.mask.unwrap_or(0),
        }
    }

    pub fn all() -> Wildcards {
        Pattern::wildcards_of_pattern(&Pattern::match_all())
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    pub fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    pub fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// A field value with an optional wildcarding mask.
///
/// For the IPv4 and IPv6 address fields the mask counts *wildcarded low
/// bits* (the OpenFlow 1.0 wire convention): `None` means an exact match and
/// `Some(8)` matches a /24. For the NXM register and tunnel-id fields the
/// mask is a plain bitmask of the significant bits.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Mask<T> {
    pub value: T,
    pub mask: Option<T>,
}

impl<T> Mask<T> {
    pub fn exact(value: T) -> Mask<T> {
        Mask { value, mask: None }
    }

    pub fn masked(value: T, mask: T) -> Mask<T> {
        Mask {
            value,
            mask: Some(mask),
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

/// Actions supported by the datapath.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupportedActions {
    pub output: bool,
    pub set_vlan_id: bool,
    pub set_vlan_pcp: bool,
    pub strip_vlan: bool,
    pub set_dl_src: bool,
    pub set_dl_dst: bool,
    pub set_nw_src: bool,
    pub set_nw_dst: bool,
    pub set_nw_tos: bool,
    pub set_tp_src: bool,
    pub set_tp_dst: bool,
    pub enqueue: bool,
    pub vendor: bool,
}

impl SupportedActions {
    /// The action set this switch advertises in its features reply.
    pub fn all() -> SupportedActions {
        SupportedActions {
            output: true,
            set_vlan_id: true,
            set_vlan_pcp: true,
            strip_vlan: true,
            set_dl_src: true,
            set_dl_dst: true,
            set_nw_src: true,
            set_nw_dst: true,
            set_nw_tos: true,
            set_tp_src: true,
            set_tp_dst: true,
            enqueue: true,
            vendor: true,
        }
    }
}

/// Switch features reported in a `FEATURES_REPLY`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: Option<SupportedActions>,
    pub ports: Option<Vec<PortDesc>>,
}

/// Fields to match against flows.
///
/// The OpenFlow 1.0 12-tuple in `Option`-per-field form, extended with the
/// Nicira vendor match fields. A `None` field is wildcarded.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<u64>,
    pub dl_dst: Option<u64>,
    pub dl_typ: Option<u16>,
    /// Outer `None` wildcards the field; inner `None` matches untagged frames.
    pub dl_vlan: Option<Option<u16>>,
    pub dl_vlan_pcp: Option<u8>,
    pub nw_src: Option<Mask<u32>>,
    pub nw_dst: Option<Mask<u32>>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    // Nicira extension fields.
    pub tun_id: Option<Mask<u64>>,
    pub regs: [Option<Mask<u32>>; 4],
    pub arp_sha: Option<u64>,
    pub arp_tha: Option<u64>,
    pub ipv6_src: Option<Mask<u128>>,
    pub ipv6_dst: Option<Mask<u128>>,
    pub nd_target: Option<u128>,
    pub ip_frag: Option<u8>,
    pub mpls_label: Option<u32>,
    pub mpls_tc: Option<u8>,
}

impl Pattern {
    pub fn match_all() -> Pattern {
        Pattern {
            in_port: None,
            dl_src: None,
            dl_dst: None,
            dl_typ: None,
            dl_vlan: None,
            dl_vlan_pcp: None,
            nw_src: None,
            nw_dst: None,
            nw_proto: None,
            nw_tos: None,
            tp_src: None,
            tp_dst: None,
            tun_id: None,
            regs: [None; 4],
            arp_sha: None,
            arp_tha: None,
            ipv6_src: None,
            ipv6_dst: None,
            nd_target: None,
            ip_frag: None,
            mpls_label: None,
            mpls_tc: None,
        }
    }

    pub fn wildcards_of_pattern(m: &Pattern) -> Wildcards {
        Wildcards {
            in_port: m.in_port.is_none(),
            dl_vlan: m.dl_vlan.is_none(),
            dl_src: m.dl_src.is_none(),
            dl_dst: m.dl_dst.is_none(),
            dl_type: m.dl_typ.is_none(),
            nw_proto: m.nw_proto.is_none(),
            tp_src: m.tp_src.is_none(),
            tp_dst: m.tp_dst.is_none(),
            nw_src: Wildcards::mask_bits(&m.nw_src),
            nw_dst: Wildcards::mask_bits(&m.nw_dst),
            dl_vlan_pcp: m.dl_vlan_pcp.is_none(),
            nw_tos: m.nw_tos.is_none(),
        }
    }

    /// True when the pattern uses a field outside the OpenFlow 1.0 12-tuple
    /// and therefore cannot be expressed in the fixed 1.0 match structure.
    pub fn requires_extended_match(&self) -> bool {
        self.tun_id.is_some()
            || self.regs.iter().any(|r| r.is_some())
            || self.arp_sha.is_some()
            || self.arp_tha.is_some()
            || self.ipv6_src.is_some()
            || self.ipv6_dst.is_some()
            || self.nd_target.is_some()
            || self.ip_frag.is_some()
            || self.mpls_label.is_some()
            || self.mpls_tc.is_some()
    }
}

/// A fully concrete flow, as extracted from a packet. Input to classifier
/// lookups.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlowKey {
    pub in_port: u16,
    pub dl_src: u64,
    pub dl_dst: u64,
    pub dl_typ: u16,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: u8,
    pub nw_src: u32,
    pub nw_dst: u32,
    pub nw_proto: u8,
    pub nw_tos: u8,
    pub tp_src: u16,
    pub tp_dst: u16,
    pub tun_id: u64,
    pub regs: [u32; 4],
    pub arp_sha: u64,
    pub arp_tha: u64,
    pub ipv6_src: u128,
    pub ipv6_dst: u128,
    pub nd_target: u128,
    pub ip_frag: u8,
    pub mpls_label: u32,
    pub mpls_tc: u8,
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u64),
    Local,
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    pub fn of_int(v: u16) -> Option<FlowModCmd> {
        match v {
            0 => Some(FlowModCmd::AddFlow),
            1 => Some(FlowModCmd::ModFlow),
            2 => Some(FlowModCmd::ModStrictFlow),
            3 => Some(FlowModCmd::DeleteFlow),
            4 => Some(FlowModCmd::DeleteStrictFlow),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub struct TableId(pub u8);

/// Represents modifications to a flow table from the controller.
#[derive(Debug, PartialEq, Clone)]
pub struct FlowMod {
    pub table: TableId,
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    /// Index into `actions` where a `WRITE_ACTIONS` wrapper began when the
    /// message was decoded from an OpenFlow 1.1+ instruction list; `None`
    /// for plain action lists.
    pub write_start: Option<usize>,
    pub cookie: u64,
    /// Cookie bits to match on delete/modify, from the NXM cookie entry.
    pub cookie_mask: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
    pub emergency: bool,
}

impl FlowMod {
    /// A `FlowMod` adding a flow parameterized by the given `priority`,
    /// `pattern`, and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            table: TableId(0),
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            write_start: None,
            cookie: 0,
            cookie_mask: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: None,
            out_port: None,
            check_overlap: false,
            emergency: false,
        }
    }
}

/// A match-register reference used by the register actions: a 32-bit NXM
/// header naming the field the action reads or writes.
pub type MfHeader = u32;

/// Actions associated with flows and packets.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Output(PseudoPort),
    /// Output to the port number held in a register field.
    OutputReg {
        src: MfHeader,
        ofs: u16,
        nbits: u16,
        max_len: u16,
    },
    Enqueue(PseudoPort, u32),
    /// `Some(vid)` sets the VLAN id, `None` strips the tag.
    SetDlVlan(Option<u16>),
    SetDlVlanPcp(u8),
    PushVlan(u16),
    SetDlSrc(u64),
    SetDlDst(u64),
    SetNwSrc(u32),
    SetNwDst(u32),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    SetTunnel(u64),
    SetQueue(u32),
    PopQueue,
    RegMove {
        src: MfHeader,
        dst: MfHeader,
        n_bits: u16,
        src_ofs: u16,
        dst_ofs: u16,
    },
    RegLoad {
        dst: MfHeader,
        ofs: u16,
        nbits: u16,
        value: u64,
    },
    Note(Vec<u8>),
    Multipath {
        fields: u16,
        basis: u16,
        algorithm: u16,
        max_link: u16,
        arg: u32,
        ofs: u16,
        nbits: u16,
        dst: MfHeader,
    },
    Autopath {
        id: u32,
        ofs: u16,
        nbits: u16,
        dst: MfHeader,
    },
    /// Learned-flow template. The flow-mod spec is kept in its on-wire form;
    /// the core treats it as opaque and the datapath interprets it.
    Learn {
        idle_timeout: u16,
        hard_timeout: u16,
        priority: u16,
        cookie: u64,
        flags: u16,
        table_id: u8,
        spec: Vec<u8>,
    },
    Bundle {
        algorithm: u16,
        fields: u16,
        basis: u16,
        slave_type: u32,
        ofs: u16,
        nbits: u16,
        dst: MfHeader,
        slaves: Vec<u16>,
    },
    /// Stop executing the remainder of the action list.
    Exit,
    DecTtl,
    FinTimeout {
        idle: u16,
        hard: u16,
    },
    /// Punt to the controller with an explicit reason and controller id.
    Controller {
        max_len: u16,
        controller_id: u16,
        reason: PacketInReason,
    },
    PushMpls(u16),
    PopMpls(u16),
    SetMplsLabel(u32),
    SetMplsTc(u8),
    SetMplsTtl(u8),
    DecMplsTtl,
    GotoTable(u8),
    WriteMetadata {
        metadata: u64,
        mask: u64,
    },
    ClearActions,
}

impl Action {
    /// True if the action emits packets on `port` (output or enqueue;
    /// `FLOOD`/`ALL` do not count, matching the flow-mod out_port filter).
    pub fn outputs_to(&self, port: u16) -> bool {
        match *self {
            Action::Output(PseudoPort::PhysicalPort(p)) => p == port,
            Action::Output(PseudoPort::Local) => port == crate::port_table::OFPP_LOCAL,
            Action::Output(PseudoPort::Controller(_)) => port == 0xfffd,
            Action::Enqueue(PseudoPort::PhysicalPort(p), _) => p == port,
            _ => false,
        }
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        match *payload {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf.len(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

impl PacketInReason {
    pub fn of_int(v: u8) -> Option<PacketInReason> {
        match v {
            0 => Some(PacketInReason::NoMatch),
            1 => Some(PacketInReason::ExplicitSend),
            _ => None,
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

/// Represents packets sent from the controller.
#[derive(Debug, PartialEq, Clone)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

/// Reason a flow was removed from a switch.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FlowRemovedReason {
    IdleTimeout,
    HardTimeout,
    Delete,
}

impl FlowRemovedReason {
    pub fn of_int(v: u8) -> Option<FlowRemovedReason> {
        match v {
            0 => Some(FlowRemovedReason::IdleTimeout),
            1 => Some(FlowRemovedReason::HardTimeout),
            2 => Some(FlowRemovedReason::Delete),
            _ => None,
        }
    }
}

/// Flow removed (datapath -> controller).
#[derive(Debug, PartialEq, Clone)]
pub struct FlowRemoved {
    pub pattern: Pattern,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: Timeout,
    pub packet_count: u64,
    pub byte_count: u64,
}

/// STP state of a port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StpState {
    Listen,
    Learn,
    Forward,
    Block,
}

/// Current state of a physical port. Not configurable by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PortState {
    pub down: bool,
    pub stp_state: StpState,
}

/// Features of physical ports available in a datapath.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct PortFeatures {
    pub f_10mbhd: bool,
    pub f_10mbfd: bool,
    pub f_100mbhd: bool,
    pub f_100mbfd: bool,
    pub f_1gbhd: bool,
    pub f_1gbfd: bool,
    pub f_10gbfd: bool,
    pub copper: bool,
    pub fiber: bool,
    pub autoneg: bool,
    pub pause: bool,
    pub pause_asym: bool,
}

/// Flags to indicate behavior of the physical port.
///
/// These flags are used both to describe the current configuration of a physical port,
/// and to configure a port's behavior.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct PortConfig {
    pub down: bool,
    pub no_stp: bool,
    pub no_recv: bool,
    pub no_recv_stp: bool,
    pub no_flood: bool,
    pub no_fwd: bool,
    pub no_packet_in: bool,
}

/// Description of a physical port.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: u64,
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
}

/// Port configuration change from the controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortMod {
    pub port_no: u16,
    pub hw_addr: u64,
    pub config: PortConfig,
    pub mask: PortConfig,
    /// `None` leaves the advertised features untouched.
    pub advertise: Option<PortFeatures>,
}

/// IP fragment handling policy, from the switch-config flags.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FragPolicy {
    Normal,
    Drop,
    Reassemble,
}

impl FragPolicy {
    pub fn of_int(v: u16) -> Option<FragPolicy> {
        match v & 0x3 {
            0 => Some(FragPolicy::Normal),
            1 => Some(FragPolicy::Drop),
            2 => Some(FragPolicy::Reassemble),
            _ => None,
        }
    }
}

/// `GET_CONFIG_REPLY` / `SET_CONFIG` body.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchConfig {
    pub frag_policy: FragPolicy,
    pub miss_send_len: u16,
}

/// Type of stats request.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatsReqType {
    Desc,
    Flow,
    Aggregate,
    Table,
    Port,
    Queue,
    Vendor = 0xFFFF,
}

/// Type of body for stats requests.
#[derive(Debug, PartialEq, Clone)]
pub enum StatsReqBody {
    DescBody,
    FlowStatsBody {
        // Also used for aggregate stats
        pattern: Pattern,
        table_id: u8,
        out_port: u16,
    },
    TableBody,
    PortBody {
        port_no: u16,
    },
    QueueBody {
        port_no: u16,
        queue_id: u32,
    },
    /// Vendor stats request; the body after the vendor id is dissected by
    /// the vendor module.
    VendorBody {
        vendor: u32,
        body: Vec<u8>,
    },
}

/// Represents stats requests from the controller.
#[derive(Debug, PartialEq, Clone)]
pub struct StatsReq {
    pub req_type: StatsReqType,
    pub flags: u16,
    pub body: StatsReqBody,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FlowStats {
    pub table_id: u8,
    pub pattern: Pattern,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    pub actions: Vec<Action>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TransmissionCounter {
    pub rx: u64,
    pub tx: u64,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PortStats {
    pub port_no: u16,
    pub packets: TransmissionCounter,
    pub bytes: TransmissionCounter,
    pub dropped: TransmissionCounter,
    pub errors: TransmissionCounter,
    pub rx_frame_errors: u64,
    pub rx_over_errors: u64,
    pub rx_crc_errors: u64,
    pub collisions: u64,
}

#[derive(Debug, PartialEq, Clone)]
pub struct QueueStats {
    pub port_no: u16,
    pub queue_id: u32,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TableStats {
    pub table_id: u8,
    pub name: String,
    pub wildcards: Wildcards,
    pub max_entries: u32,
    pub active_count: u32,
    pub lookup_count: u64,
    pub matched_count: u64,
}

/// Type of body for stats responses.
#[derive(Debug, PartialEq, Clone)]
pub enum StatsRespBody {
    DescBody {
        manufacturer_desc: String,
        hardware_desc: String,
        software_desc: String,
        serial_number: String,
        datapath_desc: String,
    },
    FlowStatsBody {
        flow_stats: Vec<FlowStats>,
    },
    AggregateStatsBody {
        packet_count: u64,
        byte_count: u64,
        flow_count: u32,
    },
    TableBody {
        table_stats: Vec<TableStats>,
    },
    PortBody {
        port_stats: Vec<PortStats>,
    },
    QueueBody {
        queue_stats: Vec<QueueStats>,
    },
    VendorBody {
        vendor: u32,
        body: Vec<u8>,
    },
}

/// The `MORE` flag on a chunked stats reply.
pub const STATS_REPLY_MORE: u16 = 0x0001;

#[derive(Debug, PartialEq, Clone)]
pub struct StatsResp {
    pub req_type: StatsReqType,
    pub flags: u16,
    pub body: StatsRespBody,
}

/// What changed about a physical port.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortReason {
    PortAdd,
    PortDelete,
    PortModify,
}

impl PortReason {
    pub fn of_int(v: u8) -> Option<PortReason> {
        match v {
            0 => Some(PortReason::PortAdd),
            1 => Some(PortReason::PortDelete),
            2 => Some(PortReason::PortModify),
            _ => None,
        }
    }
}

/// A physical port has changed in the datapath.
#[derive(Debug, PartialEq, Clone)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

/// Reason Hello failed.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HelloFailed {
    Incompatible,
    EPerm,
}

/// Reason the controller made a bad request to a switch.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BadRequest {
    BadVersion,
    BadType,
    BadStat,
    BadVendor,
    BadSubType,
    EPerm,
    BadLen,
    BufferEmpty,
    BufferUnknown,
}

/// Reason a match field in a request was rejected.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BadMatch {
    BadField,
    BadPrereq,
    DupField,
    BadValue,
    BadMask,
    BadLen,
}

/// Reason the controller action failed.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BadAction {
    BadType,
    BadLen,
    BadVendor,
    BadVendorType,
    BadOutPort,
    BadArgument,
    EPerm,
    TooMany,
    BadQueue,
}

/// Reason a FlowMod from the controller failed.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FlowModFailed {
    AllTablesFull,
    Overlap,
    EPerm,
    BadEmergTimeout,
    BadCommand,
    Unsupported,
}

/// Reason a PortMod from the controller failed.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortModFailed {
    BadPort,
    BadHwAddr,
}

/// Reason a queue operation from the controller failed.
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QueueOpFailed {
    BadPort,
    BadQueue,
    EPerm,
}

/// High-level type of OpenFlow error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorType {
    HelloFailed(HelloFailed),
    BadRequest(BadRequest),
    BadMatch(BadMatch),
    BadAction(BadAction),
    FlowModFailed(FlowModFailed),
    PortModFailed(PortModFailed),
    QueueOpFailed(QueueOpFailed),
}

/// Error message (datapath -> controller). Carries up to the first 64 bytes
/// of the offending request.
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    Error(ErrorType, Vec<u8>),
}

/// Per-connection match encoding, negotiated over the Nicira extension.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlowFormat {
    OpenFlow10,
    TunIdFromCookie,
    Nxm,
    Oxm,
}

impl FlowFormat {
    pub fn of_int(v: u32) -> Option<FlowFormat> {
        match v {
            0 => Some(FlowFormat::OpenFlow10),
            1 => Some(FlowFormat::TunIdFromCookie),
            2 => Some(FlowFormat::Nxm),
            3 => Some(FlowFormat::Oxm),
            _ => None,
        }
    }
}

/// Packet-in framing negotiated over the Nicira extension.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketInFormat {
    Standard,
    Nxm,
}

impl PacketInFormat {
    pub fn of_int(v: u32) -> Option<PacketInFormat> {
        match v {
            0 => Some(PacketInFormat::Standard),
            1 => Some(PacketInFormat::Nxm),
            _ => None,
        }
    }
}

/// Controller role, set over the Nicira role-request extension.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerRole {
    Other,
    Master,
    Slave,
}

impl ControllerRole {
    pub fn of_int(v: u32) -> Option<ControllerRole> {
        match v {
            0 => Some(ControllerRole::Other),
            1 => Some(ControllerRole::Master),
            2 => Some(ControllerRole::Slave),
            _ => None,
        }
    }
}

/// Per-connection masks deciding which asynchronous messages are delivered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AsyncConfig {
    /// Packet-in reason mask, indexed by master/other (0) vs slave (1) role.
    pub packet_in_mask: [u32; 2],
    pub port_status_mask: [u32; 2],
    pub flow_removed_mask: [u32; 2],
}

impl Default for AsyncConfig {
    fn default() -> AsyncConfig {
        AsyncConfig {
            packet_in_mask: [!0, 0],
            port_status_mask: [!0, !0],
            flow_removed_mask: [!0, 0],
        }
    }
}

/// Nicira vendor extension messages (vendor id 0x00002320).
#[derive(Debug, PartialEq, Clone)]
pub enum NxMessage {
    /// Enable or disable deriving the tunnel id from the cookie field.
    TunIdFromCookie(bool),
    RoleRequest(ControllerRole),
    RoleReply(ControllerRole),
    SetFlowFormat(FlowFormat),
    /// Flow-mod whose match travels in NXM TLV form.
    FlowMod(FlowMod),
    FlowRemoved(FlowRemoved),
    /// Enable the extension that carries a table id in flow-mods.
    FlowModTableId(bool),
    SetPacketInFormat(PacketInFormat),
    /// Packet-in framed with an NXM match, sent when a connection has
    /// negotiated `PacketInFormat::Nxm`.
    PacketIn(PacketIn),
    SetControllerId(u16),
    SetAsyncConfig(AsyncConfig),
    /// Report of seconds-since-last-use for a set of flows.
    FlowAge,
}

/// Abstractions of OpenFlow messages mapping to message codes.
#[derive(Debug, PartialEq, Clone)]
pub enum Message {
    Hello,
    Error(Error),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    Vendor(NxMessage),
    FeaturesReq,
    FeaturesReply(SwitchFeatures),
    GetConfigReq,
    GetConfigReply(SwitchConfig),
    SetConfig(SwitchConfig),
    FlowMod(FlowMod),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    PortMod(PortMod),
    BarrierRequest,
    BarrierReply,
    StatsRequest(StatsReq),
    StatsReply(StatsResp),
    QueueGetConfigReq {
        port: u16,
    },
}
