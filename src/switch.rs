//! The switch aggregate: flow table, port table, controller connections,
//! and the datapath provider behind them.
//!
//! Runs inside a host poll loop: `run` does one bounded unit of work and
//! `wait` registers wakeups. There is no internal parallelism; everything
//! here executes on the host loop's thread.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::Rng;
use thiserror::Error;

use crate::classifier::Classifier;
use crate::connection::{ConnId, ConnMgr, ConnectionType};
use crate::datapath::{normalize_type, DatapathError, DatapathEvent, DatapathProvider};
use crate::message::{
    BadRequest, ErrorType, FlowMod, FlowModCmd, FlowModFailed, FlowRemoved, FlowRemovedReason,
    FlowStats, Message, NxMessage, PacketIn, PacketInFormat, PacketInReason, Payload, PortDesc,
    PortMod, PortModFailed, PortReason, PortStatus, Timeout,
};
use crate::message::Pattern;
use crate::packet::bytes_of_mac;
use crate::port_table::{phy_equal, Port, PortTable, OFPP_LOCAL};
use crate::rate_limit::RateLimit;
use crate::rule::Rule;

const MFR_DESC_WIDTH: usize = 256;
const HW_DESC_WIDTH: usize = 256;
const SW_DESC_WIDTH: usize = 256;
const SERIAL_DESC_WIDTH: usize = 32;
const DP_DESC_WIDTH: usize = 256;

const DEFAULT_MFR_DESC: &str = "Open Switch Project";
const DEFAULT_HW_DESC: &str = "software switch";
const DEFAULT_SW_DESC: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SERIAL_DESC: &str = "None";
const DEFAULT_DP_DESC: &str = "None";

/// Errors a message handler can produce: either an OpenFlow error destined
/// for the offending connection, or a provider-side failure.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("openflow error {0:?}")]
    Of(ErrorType),
    #[error(transparent)]
    Io(#[from] DatapathError),
}

impl SwitchError {
    pub fn of(et: ErrorType) -> SwitchError {
        SwitchError::Of(et)
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("a switch named '{0}' already exists")]
    DuplicateName(String),
    #[error(transparent)]
    Datapath(#[from] DatapathError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailMode {
    Secure,
    Standalone,
}

/// Human-readable descriptor strings, each silently truncated to its fixed
/// wire width on set.
#[derive(Debug, Clone)]
pub struct Descriptions {
    pub manufacturer: String,
    pub hardware: String,
    pub software: String,
    pub serial: String,
    pub datapath: String,
}

impl Default for Descriptions {
    fn default() -> Descriptions {
        Descriptions {
            manufacturer: DEFAULT_MFR_DESC.to_string(),
            hardware: DEFAULT_HW_DESC.to_string(),
            software: DEFAULT_SW_DESC.to_string(),
            serial: DEFAULT_SERIAL_DESC.to_string(),
            datapath: DEFAULT_DP_DESC.to_string(),
        }
    }
}

// Process-wide registry of switch names, for admin command dispatch.
// Initialized lazily on first switch creation and torn down when the last
// switch is destroyed.
static SWITCHES_BY_NAME: Mutex<Option<HashSet<String>>> = Mutex::new(None);

fn registry_insert(name: &str) -> bool {
    let mut guard = SWITCHES_BY_NAME.lock().unwrap();
    guard
        .get_or_insert_with(HashSet::new)
        .insert(name.to_string())
}

fn registry_remove(name: &str) {
    let mut guard = SWITCHES_BY_NAME.lock().unwrap();
    if let Some(set) = guard.as_mut() {
        set.remove(name);
        if set.is_empty() {
            *guard = None;
        }
    }
}

/// The admin `list` command: one switch name per line, status 200.
pub fn admin_list() -> (u16, String) {
    let guard = SWITCHES_BY_NAME.lock().unwrap();
    let mut names: Vec<String> = guard
        .as_ref()
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default();
    names.sort();
    let mut body = String::new();
    for name in names {
        body.push_str(&name);
        body.push('\n');
    }
    (200, body)
}

/// Basic switch facts for admin tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchInfo {
    pub name: String,
    pub typ: String,
    pub datapath_id: u64,
    pub n_ports: usize,
    pub n_flows: usize,
    pub n_connections: usize,
}

pub struct Switch {
    name: String,
    typ: String,
    pub datapath_id: u64,
    fallback_dpid: u64,
    pub descriptions: Descriptions,
    pub fail_mode: FailMode,
    pub ports: PortTable,
    pub classifier: Classifier,
    pub connmgr: ConnMgr,
    pub provider: Box<dyn DatapathProvider>,
    table_warn_rl: RateLimit,
    dup_port_rl: RateLimit,
}

impl Switch {
    /// Construct a switch over `provider`, register it in the process-wide
    /// registry, pick its datapath id, and mirror the provider's ports.
    pub fn create(
        name: &str,
        typ: &str,
        mut provider: Box<dyn DatapathProvider>,
    ) -> Result<Switch, CreateError> {
        let typ = normalize_type(typ).to_string();
        if !registry_insert(name) {
            return Err(CreateError::DuplicateName(name.to_string()));
        }
        if let Err(e) = provider.construct(name) {
            log::error!("failed to open datapath {}: {}", name, e);
            registry_remove(name);
            return Err(e.into());
        }
        let mut sw = Switch {
            name: name.to_string(),
            typ,
            datapath_id: 0,
            fallback_dpid: pick_fallback_dpid(),
            descriptions: Descriptions::default(),
            fail_mode: FailMode::Secure,
            ports: PortTable::new(),
            classifier: Classifier::new(),
            connmgr: ConnMgr::new(),
            provider,
            table_warn_rl: RateLimit::default(),
            dup_port_rl: RateLimit::default(),
        };
        sw.init_ports();
        sw.datapath_id = sw.pick_datapath_id();
        log::info!("{}: using datapath ID {:016x}", sw.name, sw.datapath_id);
        Ok(sw)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn typ(&self) -> &str {
        &self.typ
    }

    pub fn info(&self) -> SwitchInfo {
        SwitchInfo {
            name: self.name.clone(),
            typ: self.typ.clone(),
            datapath_id: self.datapath_id,
            n_ports: self.ports.len(),
            n_flows: self.classifier.len(),
            n_connections: self.connmgr.len(),
        }
    }

    pub fn set_datapath_id(&mut self, datapath_id: u64) {
        let old = self.datapath_id;
        self.datapath_id = if datapath_id != 0 {
            datapath_id
        } else {
            self.pick_datapath_id()
        };
        if self.datapath_id != old {
            // There is no way to tell a controller the datapath id changed;
            // the transport layer forces reconnection on this signal.
            log::info!("{}: datapath ID changed to {:016x}", self.name, self.datapath_id);
        }
    }

    fn pick_datapath_id(&self) -> u64 {
        if let Some(local) = self.ports.get(OFPP_LOCAL) {
            return local.desc.hw_addr;
        }
        self.fallback_dpid
    }

    pub fn set_fail_mode(&mut self, fail_mode: FailMode) {
        self.fail_mode = fail_mode;
    }

    pub fn set_descriptions(
        &mut self,
        manufacturer: Option<&str>,
        hardware: Option<&str>,
        software: Option<&str>,
        serial: Option<&str>,
        datapath: Option<&str>,
    ) {
        use crate::ofp_utils::truncate_string;
        if let Some(s) = manufacturer {
            self.descriptions.manufacturer = truncate_string(s, MFR_DESC_WIDTH);
        }
        if let Some(s) = hardware {
            self.descriptions.hardware = truncate_string(s, HW_DESC_WIDTH);
        }
        if let Some(s) = software {
            self.descriptions.software = truncate_string(s, SW_DESC_WIDTH);
        }
        if let Some(s) = serial {
            self.descriptions.serial = truncate_string(s, SERIAL_DESC_WIDTH);
        }
        if let Some(s) = datapath {
            self.descriptions.datapath = truncate_string(s, DP_DESC_WIDTH);
        }
    }

    // Opaque pass-through configuration. The switch core has no opinion on
    // these; a richer forwarding layer interprets them.

    pub fn set_sflow(&mut self, _options: Option<&str>) {}

    pub fn set_netflow(&mut self, _options: Option<&str>) {}

    pub fn bundle_register(&mut self, _aux: u64) {}

    pub fn bundle_unregister(&mut self, _aux: u64) {}

    pub fn mirror_register(&mut self, _aux: u64) {}

    pub fn mirror_unregister(&mut self, _aux: u64) {}

    pub fn set_flood_vlans(&mut self, _vlans: Option<Vec<u16>>) {}

    pub fn connect_controller(&mut self, conn_type: ConnectionType) -> ConnId {
        self.connmgr.add(conn_type)
    }

    pub fn disconnect_controller(&mut self, id: ConnId) {
        self.connmgr.remove(id);
    }

    // Flow lifecycle.

    /// `OFPFC_ADD`. Replaces any rule with the same match and priority.
    pub fn add_flow(
        &mut self,
        conn: Option<ConnId>,
        fm: &FlowMod,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        if fm.check_overlap && self.classifier.rule_overlaps(&fm.pattern, fm.priority as u32) {
            return Err(SwitchError::Of(ErrorType::FlowModFailed(
                FlowModFailed::Overlap,
            )));
        }
        let buffered = self.take_buffered(conn, fm.apply_to_packet);
        let rule = Rule::from_flow_mod(fm, now_ms);
        self.install_rule(rule)?;
        let installed = self
            .classifier
            .find_exactly(&fm.pattern, fm.priority as u32)
            .expect("rule vanished after insert");
        if let Ok(Some((packet, in_port))) = &buffered {
            self.provider.rule_execute(installed, *in_port, packet)?;
        }
        // The rule stays installed even when the buffer id was bad; the
        // controller still hears about its stale id.
        match buffered {
            Err(code) => Err(SwitchError::Of(ErrorType::BadRequest(code))),
            Ok(_) => Ok(()),
        }
    }

    /// Install a rule built by the switch itself, bypassing controller
    /// checks. Priorities above 65535 make it invisible to controllers.
    pub fn install_hidden_flow(
        &mut self,
        pattern: Pattern,
        priority: u32,
        actions: Vec<crate::message::Action>,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        let mut fm = FlowMod::add_flow(0, pattern, actions);
        fm.command = FlowModCmd::AddFlow;
        let mut rule = Rule::from_flow_mod(&fm, now_ms);
        rule.priority = priority;
        self.install_rule(rule)
    }

    fn install_rule(&mut self, rule: Rule) -> Result<(), SwitchError> {
        let pattern = rule.pattern.clone();
        let priority = rule.priority;
        if let Some(old) = self.classifier.insert(rule) {
            self.provider.rule_remove(&old);
            self.provider.rule_destruct(&old);
        }
        let installed = self
            .classifier
            .find_exactly(&pattern, priority)
            .expect("rule vanished after insert");
        if let Err(e) = self.provider.rule_construct(installed) {
            self.classifier.remove(&pattern, priority);
            return Err(match e {
                DatapathError::NotSupported => {
                    SwitchError::Of(ErrorType::FlowModFailed(FlowModFailed::Unsupported))
                }
                other => SwitchError::Io(other),
            });
        }
        Ok(())
    }

    fn take_buffered(
        &mut self,
        conn: Option<ConnId>,
        buffer_id: Option<u32>,
    ) -> Result<Option<(Vec<u8>, u16)>, BadRequest> {
        let (conn, buffer_id) = match (conn, buffer_id) {
            (Some(conn), Some(id)) => (conn, id),
            _ => return Ok(None),
        };
        match self.connmgr.get_mut(conn) {
            Some(connection) => connection.pktbuf.retrieve(buffer_id).map(Some),
            None => Ok(None),
        }
    }

    /// `OFPFC_MODIFY`: replace the action lists of every rule the request's
    /// match subsumes. Falls through to ADD when nothing matches.
    pub fn modify_flows_loose(
        &mut self,
        conn: Option<ConnId>,
        fm: &FlowMod,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        let mut matched = None;
        let mut cursor = self.classifier.cursor(Some(&fm.pattern));
        while let Some((pattern, priority)) = cursor.next(&self.classifier) {
            let rule = self.classifier.find_exactly(&pattern, priority).unwrap();
            if rule.is_hidden() || !rule.cookie_matches(fm.cookie, fm.cookie_mask) {
                continue;
            }
            self.modify_rule(&pattern, priority, fm)?;
            matched = Some((pattern, priority));
        }
        match matched {
            Some((pattern, priority)) => {
                self.send_buffered_through(conn, fm.apply_to_packet, &pattern, priority)
            }
            None => self.add_flow(conn, fm, now_ms),
        }
    }

    /// `OFPFC_MODIFY_STRICT`: modify only the exact `(match, priority)`
    /// rule; otherwise behave as ADD.
    pub fn modify_flow_strict(
        &mut self,
        conn: Option<ConnId>,
        fm: &FlowMod,
        now_ms: u64,
    ) -> Result<(), SwitchError> {
        let priority = fm.priority as u32;
        let found = match self.classifier.find_exactly(&fm.pattern, priority) {
            Some(rule) if !rule.is_hidden() && rule.cookie_matches(fm.cookie, fm.cookie_mask) => {
                true
            }
            _ => false,
        };
        if found {
            self.modify_rule(&fm.pattern.clone(), priority, fm)?;
            self.send_buffered_through(conn, fm.apply_to_packet, &fm.pattern, priority)
        } else {
            self.add_flow(conn, fm, now_ms)
        }
    }

    fn modify_rule(
        &mut self,
        pattern: &Pattern,
        priority: u32,
        fm: &FlowMod,
    ) -> Result<(), SwitchError> {
        let rule = self
            .classifier
            .find_exactly_mut(pattern, priority)
            .expect("modify target vanished");
        if rule.actions != fm.actions || rule.write_start != fm.write_start {
            rule.actions = fm.actions.clone();
            rule.write_start = fm.write_start;
            let rule = self.classifier.find_exactly(pattern, priority).unwrap();
            self.provider.rule_modify_actions(rule)?;
        }
        let rule = self
            .classifier
            .find_exactly_mut(pattern, priority)
            .expect("modify target vanished");
        rule.cookie = fm.cookie;
        Ok(())
    }

    fn send_buffered_through(
        &mut self,
        conn: Option<ConnId>,
        buffer_id: Option<u32>,
        pattern: &Pattern,
        priority: u32,
    ) -> Result<(), SwitchError> {
        match self.take_buffered(conn, buffer_id) {
            Ok(Some((packet, in_port))) => {
                let rule = self.classifier.find_exactly(pattern, priority).unwrap();
                self.provider.rule_execute(rule, in_port, &packet)?;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(code) => Err(SwitchError::Of(ErrorType::BadRequest(code))),
        }
    }

    /// `OFPFC_DELETE`: remove every rule the request's match subsumes,
    /// honoring the out-port and cookie filters. Hidden rules survive.
    pub fn delete_flows_loose(&mut self, fm: &FlowMod, now_ms: u64) {
        let out_port = out_port_filter(fm);
        let mut cursor = self.classifier.cursor(Some(&fm.pattern));
        while let Some((pattern, priority)) = cursor.next(&self.classifier) {
            let rule = self.classifier.find_exactly(&pattern, priority).unwrap();
            if rule.is_hidden()
                || !rule.has_out_port(out_port)
                || !rule.cookie_matches(fm.cookie, fm.cookie_mask)
            {
                continue;
            }
            self.delete_flow(&pattern, priority, now_ms);
        }
    }

    /// `OFPFC_DELETE_STRICT`: remove the exact `(match, priority)` rule.
    /// Deleting a missing rule is a no-op.
    pub fn delete_flow_strict(&mut self, fm: &FlowMod, now_ms: u64) {
        let out_port = out_port_filter(fm);
        let priority = fm.priority as u32;
        let eligible = match self.classifier.find_exactly(&fm.pattern, priority) {
            Some(rule) => {
                !rule.is_hidden()
                    && rule.has_out_port(out_port)
                    && rule.cookie_matches(fm.cookie, fm.cookie_mask)
            }
            None => false,
        };
        if eligible {
            self.delete_flow(&fm.pattern.clone(), priority, now_ms);
        }
    }

    /// Remove one rule, emitting a removal notification first.
    fn delete_flow(&mut self, pattern: &Pattern, priority: u32, now_ms: u64) {
        self.send_flow_removed(pattern, priority, FlowRemovedReason::Delete, now_ms);
        if let Some(rule) = self.classifier.remove(pattern, priority) {
            self.provider.rule_remove(&rule);
            self.provider.rule_destruct(&rule);
        }
    }

    /// Expire a rule on a timeout reported by the provider or noticed by
    /// `run`. The notification goes out before the rule is destroyed.
    pub fn expire_rule(
        &mut self,
        pattern: &Pattern,
        priority: u32,
        reason: FlowRemovedReason,
        now_ms: u64,
    ) {
        debug_assert!(matches!(
            reason,
            FlowRemovedReason::IdleTimeout | FlowRemovedReason::HardTimeout
        ));
        if self.classifier.find_exactly(pattern, priority).is_none() {
            return;
        }
        self.send_flow_removed(pattern, priority, reason, now_ms);
        if let Some(rule) = self.classifier.remove(pattern, priority) {
            self.provider.rule_remove(&rule);
            self.provider.rule_destruct(&rule);
        }
    }

    /// Remove every rule. No removal notifications are sent; a flush is an
    /// administrative reset, not a per-flow event.
    pub fn flush_flows(&mut self) {
        let bulk = self.provider.flush().is_ok();
        for (pattern, priority) in self.classifier.keys() {
            if let Some(rule) = self.classifier.remove(&pattern, priority) {
                if !bulk {
                    self.provider.rule_remove(&rule);
                }
                self.provider.rule_destruct(&rule);
            }
        }
    }

    fn send_flow_removed(
        &mut self,
        pattern: &Pattern,
        priority: u32,
        reason: FlowRemovedReason,
        now_ms: u64,
    ) {
        let rule = match self.classifier.find_exactly(pattern, priority) {
            Some(rule) => rule,
            None => return,
        };
        if rule.is_hidden() || !rule.send_flow_removed {
            return;
        }
        let (duration_sec, duration_nsec) = rule.duration(now_ms);
        let (packet_count, byte_count) = self.provider.rule_get_stats(rule);
        let removed = FlowRemoved {
            pattern: rule.pattern.clone(),
            cookie: rule.cookie,
            priority: rule.wire_priority(),
            reason,
            duration_sec,
            duration_nsec,
            idle_timeout: rule.idle_timeout,
            packet_count,
            byte_count,
        };
        self.connmgr.broadcast(
            |conn| conn.receives_flow_removed(),
            |_conn| (0, Message::FlowRemoved(removed.clone())),
        );
    }

    /// Look up the rule covering a concrete flow.
    pub fn rule_lookup(&self, flow: &crate::message::FlowKey) -> Option<&Rule> {
        self.classifier.lookup(flow)
    }

    /// Table ids other than 0 and "all tables" produce empty result sets,
    /// not errors; controllers expect the lenient behavior.
    pub fn is_valid_table(&mut self, table_id: u8, now_ms: u64) -> bool {
        if table_id == 0 || table_id == 0xff {
            true
        } else {
            crate::warn_rl!(
                self.table_warn_rl,
                now_ms,
                "{}: controller asked for invalid table {}",
                self.name,
                table_id
            );
            false
        }
    }

    /// Per-rule statistics under a wildcarded query. Hidden rules are
    /// excluded.
    pub fn collect_flow_stats(
        &mut self,
        target: &Pattern,
        out_port: u16,
        table_id: u8,
        now_ms: u64,
    ) -> Vec<FlowStats> {
        let mut out = Vec::new();
        if !self.is_valid_table(table_id, now_ms) {
            return out;
        }
        let mut cursor = self.classifier.cursor(Some(target));
        while let Some((pattern, priority)) = cursor.next(&self.classifier) {
            let rule = self.classifier.find_exactly(&pattern, priority).unwrap();
            if rule.is_hidden() || !rule.has_out_port(out_port) {
                continue;
            }
            let (duration_sec, duration_nsec) = rule.duration(now_ms);
            let (packet_count, byte_count) = self.provider.rule_get_stats(rule);
            out.push(FlowStats {
                table_id: 0,
                pattern: rule.pattern.clone(),
                duration_sec,
                duration_nsec,
                priority: rule.wire_priority(),
                idle_timeout: Timeout::to_int(rule.idle_timeout),
                hard_timeout: Timeout::to_int(rule.hard_timeout),
                cookie: rule.cookie,
                packet_count,
                byte_count,
                actions: rule.actions.clone(),
            });
        }
        out
    }

    /// Aggregate statistics under a wildcarded query.
    pub fn aggregate_stats(
        &mut self,
        target: &Pattern,
        out_port: u16,
        table_id: u8,
        now_ms: u64,
    ) -> (u64, u64, u32) {
        let mut packets = 0;
        let mut bytes = 0;
        let mut flows = 0;
        if !self.is_valid_table(table_id, now_ms) {
            return (0, 0, 0);
        }
        let mut cursor = self.classifier.cursor(Some(target));
        while let Some((pattern, priority)) = cursor.next(&self.classifier) {
            let rule = self.classifier.find_exactly(&pattern, priority).unwrap();
            if rule.is_hidden() || !rule.has_out_port(out_port) {
                continue;
            }
            let (p, b) = self.provider.rule_get_stats(rule);
            packets += p;
            bytes += b;
            flows += 1;
        }
        (packets, bytes, flows)
    }

    // Port reconciliation.

    fn init_ports(&mut self) {
        let now_ms = 0;
        for dp_port in self.provider.port_dump() {
            if self.ports.contains(dp_port.ofp_port) {
                crate::warn_rl!(
                    self.dup_port_rl,
                    now_ms,
                    "{}: ignoring duplicate port {} in datapath",
                    self.name,
                    dp_port.ofp_port
                );
                continue;
            }
            if self.ports.contains_name(&dp_port.name) {
                crate::warn_rl!(
                    self.dup_port_rl,
                    now_ms,
                    "{}: ignoring duplicate device {} in datapath",
                    self.name,
                    dp_port.name
                );
                continue;
            }
            if let Ok((netdev, desc)) = self.provider.port_open(&dp_port) {
                self.ports.insert(Port { desc, netdev });
            }
        }
    }

    /// Reconcile one device name against the datapath: install, update, or
    /// remove the corresponding port, emitting port-status events.
    pub fn update_port(&mut self, name: &str) {
        let queried = self.provider.port_query_by_name(name);
        let dp_port = match queried {
            Some(port) => port,
            None => {
                // Any port named `name` is gone now.
                if let Some(old) = self.ports.remove_by_name(name) {
                    self.send_port_status(old.desc.clone(), PortReason::PortDelete);
                    self.provider.netdev_close(old.netdev);
                }
                return;
            }
        };
        let (netdev, desc) = match self.provider.port_open(&dp_port) {
            Ok(opened) => opened,
            Err(e) => {
                log::warn!("{}: could not open {}: {}", self.name, name, e);
                if let Some(old) = self.ports.remove_by_name(name) {
                    self.send_port_status(old.desc.clone(), PortReason::PortDelete);
                    self.provider.netdev_close(old.netdev);
                }
                return;
            }
        };
        let same_slot = matches!(
            self.ports.get(dp_port.ofp_port),
            Some(port) if port.name() == name
        );
        if same_slot {
            // The name hasn't changed location. Any properties changed?
            let port = self.ports.get_mut(dp_port.ofp_port).unwrap();
            let controller_config = port.desc.config;
            let changed = !phy_equal(&port.desc, &desc);
            if changed {
                port.desc = PortDesc {
                    // Datapath refreshes must not clobber the
                    // controller-managed config bits.
                    config: crate::message::PortConfig {
                        down: desc.config.down,
                        ..controller_config
                    },
                    ..desc
                };
            }
            // Install the newly opened netdev in case the device was
            // reopened underneath us.
            let old_netdev = std::mem::replace(&mut port.netdev, netdev);
            self.provider.netdev_close(old_netdev);
            if changed {
                let desc = self.ports.get(dp_port.ofp_port).unwrap().desc.clone();
                self.send_port_status(desc, PortReason::PortModify);
            }
        } else {
            // Either the number is new, or it was reassigned to a different
            // device. Remove both stale views before installing.
            if let Some(old) = self.ports.remove(dp_port.ofp_port) {
                self.send_port_status(old.desc.clone(), PortReason::PortDelete);
                self.provider.netdev_close(old.netdev);
            }
            if let Some(old) = self.ports.remove_by_name(name) {
                self.send_port_status(old.desc.clone(), PortReason::PortDelete);
                self.provider.netdev_close(old.netdev);
            }
            self.ports.insert(Port {
                desc: desc.clone(),
                netdev,
            });
            self.send_port_status(desc, PortReason::PortAdd);
        }
    }

    /// Full re-enumeration after the provider lost track of changes.
    fn reinit_ports(&mut self) {
        let mut names: HashSet<String> =
            self.ports.iter().map(|p| p.name().to_string()).collect();
        for dp_port in self.provider.port_dump() {
            names.insert(dp_port.name);
        }
        for name in names {
            self.update_port(&name);
        }
    }

    fn send_port_status(&mut self, desc: PortDesc, reason: PortReason) {
        let status = PortStatus { reason, desc };
        self.connmgr.broadcast(
            |conn| conn.receives_port_status(reason),
            |_conn| (0, Message::PortStatus(status.clone())),
        );
    }

    /// Apply a controller `PORT_MOD`.
    pub fn apply_port_mod(&mut self, pm: &PortMod) -> Result<(), SwitchError> {
        let port = match self.ports.get_mut(pm.port_no) {
            Some(port) => port,
            None => {
                return Err(SwitchError::Of(ErrorType::PortModFailed(
                    PortModFailed::BadPort,
                )))
            }
        };
        if bytes_of_mac(port.desc.hw_addr) != bytes_of_mac(pm.hw_addr) {
            return Err(SwitchError::Of(ErrorType::PortModFailed(
                PortModFailed::BadHwAddr,
            )));
        }
        if pm.mask.down {
            let up = !pm.config.down;
            port.desc.config.down = pm.config.down;
            let netdev = &port.netdev;
            self.provider.netdev_set_admin_state(netdev, up)?;
        }
        let port = self.ports.get_mut(pm.port_no).unwrap();
        // The remaining bits toggle under the mask and are remembered here,
        // not in the datapath.
        if pm.mask.no_recv {
            port.desc.config.no_recv = pm.config.no_recv;
        }
        if pm.mask.no_recv_stp {
            port.desc.config.no_recv_stp = pm.config.no_recv_stp;
        }
        if pm.mask.no_flood {
            port.desc.config.no_flood = pm.config.no_flood;
        }
        if pm.mask.no_fwd {
            port.desc.config.no_fwd = pm.config.no_fwd;
        }
        if pm.mask.no_packet_in {
            port.desc.config.no_packet_in = pm.config.no_packet_in;
        }
        if let Some(advertise) = pm.advertise {
            port.desc.advertised = advertise;
            let netdev = &port.netdev;
            self.provider.netdev_set_advertisements(netdev, advertise)?;
        }
        Ok(())
    }

    // Periodic work.

    /// One bounded unit of work: provider events, port changes, timeouts.
    /// `Err(DeviceGone)` means the datapath was destroyed externally and
    /// the caller should tear this switch down.
    pub fn run(&mut self, now_ms: u64) -> Result<(), DatapathError> {
        let events = match self.provider.run() {
            Ok(events) => events,
            Err(DatapathError::DeviceGone) => {
                log::error!("{}: datapath was destroyed externally", self.name);
                return Err(DatapathError::DeviceGone);
            }
            Err(e) => {
                log::warn!("{}: datapath error: {}", self.name, e);
                Vec::new()
            }
        };
        for event in events {
            match event {
                DatapathEvent::Expired {
                    pattern,
                    priority,
                    reason,
                } => self.expire_rule(&pattern, priority, reason, now_ms),
                DatapathEvent::PacketIn {
                    packet,
                    in_port,
                    reason,
                } => self.deliver_packet_in(&packet, in_port, reason),
            }
        }
        loop {
            match self.provider.port_poll() {
                Ok(Some(name)) => self.update_port(&name),
                Ok(None) => break,
                Err(DatapathError::NoBufs) => {
                    self.reinit_ports();
                    break;
                }
                Err(e) => {
                    log::warn!("{}: port poll error: {}", self.name, e);
                    break;
                }
            }
        }
        self.expire_hard_timeouts(now_ms);
        Ok(())
    }

    /// Register wakeup sources with the host poll loop.
    pub fn wait(&self) {
        self.provider.wait();
        self.provider.port_poll_wait();
    }

    fn expire_hard_timeouts(&mut self, now_ms: u64) {
        let expired: Vec<(Pattern, u32)> = self
            .classifier
            .keys()
            .into_iter()
            .filter(|(pattern, priority)| {
                self.classifier
                    .find_exactly(pattern, *priority)
                    .map_or(false, |rule| rule.hard_expired(now_ms))
            })
            .collect();
        for (pattern, priority) in expired {
            self.expire_rule(&pattern, priority, FlowRemovedReason::HardTimeout, now_ms);
        }
    }

    /// Punt a packet the datapath could not classify to the controllers.
    pub fn deliver_packet_in(&mut self, packet: &[u8], in_port: u16, reason: PacketInReason) {
        if let Some(port) = self.ports.get(in_port) {
            if port.desc.config.no_packet_in {
                return;
            }
        }
        let total_len = packet.len() as u16;
        // Split borrows: each connection buffers its own copy.
        let conn_ids: Vec<ConnId> = self
            .connmgr
            .iter_mut()
            .filter(|c| c.receives_packet_in())
            .map(|c| c.id)
            .collect();
        for id in conn_ids {
            let conn = match self.connmgr.get_mut(id) {
                Some(conn) => conn,
                None => continue,
            };
            let miss_len = conn.miss_send_len as usize;
            let payload = if packet.len() > miss_len {
                let buffer_id = conn.pktbuf.save(packet, in_port);
                Payload::Buffered(buffer_id, packet[..miss_len].to_vec())
            } else {
                Payload::NotBuffered(packet.to_vec())
            };
            let pi = PacketIn {
                input_payload: payload,
                total_len,
                port: in_port,
                reason,
            };
            let message = match conn.packet_in_format {
                PacketInFormat::Standard => Message::PacketIn(pi),
                PacketInFormat::Nxm => Message::Vendor(NxMessage::PacketIn(pi)),
            };
            conn.send(0, message);
        }
    }
}

impl Drop for Switch {
    fn drop(&mut self) {
        self.flush_flows();
        for number in self.ports.numbers() {
            if let Some(port) = self.ports.remove(number) {
                self.provider.netdev_close(port.netdev);
            }
        }
        self.provider.destruct();
        registry_remove(&self.name);
    }
}

fn out_port_filter(fm: &FlowMod) -> u16 {
    use crate::message::PseudoPort;
    match fm.out_port {
        None => crate::port_table::OFPP_NONE,
        Some(PseudoPort::PhysicalPort(p)) => p,
        Some(PseudoPort::InPort) => 0xfff8,
        Some(PseudoPort::Table) => 0xfff9,
        Some(PseudoPort::Normal) => 0xfffa,
        Some(PseudoPort::Flood) => 0xfffb,
        Some(PseudoPort::AllPorts) => 0xfffc,
        Some(PseudoPort::Controller(_)) => 0xfffd,
        Some(PseudoPort::Local) => OFPP_LOCAL,
    }
}

fn pick_fallback_dpid() -> u64 {
    // A random MAC in the locally-administered range.
    let mut rng = rand::thread_rng();
    let low: u64 = rng.gen_range(0..1u64 << 24);
    0x0223_2000_0000 | low
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::testing::TestDatapath;
    use crate::message::{Action, FlowKey, Mask, PseudoPort};

    fn test_switch(name: &str, dp: TestDatapath) -> Switch {
        Switch::create(name, "system", Box::new(dp)).unwrap()
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

    fn ip_flow(src: u32) -> FlowKey {
        let mut f = FlowKey::default();
        f.dl_typ = 0x0800;
        f.nw_src = src;
        f
    }

    fn add(pattern: Pattern, priority: u16, port: u16) -> FlowMod {
        FlowMod::add_flow(
            priority,
            pattern,
            vec![Action::Output(PseudoPort::PhysicalPort(port))],
        )
    }

    #[test]
    fn duplicate_switch_names_are_rejected() {
        let sw = test_switch("dup-a", TestDatapath::new());
        let err = Switch::create("dup-a", "system", Box::new(TestDatapath::new())).unwrap_err();
        assert!(matches!(err, CreateError::DuplicateName(_)));
        drop(sw);
        // Once the first switch is gone the name is free again.
        let _sw = test_switch("dup-a", TestDatapath::new());
    }

    #[test]
    fn admin_list_names_live_switches() {
        let _a = test_switch("list-b", TestDatapath::new());
        let _b = test_switch("list-a", TestDatapath::new());
        let (status, body) = admin_list();
        assert_eq!(status, 200);
        assert!(body.contains("list-a\n"));
        assert!(body.contains("list-b\n"));
    }

    #[test]
    fn datapath_id_prefers_local_port_mac() {
        let dp = TestDatapath::new().with_port("br0", OFPP_LOCAL);
        dp.handle().borrow_mut().ports.get_mut("br0").unwrap().hw_addr = 0x0000_1122_3344;
        let sw = test_switch("dpid-local", dp);
        assert_eq!(sw.datapath_id, 0x0000_1122_3344);
        let sw2 = test_switch("dpid-fallback", TestDatapath::new());
        // Locally-administered bit set in the fallback MAC.
        assert_ne!(sw2.datapath_id & 0x0200_0000_0000, 0);
    }

    #[test]
    fn switch_teardown_releases_netdevs_and_provider() {
        let dp = TestDatapath::new().with_port("eth0", 1).with_port("eth1", 2);
        let state = dp.handle();
        let sw = test_switch("teardown", dp);
        assert_eq!(state.borrow().open_netdevs, 2);
        assert!(state.borrow().constructed);
        drop(sw);
        assert_eq!(state.borrow().open_netdevs, 0);
        assert!(!state.borrow().constructed);
    }

    #[test]
    fn install_then_lookup() {
        let mut sw = test_switch("flow-basic", TestDatapath::new());
        let fm = add(ip_pattern(0x0a000001, None), 100, 2);
        sw.add_flow(None, &fm, 0).unwrap();
        let hit = sw.rule_lookup(&ip_flow(0x0a000001)).unwrap();
        assert_eq!(hit.actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
        assert!(sw.rule_lookup(&ip_flow(0x0a000002)).is_none());
    }

    #[test]
    fn overlap_checked_add_is_rejected_but_plain_add_coexists() {
        let mut sw = test_switch("flow-overlap", TestDatapath::new());
        sw.add_flow(None, &add(ip_pattern(0x0a000000, Some(8)), 100, 2), 0)
            .unwrap();
        let mut narrow = add(ip_pattern(0x0a000001, None), 100, 3);
        narrow.check_overlap = true;
        let err = sw.add_flow(None, &narrow, 0).unwrap_err();
        assert!(matches!(
            err,
            SwitchError::Of(ErrorType::FlowModFailed(FlowModFailed::Overlap))
        ));
        narrow.check_overlap = false;
        sw.add_flow(None, &narrow, 0).unwrap();
        assert_eq!(sw.classifier.len(), 2);
    }

    #[test]
    fn add_replaces_same_match_and_priority() {
        let dp = TestDatapath::new();
        let state = dp.handle();
        let mut sw = test_switch("flow-replace", dp);
        sw.add_flow(None, &add(ip_pattern(1, None), 100, 2), 0).unwrap();
        sw.add_flow(None, &add(ip_pattern(1, None), 100, 9), 0).unwrap();
        assert_eq!(sw.classifier.len(), 1);
        let rule = sw.classifier.find_exactly(&ip_pattern(1, None), 100).unwrap();
        assert_eq!(rule.actions, vec![Action::Output(PseudoPort::PhysicalPort(9))]);
        // The datapath mirror was torn down for the replaced rule.
        assert_eq!(state.borrow().rules_mirrored, 1);
    }

    #[test]
    fn modify_that_matches_nothing_behaves_as_add() {
        let mut sw = test_switch("flow-mod-add", TestDatapath::new());
        let mut fm = add(ip_pattern(7, None), 42, 1);
        fm.command = FlowModCmd::ModFlow;
        sw.modify_flows_loose(None, &fm, 0).unwrap();
        assert_eq!(sw.classifier.len(), 1);
        assert!(sw.classifier.find_exactly(&ip_pattern(7, None), 42).is_some());
    }

    #[test]
    fn modify_loose_rewrites_subsumed_rules_and_cookie() {
        let mut sw = test_switch("flow-mod-loose", TestDatapath::new());
        sw.add_flow(None, &add(ip_pattern(0x0a000001, None), 100, 1), 0).unwrap();
        sw.add_flow(None, &add(ip_pattern(0x0a000002, None), 100, 2), 0).unwrap();
        sw.add_flow(None, &add(ip_pattern(0x0b000001, None), 100, 3), 0).unwrap();
        let mut fm = add(ip_pattern(0x0a000000, Some(8)), 0, 9);
        fm.command = FlowModCmd::ModFlow;
        fm.cookie = 0x77;
        sw.modify_flows_loose(None, &fm, 0).unwrap();
        for target in [0x0a000001u32, 0x0a000002] {
            let rule = sw.classifier.find_exactly(&ip_pattern(target, None), 100).unwrap();
            assert_eq!(rule.actions, vec![Action::Output(PseudoPort::PhysicalPort(9))]);
            assert_eq!(rule.cookie, 0x77);
        }
        let untouched = sw
            .classifier
            .find_exactly(&ip_pattern(0x0b000001, None), 100)
            .unwrap();
        assert_eq!(untouched.actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
        // No new rule was added: three rules as before.
        assert_eq!(sw.classifier.len(), 3);
    }

    #[test]
    fn delete_after_delete_is_a_noop() {
        let mut sw = test_switch("flow-del", TestDatapath::new());
        sw.add_flow(None, &add(ip_pattern(1, None), 5, 1), 0).unwrap();
        let mut del = add(ip_pattern(1, None), 5, 0);
        del.command = FlowModCmd::DeleteStrictFlow;
        del.actions.clear();
        sw.delete_flow_strict(&del, 0);
        assert!(sw.classifier.is_empty());
        sw.delete_flow_strict(&del, 0);
        assert!(sw.classifier.is_empty());
    }

    #[test]
    fn delete_honors_out_port_filter() {
        let mut sw = test_switch("flow-del-port", TestDatapath::new());
        sw.add_flow(None, &add(ip_pattern(1, None), 5, 1), 0).unwrap();
        sw.add_flow(None, &add(ip_pattern(2, None), 5, 2), 0).unwrap();
        let mut del = add(Pattern::match_all(), 0, 0);
        del.command = FlowModCmd::DeleteFlow;
        del.actions.clear();
        del.out_port = Some(PseudoPort::PhysicalPort(2));
        sw.delete_flows_loose(&del, 0);
        assert_eq!(sw.classifier.len(), 1);
        assert!(sw.classifier.find_exactly(&ip_pattern(1, None), 5).is_some());
    }

    #[test]
    fn delete_honors_cookie_filter() {
        let mut sw = test_switch("flow-del-cookie", TestDatapath::new());
        let mut a = add(ip_pattern(1, None), 5, 1);
        a.cookie = 0x11;
        let mut b = add(ip_pattern(2, None), 5, 2);
        b.cookie = 0x22;
        sw.add_flow(None, &a, 0).unwrap();
        sw.add_flow(None, &b, 0).unwrap();
        let mut del = add(Pattern::match_all(), 0, 0);
        del.command = FlowModCmd::DeleteFlow;
        del.actions.clear();
        del.cookie = 0x22;
        del.cookie_mask = 0xff;
        sw.delete_flows_loose(&del, 0);
        assert_eq!(sw.classifier.len(), 1);
        assert!(sw.classifier.find_exactly(&ip_pattern(1, None), 5).is_some());
    }

    #[test]
    fn hidden_rules_survive_controller_wipes() {
        let mut sw = test_switch("flow-hidden", TestDatapath::new());
        sw.install_hidden_flow(ip_pattern(9, None), 0x1_0000, vec![], 0).unwrap();
        sw.add_flow(None, &add(ip_pattern(1, None), 5, 1), 0).unwrap();
        let mut del = add(Pattern::match_all(), 0, 0);
        del.command = FlowModCmd::DeleteFlow;
        del.actions.clear();
        sw.delete_flows_loose(&del, 0);
        assert_eq!(sw.classifier.len(), 1);
        // Stats exclude it too.
        let stats = sw.collect_flow_stats(&Pattern::match_all(), 0xffff, 0xff, 0);
        assert!(stats.is_empty());
        // The admin dump still sees it.
        assert_eq!(sw.classifier.keys().len(), 1);
    }

    #[test]
    fn hard_timeout_expires_with_notification() {
        let mut sw = test_switch("flow-expire", TestDatapath::new());
        let conn = sw.connect_controller(ConnectionType::Primary);
        let mut fm = add(ip_pattern(1, None), 100, 1);
        fm.hard_timeout = Timeout::ExpiresAfter(1);
        fm.notify_when_removed = true;
        sw.add_flow(Some(conn), &fm, 0).unwrap();
        sw.run(500).unwrap();
        assert_eq!(sw.classifier.len(), 1);
        sw.run(1200).unwrap();
        assert!(sw.classifier.is_empty());
        assert!(sw.rule_lookup(&ip_flow(1)).is_none());
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        assert_eq!(frames.len(), 1);
        // OFPT_FLOW_REMOVED with reason = hard timeout.
        assert_eq!(frames[0][1], 11);
        assert_eq!(frames[0][8 + 40 + 10], FlowRemovedReason::HardTimeout as u8);
    }

    #[test]
    fn provider_expiry_event_removes_rule() {
        let dp = TestDatapath::new();
        let state = dp.handle();
        let mut sw = test_switch("flow-idle", dp);
        sw.add_flow(None, &add(ip_pattern(1, None), 100, 1), 0).unwrap();
        state.borrow_mut().events.push(DatapathEvent::Expired {
            pattern: ip_pattern(1, None),
            priority: 100,
            reason: FlowRemovedReason::IdleTimeout,
        });
        sw.run(10).unwrap();
        assert!(sw.classifier.is_empty());
    }

    #[test]
    fn flush_uses_bulk_path_and_sends_no_notifications() {
        let dp = TestDatapath::new();
        let state = dp.handle();
        let mut sw = test_switch("flow-flush", dp);
        let conn = sw.connect_controller(ConnectionType::Primary);
        let mut fm = add(ip_pattern(1, None), 100, 1);
        fm.notify_when_removed = true;
        sw.add_flow(Some(conn), &fm, 0).unwrap();
        sw.flush_flows();
        assert!(sw.classifier.is_empty());
        assert_eq!(state.borrow().flushed, 1);
        assert!(sw.connmgr.get_mut(conn).unwrap().take_outbox().is_empty());
    }

    #[test]
    fn device_gone_is_fatal() {
        let dp = TestDatapath::new();
        dp.handle().borrow_mut().device_gone = true;
        let mut sw = test_switch("gone", dp);
        assert!(matches!(sw.run(0), Err(DatapathError::DeviceGone)));
    }

    #[test]
    fn port_reconciliation_add_and_renumber() {
        let dp = TestDatapath::new().with_port("eth0", 5);
        let state = dp.handle();
        let mut sw = test_switch("ports", dp);
        let conn = sw.connect_controller(ConnectionType::Primary);
        // Initial population happened at create.
        assert_eq!(sw.ports.get(5).unwrap().name(), "eth0");
        assert_eq!(sw.ports.get_by_name("eth0").unwrap().ofp_port(), 5);

        // The datapath renumbers eth0 to port 6.
        state.borrow_mut().ports.get_mut("eth0").unwrap().ofp_port = 6;
        sw.update_port("eth0");
        assert!(sw.ports.get(5).is_none());
        assert_eq!(sw.ports.get_by_name("eth0").unwrap().ofp_port(), 6);
        assert_eq!(sw.ports.len(), 1);

        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        // DELETE for port 5, then ADD for port 6.
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][1], 12); // OFPT_PORT_STATUS
        assert_eq!(frames[0][8], PortReason::PortDelete as u8);
        assert_eq!(frames[1][8], PortReason::PortAdd as u8);
    }

    #[test]
    fn update_port_reports_link_changes_once() {
        let dp = TestDatapath::new().with_port("eth0", 1);
        let state = dp.handle();
        let mut sw = test_switch("ports-mod", dp);
        let conn = sw.connect_controller(ConnectionType::Primary);
        // Controller-managed config bit set out of band.
        sw.ports.get_mut(1).unwrap().desc.config.no_flood = true;

        // Same description again: no event, but the netdev is replaced.
        let before = sw.ports.get(1).unwrap().netdev.generation;
        sw.update_port("eth0");
        assert!(sw.connmgr.get_mut(conn).unwrap().take_outbox().is_empty());
        assert_ne!(sw.ports.get(1).unwrap().netdev.generation, before);

        // Carrier drop: one MODIFY, and the controller-managed bit stays.
        state.borrow_mut().ports.get_mut("eth0").unwrap().link_down = true;
        sw.update_port("eth0");
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][8], PortReason::PortModify as u8);
        let port = sw.ports.get(1).unwrap();
        assert!(port.desc.state.down);
        assert!(port.desc.config.no_flood);
    }

    #[test]
    fn vanished_device_is_removed() {
        let dp = TestDatapath::new().with_port("eth0", 1);
        let state = dp.handle();
        let mut sw = test_switch("ports-del", dp);
        state.borrow_mut().ports.remove("eth0");
        sw.update_port("eth0");
        assert!(sw.ports.get(1).is_none());
        assert!(sw.ports.get_by_name("eth0").is_none());
        assert_eq!(state.borrow().open_netdevs, 0);
    }

    #[test]
    fn bulk_change_triggers_full_rescan() {
        let dp = TestDatapath::new().with_port("eth0", 1);
        let state = dp.handle();
        let mut sw = test_switch("ports-bulk", dp);
        // A new port appears and an old one disappears while the event
        // queue overflows.
        {
            let mut s = state.borrow_mut();
            s.ports.remove("eth0");
            s.add_port("eth1", 2);
            s.bulk_change = true;
        }
        sw.run(0).unwrap();
        assert!(sw.ports.get_by_name("eth0").is_none());
        assert_eq!(sw.ports.get_by_name("eth1").unwrap().ofp_port(), 2);
    }

    #[test]
    fn port_mod_validates_port_and_hw_addr() {
        let dp = TestDatapath::new().with_port("eth0", 1);
        let mut sw = test_switch("ports-pm", dp);
        let hw = sw.ports.get(1).unwrap().desc.hw_addr;
        let pm = PortMod {
            port_no: 99,
            hw_addr: hw,
            config: Default::default(),
            mask: Default::default(),
            advertise: None,
        };
        assert!(matches!(
            sw.apply_port_mod(&pm),
            Err(SwitchError::Of(ErrorType::PortModFailed(PortModFailed::BadPort)))
        ));
        let pm = PortMod {
            port_no: 1,
            hw_addr: hw ^ 1,
            config: Default::default(),
            mask: Default::default(),
            advertise: None,
        };
        assert!(matches!(
            sw.apply_port_mod(&pm),
            Err(SwitchError::Of(ErrorType::PortModFailed(PortModFailed::BadHwAddr)))
        ));
        let mut config = crate::message::PortConfig::default();
        config.no_flood = true;
        let mut mask = crate::message::PortConfig::default();
        mask.no_flood = true;
        let pm = PortMod {
            port_no: 1,
            hw_addr: hw,
            config,
            mask,
            advertise: None,
        };
        sw.apply_port_mod(&pm).unwrap();
        assert!(sw.ports.get(1).unwrap().desc.config.no_flood);
    }

    #[test]
    fn packet_in_truncates_and_buffers() {
        let mut sw = test_switch("pktin", TestDatapath::new());
        let conn = sw.connect_controller(ConnectionType::Primary);
        sw.connmgr.get_mut(conn).unwrap().miss_send_len = 8;
        let packet: Vec<u8> = (0..32).collect();
        sw.deliver_packet_in(&packet, 4, PacketInReason::NoMatch);
        let frames = sw.connmgr.get_mut(conn).unwrap().take_outbox();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], 10); // OFPT_PACKET_IN
        // 8 header + 10 packet-in prefix + 8 truncated bytes
        assert_eq!(frames[0].len(), 8 + 10 + 8);
        // A buffer id was stamped (not BUFFER_NONE).
        assert_ne!(&frames[0][8..12], &[0xff; 4]);
    }

    #[test]
    fn descriptions_truncate_silently() {
        let mut sw = test_switch("descs", TestDatapath::new());
        let long = "x".repeat(300);
        sw.set_descriptions(Some(&long), None, None, Some(&long), None);
        assert_eq!(sw.descriptions.manufacturer.len(), 256);
        assert_eq!(sw.descriptions.serial.len(), 32);
        assert_eq!(sw.descriptions.hardware, DEFAULT_HW_DESC);
    }
}
