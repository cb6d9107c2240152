//! Controller-connection state as the dispatcher sees it.
//!
//! The transport below owns the socket; here a connection is the
//! negotiated protocol state plus an outbound queue of encoded messages
//! the transport drains. The dispatcher consults three attributes for
//! authorization and formatting: the connection class, the controller
//! role, and the negotiated flow format.

use crate::message::{
    AsyncConfig, ControllerRole, FlowFormat, Message, PacketInFormat, PortReason,
};
use crate::ofp_header::{Xid, OPENFLOW_0_01_VERSION};
use crate::ofp_serialization;
use crate::pktbuf::PacketBuffers;

/// Primary connections take the configured role; service connections are
/// exempt from slave-role restrictions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    Primary,
    Service,
}

pub type ConnId = usize;

/// One controller connection's dispatcher-visible state.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub conn_type: ConnectionType,
    pub role: ControllerRole,
    /// Negotiated protocol version; 1.0 until Hello says otherwise.
    pub version: u8,
    pub flow_format: FlowFormat,
    pub packet_in_format: PacketInFormat,
    pub miss_send_len: u16,
    pub controller_id: u16,
    pub async_config: AsyncConfig,
    /// The table-id-in-flow-mod extension toggle.
    pub flow_mod_table_id: bool,
    pub pktbuf: PacketBuffers,
    outbox: Vec<Vec<u8>>,
}

impl Connection {
    pub fn new(id: ConnId, conn_type: ConnectionType) -> Connection {
        Connection {
            id,
            conn_type,
            role: ControllerRole::Other,
            version: OPENFLOW_0_01_VERSION,
            flow_format: FlowFormat::OpenFlow10,
            packet_in_format: PacketInFormat::Standard,
            miss_send_len: 128,
            controller_id: 0,
            async_config: AsyncConfig::default(),
            flow_mod_table_id: false,
            pktbuf: PacketBuffers::new(),
            outbox: Vec::new(),
        }
    }

    /// Encode `message` for this connection's version and queue it.
    /// Encoding failures are logged, not fatal: a reply that cannot be
    /// expressed in the negotiated dialect is dropped.
    pub fn send(&mut self, xid: Xid, message: Message) {
        match ofp_serialization::marshal(self.version, xid, message) {
            Ok(bytes) => self.outbox.push(bytes),
            Err(e) => log::warn!("conn {}: dropping unencodable message: {}", self.id, e),
        }
    }

    /// Drain queued outbound frames for the transport to write.
    pub fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Whether this connection receives flow-removed notifications.
    pub fn receives_flow_removed(&self) -> bool {
        let idx = (self.role == ControllerRole::Slave) as usize;
        self.async_config.flow_removed_mask[idx] != 0
    }

    /// Whether this connection receives port-status events for `reason`.
    pub fn receives_port_status(&self, reason: PortReason) -> bool {
        let idx = (self.role == ControllerRole::Slave) as usize;
        self.async_config.port_status_mask[idx] & (1 << reason as u32) != 0
    }

    /// Whether this connection receives packet-in messages.
    pub fn receives_packet_in(&self) -> bool {
        let idx = (self.role == ControllerRole::Slave) as usize;
        self.async_config.packet_in_mask[idx] != 0
    }
}

/// The set of live controller connections for one switch.
///
/// The real connection manager (TCP/TLS, reconnection backoff) lives in
/// the transport layer; this holds only what the core consults.
#[derive(Debug, Default)]
pub struct ConnMgr {
    connections: Vec<Option<Connection>>,
}

impl ConnMgr {
    pub fn new() -> ConnMgr {
        ConnMgr::default()
    }

    pub fn add(&mut self, conn_type: ConnectionType) -> ConnId {
        if let Some(id) = self.connections.iter().position(|c| c.is_none()) {
            self.connections[id] = Some(Connection::new(id, conn_type));
            id
        } else {
            let id = self.connections.len();
            self.connections.push(Some(Connection::new(id, conn_type)));
            id
        }
    }

    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.connections.get_mut(id).and_then(|slot| slot.take())
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(id).and_then(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(id).and_then(|c| c.as_mut())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut().filter_map(|c| c.as_mut())
    }

    pub fn len(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a message on every connection that `filter` admits; the
    /// message is rebuilt per connection so each dialect encodes its own
    /// form.
    pub fn broadcast<F, M>(&mut self, filter: F, mut build: M)
    where
        F: Fn(&Connection) -> bool,
        M: FnMut(&Connection) -> (Xid, Message),
    {
        for conn in self.connections.iter_mut().filter_map(|c| c.as_mut()) {
            if filter(conn) {
                let (xid, message) = build(conn);
                conn.send(xid, message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reuse_after_disconnect() {
        let mut mgr = ConnMgr::new();
        let a = mgr.add(ConnectionType::Primary);
        let b = mgr.add(ConnectionType::Service);
        mgr.remove(a).unwrap();
        let c = mgr.add(ConnectionType::Primary);
        assert_eq!(c, a);
        assert_ne!(b, c);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn send_queues_encoded_frames() {
        let mut conn = Connection::new(0, ConnectionType::Primary);
        conn.send(7, Message::BarrierReply);
        let frames = conn.take_outbox();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], OPENFLOW_0_01_VERSION);
        assert!(conn.take_outbox().is_empty());
    }

    #[test]
    fn default_async_config_muzzles_slaves() {
        let mut conn = Connection::new(0, ConnectionType::Primary);
        assert!(conn.receives_flow_removed());
        assert!(conn.receives_packet_in());
        conn.role = ControllerRole::Slave;
        assert!(!conn.receives_flow_removed());
        assert!(!conn.receives_packet_in());
        // Port status still flows to slaves by default.
        assert!(conn.receives_port_status(PortReason::PortAdd));
    }
}
