//! The switch's mirror of datapath ports, indexed by OpenFlow port number
//! and by device name.

use std::collections::HashMap;

use crate::datapath::Netdev;
use crate::message::PortDesc;

/// Port numbers at or above this are reserved for the pseudo-ports.
pub const OFPP_MAX: u16 = 0xff00;
pub const OFPP_LOCAL: u16 = 0xfffe;
pub const OFPP_NONE: u16 = 0xffff;

/// One datapath interface exposed to OpenFlow. The number and name are
/// immutable once installed; a renamed or renumbered device is modeled as
/// delete-plus-add by the reconciliation path.
#[derive(Debug)]
pub struct Port {
    pub desc: PortDesc,
    pub netdev: Netdev,
}

impl Port {
    pub fn ofp_port(&self) -> u16 {
        self.desc.port_no
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

/// Equality used by port reconciliation to decide whether a refreshed
/// device description is a modification worth reporting.
///
/// Only the PORT_DOWN bit of the config participates: the other config
/// bits are controller-managed and a datapath refresh must not reset them.
/// Name and number are compared separately by the caller.
pub fn phy_equal(a: &PortDesc, b: &PortDesc) -> bool {
    a.hw_addr == b.hw_addr
        && a.config.down == b.config.down
        && a.state == b.state
        && a.curr == b.curr
        && a.advertised == b.advertised
        && a.supported == b.supported
        && a.peer == b.peer
}

/// Dual-index port table. Both indices always agree on the same `Port`.
#[derive(Debug, Default)]
pub struct PortTable {
    by_number: HashMap<u16, Port>,
    by_name: HashMap<String, u16>,
}

impl PortTable {
    pub fn new() -> PortTable {
        PortTable::default()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn get(&self, ofp_port: u16) -> Option<&Port> {
        self.by_number.get(&ofp_port)
    }

    pub fn get_mut(&mut self, ofp_port: u16) -> Option<&mut Port> {
        self.by_number.get_mut(&ofp_port)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Port> {
        self.by_name.get(name).and_then(|n| self.by_number.get(n))
    }

    pub fn contains(&self, ofp_port: u16) -> bool {
        self.by_number.contains_key(&ofp_port)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Install a port. The caller has already ensured neither index is
    /// occupied; a collision here is an invariant violation.
    pub fn insert(&mut self, port: Port) {
        let number = port.ofp_port();
        let name = port.name().to_string();
        assert!(
            !self.by_number.contains_key(&number),
            "duplicate ofp_port {}",
            number
        );
        assert!(!self.by_name.contains_key(&name), "duplicate port name {}", name);
        self.by_name.insert(name, number);
        self.by_number.insert(number, port);
    }

    pub fn remove(&mut self, ofp_port: u16) -> Option<Port> {
        let port = self.by_number.remove(&ofp_port)?;
        self.by_name.remove(port.name());
        Some(port)
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Port> {
        let number = self.by_name.remove(name)?;
        self.by_number.remove(&number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.by_number.values()
    }

    pub fn numbers(&self) -> Vec<u16> {
        let mut numbers: Vec<u16> = self.by_number.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PortConfig, PortFeatures, PortState, StpState};

    fn desc(port_no: u16, name: &str) -> PortDesc {
        PortDesc {
            port_no,
            hw_addr: 0x02_00_00_00_00_00 + port_no as u64,
            name: name.to_string(),
            config: PortConfig::default(),
            state: PortState {
                down: false,
                stp_state: StpState::Forward,
            },
            curr: PortFeatures::default(),
            advertised: PortFeatures::default(),
            supported: PortFeatures::default(),
            peer: PortFeatures::default(),
        }
    }

    fn port(port_no: u16, name: &str) -> Port {
        Port {
            desc: desc(port_no, name),
            netdev: Netdev {
                name: name.to_string(),
                generation: 1,
            },
        }
    }

    #[test]
    fn indices_agree() {
        let mut table = PortTable::new();
        table.insert(port(5, "eth0"));
        let by_number = table.get(5).unwrap();
        let by_name = table.get_by_name("eth0").unwrap();
        assert_eq!(by_number.ofp_port(), by_name.ofp_port());
        assert_eq!(by_number.name(), by_name.name());
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut table = PortTable::new();
        table.insert(port(5, "eth0"));
        table.remove(5).unwrap();
        assert!(table.get(5).is_none());
        assert!(table.get_by_name("eth0").is_none());
        table.insert(port(5, "eth0"));
        table.remove_by_name("eth0").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn equality_ignores_controller_managed_config() {
        let a = desc(1, "eth0");
        let mut b = desc(1, "eth0");
        b.config.no_flood = true;
        assert!(phy_equal(&a, &b));
        b.config.down = true;
        assert!(!phy_equal(&a, &b));
    }

    #[test]
    fn equality_sees_state_and_features() {
        let a = desc(1, "eth0");
        let mut b = desc(1, "eth0");
        b.state.down = true;
        assert!(!phy_equal(&a, &b));
        let mut c = desc(1, "eth0");
        c.curr.f_1gbfd = true;
        assert!(!phy_equal(&a, &c));
        let mut d = desc(1, "eth0");
        d.hw_addr = 0x02_11_22_33_44_55;
        assert!(!phy_equal(&a, &d));
    }
}
