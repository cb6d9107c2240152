//! The downward contract: the forwarding engine a switch drives.
//!
//! The switch core never forwards packets itself; it mirrors rules and
//! ports into a provider implementing this trait and consumes the events
//! the provider reports back. Kernel and userspace engines differ only
//! behind this boundary.

use thiserror::Error;

use crate::message::{Action, FlowRemovedReason, PacketInReason, PortDesc, PortFeatures};
use crate::rule::Rule;

/// Provider-side failures, kept separate from the OpenFlow error taxonomy.
#[derive(Debug, Error)]
pub enum DatapathError {
    /// The underlying device was destroyed externally. Fatal: the caller
    /// should tear the switch down.
    #[error("datapath device is gone")]
    DeviceGone,
    /// The provider's event queue overflowed; the caller must re-enumerate
    /// ports to resynchronize.
    #[error("datapath event queue overflowed")]
    NoBufs,
    #[error("operation not supported by this datapath")]
    NotSupported,
    #[error("no such port")]
    NoSuchPort,
    #[error("datapath io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A port as the datapath reports it, before the core opens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapathPort {
    pub name: String,
    pub typ: String,
    pub ofp_port: u16,
}

/// An open descriptor for a datapath port's underlying device.
///
/// The core owns the base record; the provider owns whatever state backs
/// it, keyed by the generation id. Dropping a `Netdev` without closing it
/// through the provider leaks the provider-side state, so every removal
/// path hands it back via `netdev_close`.
#[derive(Debug, PartialEq, Eq)]
pub struct Netdev {
    pub name: String,
    pub generation: u64,
}

/// Work the provider hands back from `run`.
#[derive(Debug, Clone, PartialEq)]
pub enum DatapathEvent {
    /// A rule hit its idle or hard timeout inside the datapath.
    Expired {
        pattern: crate::message::Pattern,
        priority: u32,
        reason: FlowRemovedReason,
    },
    /// A packet the datapath could not classify, to be punted upward.
    PacketIn {
        packet: Vec<u8>,
        in_port: u16,
        reason: PacketInReason,
    },
}

/// The only downward interface of the switch core.
pub trait DatapathProvider {
    /// Open provider state for the named switch.
    fn construct(&mut self, switch_name: &str) -> Result<(), DatapathError>;

    /// Release provider state. Infallible by contract.
    fn destruct(&mut self);

    /// One bounded unit of work. `Err(DeviceGone)` is fatal to the switch.
    fn run(&mut self) -> Result<Vec<DatapathEvent>, DatapathError>;

    /// Register wakeup sources with the host poll loop.
    fn wait(&self) {}

    fn port_query_by_name(&self, name: &str) -> Option<DatapathPort>;

    fn port_add(&mut self, name: &str) -> Result<u16, DatapathError>;

    fn port_del(&mut self, ofp_port: u16) -> Result<(), DatapathError>;

    /// Enumerate every datapath port.
    fn port_dump(&self) -> Vec<DatapathPort>;

    /// One changed port name, `Ok(None)` when nothing changed, or
    /// `Err(NoBufs)` when the caller must re-enumerate everything.
    fn port_poll(&mut self) -> Result<Option<String>, DatapathError>;

    fn port_poll_wait(&self) {}

    /// Open the device behind a datapath port: fetch its MAC, admin flags,
    /// carrier, and feature masks, packed into a `PortDesc`.
    fn port_open(&mut self, port: &DatapathPort) -> Result<(Netdev, PortDesc), DatapathError>;

    /// Return an open descriptor to the provider.
    fn netdev_close(&mut self, netdev: Netdev);

    fn netdev_set_admin_state(&mut self, netdev: &Netdev, up: bool) -> Result<(), DatapathError>;

    fn netdev_set_advertisements(
        &mut self,
        netdev: &Netdev,
        advertise: PortFeatures,
    ) -> Result<(), DatapathError>;

    /// Mirror a freshly installed rule.
    fn rule_construct(&mut self, rule: &Rule) -> Result<(), DatapathError>;

    /// Drop the datapath's mirror of a rule. Infallible by contract.
    fn rule_remove(&mut self, rule: &Rule);

    /// Release any provider state still linked to a rule after its mirror
    /// is gone. Infallible by contract.
    fn rule_destruct(&mut self, _rule: &Rule) {}

    fn rule_modify_actions(&mut self, rule: &Rule) -> Result<(), DatapathError>;

    /// Run `packet` through the rule's actions, crediting its counters.
    fn rule_execute(
        &mut self,
        rule: &Rule,
        in_port: u16,
        packet: &[u8],
    ) -> Result<(), DatapathError>;

    /// Fetch a rule's packet and byte counters.
    fn rule_get_stats(&self, rule: &Rule) -> (u64, u64);

    /// Execute an ad-hoc action list on an ad-hoc packet.
    fn packet_out(
        &mut self,
        actions: &[Action],
        packet: &[u8],
        in_port: Option<u16>,
    ) -> Result<(), DatapathError>;

    fn get_drop_frags(&self) -> bool;

    fn set_drop_frags(&mut self, drop_frags: bool);

    /// Transmit/receive counters for an open device, when the provider
    /// tracks them. `None` reads as all-zero counters.
    fn netdev_get_stats(&self, _netdev: &Netdev) -> Option<crate::message::PortStats> {
        None
    }

    /// Bulk-remove every rule, when the engine has a faster path than
    /// per-rule removal.
    fn flush(&mut self) -> Result<(), DatapathError> {
        Err(DatapathError::NotSupported)
    }
}

/// The provider factory: one per datapath type the host links in. The host
/// hands the created provider to `Switch::create`; no runtime provider swap
/// exists.
pub trait DatapathFactory {
    /// The datapath type this factory builds, e.g. "system" or "netdev".
    fn typ(&self) -> &str;

    /// Names of the datapaths of this type that already exist.
    fn enumerate_names(&self) -> Vec<String>;

    /// Delete a datapath that no switch has open.
    fn del(&self, name: &str) -> Result<(), DatapathError>;

    fn create(&self, name: &str) -> Result<Box<dyn DatapathProvider>, DatapathError>;
}

/// The datapath types offered by a set of factories.
pub fn enumerate_types(factories: &[&dyn DatapathFactory]) -> Vec<String> {
    let mut types: Vec<String> = factories.iter().map(|f| f.typ().to_string()).collect();
    types.sort();
    types.dedup();
    types
}

/// Canonical form of a datapath type name: the empty string means the
/// default kernel datapath.
pub fn normalize_type(typ: &str) -> &str {
    if typ.is_empty() {
        "system"
    } else {
        typ
    }
}

/// An in-memory provider for the crate's own tests. State lives behind a
/// shared handle so a test can mutate the simulated datapath while the
/// switch owns the provider.
#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;
    use crate::message::{PortConfig, PortState, StpState};

    #[derive(Debug, Clone)]
    pub struct TestPort {
        pub name: String,
        pub ofp_port: u16,
        pub hw_addr: u64,
        pub link_down: bool,
    }

    #[derive(Default)]
    pub struct TestState {
        pub ports: HashMap<String, TestPort>,
        pub pending_changes: Vec<String>,
        pub bulk_change: bool,
        pub events: Vec<DatapathEvent>,
        pub device_gone: bool,
        pub constructed: bool,
        pub rules_mirrored: usize,
        pub executed: Vec<(Vec<u8>, u16)>,
        pub packet_outs: Vec<Vec<u8>>,
        pub stats: HashMap<(crate::message::Pattern, u32), (u64, u64)>,
        pub drop_frags: bool,
        pub flushed: usize,
        pub open_netdevs: usize,
        next_generation: u64,
    }

    impl TestState {
        pub fn add_port(&mut self, name: &str, ofp_port: u16) {
            self.ports.insert(
                name.to_string(),
                TestPort {
                    name: name.to_string(),
                    ofp_port,
                    hw_addr: 0x0200_0000_0000 | ofp_port as u64,
                    link_down: false,
                },
            );
        }
    }

    /// A datapath that records what the switch asks of it.
    #[derive(Default)]
    pub struct TestDatapath {
        state: Rc<RefCell<TestState>>,
    }

    impl TestDatapath {
        pub fn new() -> TestDatapath {
            TestDatapath::default()
        }

        pub fn with_port(self, name: &str, ofp_port: u16) -> TestDatapath {
            self.state.borrow_mut().add_port(name, ofp_port);
            self
        }

        /// A handle the test keeps after the switch takes the provider.
        pub fn handle(&self) -> Rc<RefCell<TestState>> {
            Rc::clone(&self.state)
        }
    }

    impl DatapathProvider for TestDatapath {
        fn construct(&mut self, _switch_name: &str) -> Result<(), DatapathError> {
            self.state.borrow_mut().constructed = true;
            Ok(())
        }

        fn destruct(&mut self) {
            self.state.borrow_mut().constructed = false;
        }

        fn run(&mut self) -> Result<Vec<DatapathEvent>, DatapathError> {
            let mut state = self.state.borrow_mut();
            if state.device_gone {
                return Err(DatapathError::DeviceGone);
            }
            Ok(std::mem::take(&mut state.events))
        }

        fn port_query_by_name(&self, name: &str) -> Option<DatapathPort> {
            self.state.borrow().ports.get(name).map(|p| DatapathPort {
                name: p.name.clone(),
                typ: "system".to_string(),
                ofp_port: p.ofp_port,
            })
        }

        fn port_add(&mut self, name: &str) -> Result<u16, DatapathError> {
            let mut state = self.state.borrow_mut();
            let next = state.ports.values().map(|p| p.ofp_port).max().unwrap_or(0) + 1;
            state.add_port(name, next);
            state.pending_changes.push(name.to_string());
            Ok(next)
        }

        fn port_del(&mut self, ofp_port: u16) -> Result<(), DatapathError> {
            let mut state = self.state.borrow_mut();
            let name = state
                .ports
                .values()
                .find(|p| p.ofp_port == ofp_port)
                .map(|p| p.name.clone())
                .ok_or(DatapathError::NoSuchPort)?;
            state.ports.remove(&name);
            state.pending_changes.push(name);
            Ok(())
        }

        fn port_dump(&self) -> Vec<DatapathPort> {
            let state = self.state.borrow();
            let mut out: Vec<DatapathPort> = state
                .ports
                .values()
                .map(|p| DatapathPort {
                    name: p.name.clone(),
                    typ: "system".to_string(),
                    ofp_port: p.ofp_port,
                })
                .collect();
            out.sort_by_key(|p| p.ofp_port);
            out
        }

        fn port_poll(&mut self) -> Result<Option<String>, DatapathError> {
            let mut state = self.state.borrow_mut();
            if state.bulk_change {
                state.bulk_change = false;
                state.pending_changes.clear();
                return Err(DatapathError::NoBufs);
            }
            if state.pending_changes.is_empty() {
                Ok(None)
            } else {
                Ok(Some(state.pending_changes.remove(0)))
            }
        }

        fn port_open(&mut self, port: &DatapathPort) -> Result<(Netdev, PortDesc), DatapathError> {
            let mut state = self.state.borrow_mut();
            let test_port = state
                .ports
                .get(&port.name)
                .cloned()
                .ok_or(DatapathError::NoSuchPort)?;
            state.next_generation += 1;
            state.open_netdevs += 1;
            let netdev = Netdev {
                name: port.name.clone(),
                generation: state.next_generation,
            };
            let desc = PortDesc {
                port_no: port.ofp_port,
                hw_addr: test_port.hw_addr,
                name: port.name.clone(),
                config: PortConfig::default(),
                state: PortState {
                    down: test_port.link_down,
                    stp_state: StpState::Forward,
                },
                curr: PortFeatures {
                    f_1gbfd: true,
                    copper: true,
                    autoneg: true,
                    ..Default::default()
                },
                advertised: PortFeatures::default(),
                supported: PortFeatures::default(),
                peer: PortFeatures::default(),
            };
            Ok((netdev, desc))
        }

        fn netdev_close(&mut self, _netdev: Netdev) {
            let mut state = self.state.borrow_mut();
            state.open_netdevs = state.open_netdevs.saturating_sub(1);
        }

        fn netdev_set_admin_state(
            &mut self,
            _netdev: &Netdev,
            _up: bool,
        ) -> Result<(), DatapathError> {
            Ok(())
        }

        fn netdev_set_advertisements(
            &mut self,
            _netdev: &Netdev,
            _advertise: PortFeatures,
        ) -> Result<(), DatapathError> {
            Ok(())
        }

        fn rule_construct(&mut self, _rule: &Rule) -> Result<(), DatapathError> {
            self.state.borrow_mut().rules_mirrored += 1;
            Ok(())
        }

        fn rule_remove(&mut self, _rule: &Rule) {
            let mut state = self.state.borrow_mut();
            state.rules_mirrored = state.rules_mirrored.saturating_sub(1);
        }

        fn rule_modify_actions(&mut self, _rule: &Rule) -> Result<(), DatapathError> {
            Ok(())
        }

        fn rule_execute(
            &mut self,
            _rule: &Rule,
            in_port: u16,
            packet: &[u8],
        ) -> Result<(), DatapathError> {
            self.state.borrow_mut().executed.push((packet.to_vec(), in_port));
            Ok(())
        }

        fn rule_get_stats(&self, rule: &Rule) -> (u64, u64) {
            self.state
                .borrow()
                .stats
                .get(&(rule.pattern.clone(), rule.priority))
                .copied()
                .unwrap_or((0, 0))
        }

        fn packet_out(
            &mut self,
            _actions: &[Action],
            packet: &[u8],
            _in_port: Option<u16>,
        ) -> Result<(), DatapathError> {
            self.state.borrow_mut().packet_outs.push(packet.to_vec());
            Ok(())
        }

        fn get_drop_frags(&self) -> bool {
            self.state.borrow().drop_frags
        }

        fn set_drop_frags(&mut self, drop_frags: bool) {
            self.state.borrow_mut().drop_frags = drop_frags;
        }

        fn flush(&mut self) -> Result<(), DatapathError> {
            let mut state = self.state.borrow_mut();
            state.flushed += 1;
            state.rules_mirrored = 0;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_type_normalizes_to_system() {
        assert_eq!(normalize_type(""), "system");
        assert_eq!(normalize_type("netdev"), "netdev");
    }
}
