//! A single flow-table entry and its lifecycle bookkeeping.

use crate::message::{Action, FlowMod, Pattern, Timeout};
use crate::port_table::OFPP_NONE;

/// Priorities above the 16-bit controller range mark rules installed by
/// internal subsystems; they are invisible to controllers.
pub const MAX_CONTROLLER_PRIORITY: u32 = u16::MAX as u32;

/// One classifier entry. Counters live in the datapath and are fetched on
/// demand through the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub pattern: Pattern,
    pub priority: u32,
    pub created_ms: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub cookie: u64,
    pub send_flow_removed: bool,
    pub actions: Vec<Action>,
    pub write_start: Option<usize>,
}

impl Rule {
    pub fn from_flow_mod(fm: &FlowMod, now_ms: u64) -> Rule {
        Rule {
            pattern: fm.pattern.clone(),
            priority: fm.priority as u32,
            created_ms: now_ms,
            idle_timeout: fm.idle_timeout,
            hard_timeout: fm.hard_timeout,
            cookie: fm.cookie,
            send_flow_removed: fm.notify_when_removed,
            actions: fm.actions.clone(),
            write_start: fm.write_start,
        }
    }

    /// Rules with priority above the controller-visible range are set up by
    /// the switch itself (e.g. by in-band control) and are intentionally
    /// hidden from controllers.
    pub fn is_hidden(&self) -> bool {
        self.priority > MAX_CONTROLLER_PRIORITY
    }

    /// Controller-visible wire priority.
    pub fn wire_priority(&self) -> u16 {
        self.priority.min(MAX_CONTROLLER_PRIORITY) as u16
    }

    /// Seconds and nanoseconds since the rule was created.
    pub fn duration(&self, now_ms: u64) -> (u32, u32) {
        let elapsed = now_ms.saturating_sub(self.created_ms);
        ((elapsed / 1000) as u32, ((elapsed % 1000) * 1_000_000) as u32)
    }

    /// Whether the hard timeout has elapsed.
    pub fn hard_expired(&self, now_ms: u64) -> bool {
        match self.hard_timeout {
            Timeout::Permanent => false,
            Timeout::ExpiresAfter(secs) => {
                now_ms.saturating_sub(self.created_ms) >= secs as u64 * 1000
            }
        }
    }

    /// Whether the rule's actions output or enqueue to `out_port`.
    /// `OFPP_NONE` filters nothing.
    pub fn has_out_port(&self, out_port: u16) -> bool {
        if out_port == OFPP_NONE {
            return true;
        }
        self.actions.iter().any(|a| a.outputs_to(out_port))
    }

    /// Whether `cookie` under `cookie_mask` selects this rule.
    pub fn cookie_matches(&self, cookie: u64, cookie_mask: u64) -> bool {
        self.cookie & cookie_mask == cookie & cookie_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FlowModCmd, PseudoPort};

    fn rule(actions: Vec<Action>) -> Rule {
        let mut fm = FlowMod::add_flow(100, Pattern::match_all(), actions);
        fm.command = FlowModCmd::AddFlow;
        fm.hard_timeout = Timeout::ExpiresAfter(2);
        Rule::from_flow_mod(&fm, 10_000)
    }

    #[test]
    fn duration_splits_millis() {
        let r = rule(vec![]);
        assert_eq!(r.duration(13_250), (3, 250_000_000));
        assert_eq!(r.duration(10_000), (0, 0));
    }

    #[test]
    fn hard_timeout_boundary() {
        let r = rule(vec![]);
        assert!(!r.hard_expired(11_999));
        assert!(r.hard_expired(12_000));
    }

    #[test]
    fn hidden_threshold_is_just_above_u16() {
        let mut r = rule(vec![]);
        r.priority = MAX_CONTROLLER_PRIORITY;
        assert!(!r.is_hidden());
        r.priority = MAX_CONTROLLER_PRIORITY + 1;
        assert!(r.is_hidden());
    }

    #[test]
    fn out_port_filter() {
        let r = rule(vec![
            Action::SetNwTos(4),
            Action::Output(PseudoPort::PhysicalPort(2)),
        ]);
        assert!(r.has_out_port(2));
        assert!(!r.has_out_port(3));
        assert!(r.has_out_port(OFPP_NONE));
        // Flooding does not count for the out_port filter.
        let flood = rule(vec![Action::Output(PseudoPort::Flood)]);
        assert!(!flood.has_out_port(2));
    }

    #[test]
    fn cookie_mask_selection() {
        let mut r = rule(vec![]);
        r.cookie = 0xabcd_1234;
        assert!(r.cookie_matches(0x0000_1234, 0x0000_ffff));
        assert!(!r.cookie_matches(0x0000_4321, 0x0000_ffff));
        assert!(r.cookie_matches(0, 0));
    }
}
