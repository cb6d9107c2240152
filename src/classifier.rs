//! The flow classifier: a priority-ordered, wildcarded match-to-rule store.
//!
//! Three queries carry the flow table's semantics: `find_exactly` for the
//! `(match, priority)` key, `lookup` for the highest-priority rule covering
//! a concrete flow, and `overlaps` for the CHECK_OVERLAP test. A hash index
//! answers the exact query; `lookup` scans an ordered list (priority
//! descending, insertion order breaking ties). Configuration churn
//! dominates this table's load, not per-packet lookups, which the datapath
//! handles from its own mirror.

use std::collections::HashMap;

use crate::bits::low_bits;
use crate::message::{FlowKey, Mask, Pattern};
use crate::rule::Rule;

fn nw_keep(m: &Option<Mask<u32>>) -> u32 {
    match m {
        None => 0,
        Some(Mask { mask: None, .. }) => !0,
        Some(Mask {
            mask: Some(wild), ..
        }) => (!low_bits((*wild).min(32)) & 0xffff_ffff) as u32,
    }
}

fn v6_keep(m: &Option<Mask<u128>>) -> u128 {
    match m {
        None => 0,
        Some(Mask { mask: None, .. }) => !0,
        Some(Mask {
            mask: Some(wild), ..
        }) => {
            if *wild >= 128 {
                0
            } else {
                !0u128 << *wild
            }
        }
    }
}

fn bm_keep_u64(m: &Option<Mask<u64>>) -> u64 {
    match m {
        None => 0,
        Some(Mask { mask: None, .. }) => !0,
        Some(Mask {
            mask: Some(mask), ..
        }) => *mask,
    }
}

fn bm_keep_u32(m: &Option<Mask<u32>>) -> u32 {
    match m {
        None => 0,
        Some(Mask { mask: None, .. }) => !0,
        Some(Mask {
            mask: Some(mask), ..
        }) => *mask,
    }
}

fn masked_matches_u128(keep: u128, value: u128, flow: u128) -> bool {
    (value ^ flow) & keep == 0
}

fn masked_subsumes(keep_self: u128, value_self: u128, keep_other: u128, value_other: u128) -> bool {
    keep_self & !keep_other == 0 && (value_self ^ value_other) & keep_self == 0
}

fn masked_overlaps(keep_a: u128, value_a: u128, keep_b: u128, value_b: u128) -> bool {
    (value_a ^ value_b) & keep_a & keep_b == 0
}

fn exact_matches<T: PartialEq>(field: &Option<T>, flow: &T) -> bool {
    match field {
        None => true,
        Some(v) => v == flow,
    }
}

fn exact_subsumes<T: PartialEq>(field: &Option<T>, other: &Option<T>) -> bool {
    match field {
        None => true,
        Some(v) => other.as_ref() == Some(v),
    }
}

fn exact_overlaps<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

impl Pattern {
    /// Whether this pattern covers the concrete flow.
    pub fn matches(&self, flow: &FlowKey) -> bool {
        exact_matches(&self.in_port, &flow.in_port)
            && exact_matches(&self.dl_src, &flow.dl_src)
            && exact_matches(&self.dl_dst, &flow.dl_dst)
            && exact_matches(&self.dl_typ, &flow.dl_typ)
            && exact_matches(&self.dl_vlan, &flow.dl_vlan)
            && exact_matches(&self.dl_vlan_pcp, &flow.dl_vlan_pcp)
            && exact_matches(&self.nw_proto, &flow.nw_proto)
            && exact_matches(&self.nw_tos, &flow.nw_tos)
            && exact_matches(&self.tp_src, &flow.tp_src)
            && exact_matches(&self.tp_dst, &flow.tp_dst)
            && masked_matches_u128(
                nw_keep(&self.nw_src) as u128,
                self.nw_src.map(|m| m.value).unwrap_or(0) as u128,
                flow.nw_src as u128,
            )
            && masked_matches_u128(
                nw_keep(&self.nw_dst) as u128,
                self.nw_dst.map(|m| m.value).unwrap_or(0) as u128,
                flow.nw_dst as u128,
            )
            && masked_matches_u128(
                bm_keep_u64(&self.tun_id) as u128,
                self.tun_id.map(|m| m.value).unwrap_or(0) as u128,
                flow.tun_id as u128,
            )
            && (0..4).all(|i| {
                masked_matches_u128(
                    bm_keep_u32(&self.regs[i]) as u128,
                    self.regs[i].map(|m| m.value).unwrap_or(0) as u128,
                    flow.regs[i] as u128,
                )
            })
            && exact_matches(&self.arp_sha, &flow.arp_sha)
            && exact_matches(&self.arp_tha, &flow.arp_tha)
            && masked_matches_u128(
                v6_keep(&self.ipv6_src),
                self.ipv6_src.map(|m| m.value).unwrap_or(0),
                flow.ipv6_src,
            )
            && masked_matches_u128(
                v6_keep(&self.ipv6_dst),
                self.ipv6_dst.map(|m| m.value).unwrap_or(0),
                flow.ipv6_dst,
            )
            && exact_matches(&self.nd_target, &flow.nd_target)
            && exact_matches(&self.ip_frag, &flow.ip_frag)
            && exact_matches(&self.mpls_label, &flow.mpls_label)
            && exact_matches(&self.mpls_tc, &flow.mpls_tc)
    }

    /// Whether every flow covered by `other` is also covered by `self`.
    pub fn subsumes(&self, other: &Pattern) -> bool {
        exact_subsumes(&self.in_port, &other.in_port)
            && exact_subsumes(&self.dl_src, &other.dl_src)
            && exact_subsumes(&self.dl_dst, &other.dl_dst)
            && exact_subsumes(&self.dl_typ, &other.dl_typ)
            && exact_subsumes(&self.dl_vlan, &other.dl_vlan)
            && exact_subsumes(&self.dl_vlan_pcp, &other.dl_vlan_pcp)
            && exact_subsumes(&self.nw_proto, &other.nw_proto)
            && exact_subsumes(&self.nw_tos, &other.nw_tos)
            && exact_subsumes(&self.tp_src, &other.tp_src)
            && exact_subsumes(&self.tp_dst, &other.tp_dst)
            && masked_subsumes(
                nw_keep(&self.nw_src) as u128,
                self.nw_src.map(|m| m.value).unwrap_or(0) as u128,
                nw_keep(&other.nw_src) as u128,
                other.nw_src.map(|m| m.value).unwrap_or(0) as u128,
            )
            && masked_subsumes(
                nw_keep(&self.nw_dst) as u128,
                self.nw_dst.map(|m| m.value).unwrap_or(0) as u128,
                nw_keep(&other.nw_dst) as u128,
                other.nw_dst.map(|m| m.value).unwrap_or(0) as u128,
            )
            && masked_subsumes(
                bm_keep_u64(&self.tun_id) as u128,
                self.tun_id.map(|m| m.value).unwrap_or(0) as u128,
                bm_keep_u64(&other.tun_id) as u128,
                other.tun_id.map(|m| m.value).unwrap_or(0) as u128,
            )
            && (0..4).all(|i| {
                masked_subsumes(
                    bm_keep_u32(&self.regs[i]) as u128,
                    self.regs[i].map(|m| m.value).unwrap_or(0) as u128,
                    bm_keep_u32(&other.regs[i]) as u128,
                    other.regs[i].map(|m| m.value).unwrap_or(0) as u128,
                )
            })
            && exact_subsumes(&self.arp_sha, &other.arp_sha)
            && exact_subsumes(&self.arp_tha, &other.arp_tha)
            && masked_subsumes(
                v6_keep(&self.ipv6_src),
                self.ipv6_src.map(|m| m.value).unwrap_or(0),
                v6_keep(&other.ipv6_src),
                other.ipv6_src.map(|m| m.value).unwrap_or(0),
            )
            && masked_subsumes(
                v6_keep(&self.ipv6_dst),
                self.ipv6_dst.map(|m| m.value).unwrap_or(0),
                v6_keep(&other.ipv6_dst),
                other.ipv6_dst.map(|m| m.value).unwrap_or(0),
            )
            && exact_subsumes(&self.nd_target, &other.nd_target)
            && exact_subsumes(&self.ip_frag, &other.ip_frag)
            && exact_subsumes(&self.mpls_label, &other.mpls_label)
            && exact_subsumes(&self.mpls_tc, &other.mpls_tc)
    }

    /// Whether some concrete flow is covered by both patterns.
    pub fn overlaps(&self, other: &Pattern) -> bool {
        exact_overlaps(&self.in_port, &other.in_port)
            && exact_overlaps(&self.dl_src, &other.dl_src)
            && exact_overlaps(&self.dl_dst, &other.dl_dst)
            && exact_overlaps(&self.dl_typ, &other.dl_typ)
            && exact_overlaps(&self.dl_vlan, &other.dl_vlan)
            && exact_overlaps(&self.dl_vlan_pcp, &other.dl_vlan_pcp)
            && exact_overlaps(&self.nw_proto, &other.nw_proto)
            && exact_overlaps(&self.nw_tos, &other.nw_tos)
            && exact_overlaps(&self.tp_src, &other.tp_src)
            && exact_overlaps(&self.tp_dst, &other.tp_dst)
            && masked_overlaps(
                nw_keep(&self.nw_src) as u128,
                self.nw_src.map(|m| m.value).unwrap_or(0) as u128,
                nw_keep(&other.nw_src) as u128,
                other.nw_src.map(|m| m.value).unwrap_or(0) as u128,
            )
            && masked_overlaps(
                nw_keep(&self.nw_dst) as u128,
                self.nw_dst.map(|m| m.value).unwrap_or(0) as u128,
                nw_keep(&other.nw_dst) as u128,
                other.nw_dst.map(|m| m.value).unwrap_or(0) as u128,
            )
            && masked_overlaps(
                bm_keep_u64(&self.tun_id) as u128,
                self.tun_id.map(|m| m.value).unwrap_or(0) as u128,
                bm_keep_u64(&other.tun_id) as u128,
                other.tun_id.map(|m| m.value).unwrap_or(0) as u128,
            )
            && (0..4).all(|i| {
                masked_overlaps(
                    bm_keep_u32(&self.regs[i]) as u128,
                    self.regs[i].map(|m| m.value).unwrap_or(0) as u128,
                    bm_keep_u32(&other.regs[i]) as u128,
                    other.regs[i].map(|m| m.value).unwrap_or(0) as u128,
                )
            })
            && exact_overlaps(&self.arp_sha, &other.arp_sha)
            && exact_overlaps(&self.arp_tha, &other.arp_tha)
            && masked_overlaps(
                v6_keep(&self.ipv6_src),
                self.ipv6_src.map(|m| m.value).unwrap_or(0),
                v6_keep(&other.ipv6_src),
                other.ipv6_src.map(|m| m.value).unwrap_or(0),
            )
            && masked_overlaps(
                v6_keep(&self.ipv6_dst),
                self.ipv6_dst.map(|m| m.value).unwrap_or(0),
                v6_keep(&other.ipv6_dst),
                other.ipv6_dst.map(|m| m.value).unwrap_or(0),
            )
            && exact_overlaps(&self.nd_target, &other.nd_target)
            && exact_overlaps(&self.ip_frag, &other.ip_frag)
            && exact_overlaps(&self.mpls_label, &other.mpls_label)
            && exact_overlaps(&self.mpls_tc, &other.mpls_tc)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ClsKey {
    pattern: Pattern,
    priority: u32,
}

#[derive(Debug)]
struct OrderEntry {
    key: ClsKey,
    seq: u64,
}

/// The classifier. Owns its rules.
#[derive(Debug, Default)]
pub struct Classifier {
    rules: HashMap<ClsKey, Rule>,
    /// Sorted by priority descending, insertion sequence ascending.
    order: Vec<OrderEntry>,
    next_seq: u64,
}

impl Classifier {
    pub fn new() -> Classifier {
        Classifier::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Install `rule`, returning the replaced rule when one with the same
    /// `(match, priority)` already existed.
    pub fn insert(&mut self, rule: Rule) -> Option<Rule> {
        let key = ClsKey {
            pattern: rule.pattern.clone(),
            priority: rule.priority,
        };
        let replaced = if let Some(old) = self.rules.remove(&key) {
            // Keep the original position so the replacement inherits the
            // predecessor's tie-break slot.
            Some(old)
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            let pos = self
                .order
                .partition_point(|e| e.key.priority > rule.priority);
            // Within one priority, later sequences sort after earlier ones;
            // all existing entries at this priority precede the new one.
            let pos = pos
                + self.order[pos..]
                    .iter()
                    .take_while(|e| e.key.priority == rule.priority)
                    .count();
            self.order.insert(
                pos,
                OrderEntry {
                    key: key.clone(),
                    seq,
                },
            );
            None
        };
        self.rules.insert(key, rule);
        replaced
    }

    /// The rule with exactly this match and priority, if any.
    pub fn find_exactly(&self, pattern: &Pattern, priority: u32) -> Option<&Rule> {
        self.rules.get(&ClsKey {
            pattern: pattern.clone(),
            priority,
        })
    }

    pub fn find_exactly_mut(&mut self, pattern: &Pattern, priority: u32) -> Option<&mut Rule> {
        self.rules.get_mut(&ClsKey {
            pattern: pattern.clone(),
            priority,
        })
    }

    /// The highest-priority rule whose match covers `flow`; ties at equal
    /// priority go to the earliest-inserted rule.
    pub fn lookup(&self, flow: &FlowKey) -> Option<&Rule> {
        for entry in &self.order {
            if entry.key.pattern.matches(flow) {
                return self.rules.get(&entry.key);
            }
        }
        None
    }

    /// Whether any rule at `priority` shares a concrete flow with `pattern`.
    pub fn rule_overlaps(&self, pattern: &Pattern, priority: u32) -> bool {
        self.order
            .iter()
            .filter(|e| e.key.priority == priority)
            .any(|e| e.key.pattern.overlaps(pattern))
    }

    pub fn remove(&mut self, pattern: &Pattern, priority: u32) -> Option<Rule> {
        let key = ClsKey {
            pattern: pattern.clone(),
            priority,
        };
        let rule = self.rules.remove(&key)?;
        if let Some(pos) = self.order.iter().position(|e| e.key == key) {
            self.order.remove(pos);
        }
        Some(rule)
    }

    /// Snapshot a traversal over the rules subsumed by `target`
    /// (`None` enumerates everything). The cursor tolerates removal of the
    /// rule it most recently yielded; rules inserted after the snapshot are
    /// not visited.
    pub fn cursor(&self, target: Option<&Pattern>) -> Cursor {
        let keys = self
            .order
            .iter()
            .filter(|e| target.map_or(true, |t| t.subsumes(&e.key.pattern)))
            .map(|e| (e.key.pattern.clone(), e.key.priority))
            .collect();
        Cursor { keys, pos: 0 }
    }

    /// Every `(pattern, priority)` in priority order; admin dumps use this
    /// and include hidden rules.
    pub fn keys(&self) -> Vec<(Pattern, u32)> {
        self.order
            .iter()
            .map(|e| (e.key.pattern.clone(), e.key.priority))
            .collect()
    }
}

/// A snapshot traversal over classifier keys.
pub struct Cursor {
    keys: Vec<(Pattern, u32)>,
    pos: usize,
}

impl Cursor {
    /// The next surviving key. Keys whose rule has been removed since the
    /// snapshot are skipped.
    pub fn next(&mut self, cls: &Classifier) -> Option<(Pattern, u32)> {
        while self.pos < self.keys.len() {
            let (pattern, priority) = self.keys[self.pos].clone();
            self.pos += 1;
            if cls.find_exactly(&pattern, priority).is_some() {
                return Some((pattern, priority));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Action, FlowMod, PseudoPort};

    fn ip_pattern(prefix: u32, wild_bits: Option<u32>) -> Pattern {
        let mut p = Pattern::match_all();
        p.dl_typ = Some(0x0800);
        p.nw_src = Some(Mask {
            value: prefix,
            mask: wild_bits,
        });
        p
    }

    fn rule(pattern: Pattern, priority: u32, port: u16) -> Rule {
        let mut r = Rule::from_flow_mod(
            &FlowMod::add_flow(0, pattern, vec![Action::Output(PseudoPort::PhysicalPort(port))]),
            0,
        );
        r.priority = priority;
        r
    }

    fn ip_flow(src: u32) -> FlowKey {
        let mut f = FlowKey::default();
        f.dl_typ = 0x0800;
        f.nw_src = src;
        f
    }

    #[test]
    fn install_then_lookup() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000001, None), 100, 2));
        let hit = cls.lookup(&ip_flow(0x0a000001)).unwrap();
        assert_eq!(hit.priority, 100);
        assert!(cls.lookup(&ip_flow(0x0a000002)).is_none());
        // A non-IP flow misses: the eth_type differs.
        let mut arp = FlowKey::default();
        arp.dl_typ = 0x0806;
        arp.nw_src = 0x0a000001;
        assert!(cls.lookup(&arp).is_none());
    }

    #[test]
    fn higher_priority_wins() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000000, Some(8)), 100, 2));
        cls.insert(rule(ip_pattern(0x0a000001, None), 200, 3));
        let narrow = cls.lookup(&ip_flow(0x0a000001)).unwrap();
        assert_eq!(narrow.actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
        let wide = cls.lookup(&ip_flow(0x0a000002)).unwrap();
        assert_eq!(wide.actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
    }

    #[test]
    fn lookup_tie_breaks_by_insertion_order() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000000, Some(8)), 100, 1));
        cls.insert(rule(ip_pattern(0x0a000000, Some(16)), 100, 2));
        // Both cover 10.0.0.5 at the same priority; the earlier insert wins.
        let hit = cls.lookup(&ip_flow(0x0a000005)).unwrap();
        assert_eq!(hit.actions, vec![Action::Output(PseudoPort::PhysicalPort(1))]);
    }

    #[test]
    fn at_most_one_rule_per_key() {
        let mut cls = Classifier::new();
        assert!(cls.insert(rule(ip_pattern(0x0a000001, None), 100, 2)).is_none());
        let replaced = cls.insert(rule(ip_pattern(0x0a000001, None), 100, 9)).unwrap();
        assert_eq!(replaced.actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
        assert_eq!(cls.len(), 1);
        let current = cls.find_exactly(&ip_pattern(0x0a000001, None), 100).unwrap();
        assert_eq!(current.actions, vec![Action::Output(PseudoPort::PhysicalPort(9))]);
    }

    #[test]
    fn overlap_detection() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000000, Some(8)), 100, 2));
        // /32 inside the /24 at equal priority overlaps.
        assert!(cls.rule_overlaps(&ip_pattern(0x0a000001, None), 100));
        // Same match at a different priority does not participate.
        assert!(!cls.rule_overlaps(&ip_pattern(0x0a000001, None), 200));
        // Disjoint prefix does not overlap.
        assert!(!cls.rule_overlaps(&ip_pattern(0x0b000001, None), 100));
    }

    #[test]
    fn catch_all_pattern_overlaps_everything() {
        let mut cls = Classifier::new();
        cls.insert(rule(Pattern::match_all(), 50, 1));
        assert!(cls.rule_overlaps(&ip_pattern(0x0a000001, None), 50));
    }

    #[test]
    fn empty_match_is_catch_all() {
        let mut cls = Classifier::new();
        cls.insert(rule(Pattern::match_all(), 1, 1));
        assert!(cls.lookup(&ip_flow(0x01020304)).is_some());
        assert!(cls.lookup(&FlowKey::default()).is_some());
    }

    #[test]
    fn lookup_result_subsumes_exemplar() {
        // Invariant: looking up a flow drawn from an installed rule's match
        // returns that rule or a higher-priority rule covering the flow.
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000000, Some(8)), 100, 2));
        cls.insert(rule(Pattern::match_all(), 300, 3));
        let hit = cls.lookup(&ip_flow(0x0a000001)).unwrap();
        assert_eq!(hit.priority, 300);
        assert!(hit.pattern.matches(&ip_flow(0x0a000001)));
    }

    #[test]
    fn cursor_enumerates_subsumed_rules() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000001, None), 100, 1));
        cls.insert(rule(ip_pattern(0x0a000002, None), 100, 2));
        cls.insert(rule(ip_pattern(0x0b000001, None), 100, 3));
        let target = ip_pattern(0x0a000000, Some(8));
        let mut cursor = cls.cursor(Some(&target));
        let mut seen = 0;
        while cursor.next(&cls).is_some() {
            seen += 1;
        }
        assert_eq!(seen, 2);
        // All-wildcards target enumerates every rule.
        let mut all = cls.cursor(None);
        let mut total = 0;
        while all.next(&cls).is_some() {
            total += 1;
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn cursor_tolerates_deleting_current_rule() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000001, None), 100, 1));
        cls.insert(rule(ip_pattern(0x0a000002, None), 100, 2));
        cls.insert(rule(ip_pattern(0x0a000003, None), 100, 3));
        let mut cursor = cls.cursor(None);
        let mut visited = 0;
        while let Some((pattern, priority)) = cursor.next(&cls) {
            cls.remove(&pattern, priority).unwrap();
            visited += 1;
        }
        assert_eq!(visited, 3);
        assert!(cls.is_empty());
    }

    #[test]
    fn cursor_skips_rules_deleted_out_from_under_it() {
        let mut cls = Classifier::new();
        cls.insert(rule(ip_pattern(0x0a000001, None), 100, 1));
        cls.insert(rule(ip_pattern(0x0a000002, None), 100, 2));
        let mut cursor = cls.cursor(None);
        cursor.next(&cls).unwrap();
        // Delete the rule the cursor has not reached yet.
        cls.remove(&ip_pattern(0x0a000002, None), 100).unwrap();
        assert!(cursor.next(&cls).is_none());
    }

    #[test]
    fn vlan_and_register_matching() {
        let mut p = Pattern::match_all();
        p.dl_vlan = Some(Some(10));
        p.regs[1] = Some(Mask::masked(0x0100, 0xff00));
        let mut flow = FlowKey::default();
        flow.dl_vlan = Some(10);
        flow.regs[1] = 0x0142;
        assert!(p.matches(&flow));
        flow.regs[1] = 0x0242;
        assert!(!p.matches(&flow));
        flow.regs[1] = 0x0100;
        flow.dl_vlan = None;
        assert!(!p.matches(&flow));
    }

    #[test]
    fn subsumption_of_register_masks() {
        let mut wide = Pattern::match_all();
        wide.regs[0] = Some(Mask::masked(0x0100, 0xff00));
        let mut narrow = Pattern::match_all();
        narrow.regs[0] = Some(Mask::exact(0x0142));
        assert!(wide.subsumes(&narrow));
        assert!(!narrow.subsumes(&wide));
        assert!(Pattern::match_all().subsumes(&wide));
    }
}
