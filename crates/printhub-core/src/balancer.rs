//! # Printer Group Balancer
//!
//! Picks one printer of a group for a dispatch attempt.
//!
//! ## Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  members ordered by (priority DESC, name ASC)                           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  eligible = state ∈ {idle, busy} AND not excluded                       │
//! │        │           (empty → NoEligiblePrinter)                          │
//! │        ▼                                                                │
//! │  shortlist per strategy                                                 │
//! │    round_robin : all eligible                                           │
//! │    priority    : eligible with the highest priority                     │
//! │    least_busy  : fewest in-flight, then highest priority                │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  first shortlisted member after the group's cursor (wrapping)           │
//! │  cursor := chosen index, in_flight[chosen] += 1                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every strategy ends in the same cursor walk, so ties are always broken
//! round-robin. The balancer is plain data; callers that share it across
//! tasks wrap it in a single lock so selection and the in-flight reservation
//! happen atomically.

use std::collections::{HashMap, HashSet};

use crate::error::RoutingError;
use crate::types::{BalancingStrategy, GroupMember, PrinterGroup, PrinterState};

/// Round-robin cursors and in-flight counters.
#[derive(Debug, Default, Clone)]
pub struct Balancer {
    /// Group id → index (in ordered members) of the last printer selected.
    cursors: HashMap<String, usize>,
    /// Printer name → dispatches currently assigned.
    in_flight: HashMap<String, u32>,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a printer from `group` and reserves an in-flight slot on it.
    ///
    /// Printers missing from `states` are treated as offline.
    pub fn select(
        &mut self,
        group: &PrinterGroup,
        states: &HashMap<String, PrinterState>,
        excluded: &HashSet<String>,
    ) -> Result<String, RoutingError> {
        if !group.active {
            return Err(RoutingError::GroupInactive {
                group: group.id.clone(),
            });
        }

        let members = ordered_members(&group.members);
        let eligible: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                let state = states.get(&m.printer).copied().unwrap_or(PrinterState::Offline);
                state.is_eligible() && !excluded.contains(&m.printer)
            })
            .map(|(i, _)| i)
            .collect();

        if eligible.is_empty() {
            return Err(RoutingError::NoEligiblePrinter {
                group: group.id.clone(),
            });
        }

        let shortlist = group
            .balancing_strategy
            .shortlist(&members, &eligible, &self.in_flight);

        let last = self.cursors.get(&group.id).copied();
        let chosen = next_after(last, members.len(), &shortlist);

        let printer = members[chosen].printer.clone();
        self.cursors.insert(group.id.clone(), chosen);
        *self.in_flight.entry(printer.clone()).or_insert(0) += 1;

        Ok(printer)
    }

    /// Releases the in-flight slot taken by a previous `select`.
    pub fn release(&mut self, printer: &str) {
        if let Some(count) = self.in_flight.get_mut(printer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(printer);
            }
        }
    }

    pub fn in_flight(&self, printer: &str) -> u32 {
        self.in_flight.get(printer).copied().unwrap_or(0)
    }

    /// Drops the round-robin position of a group that was edited or deleted.
    pub fn reset_group(&mut self, group_id: &str) {
        self.cursors.remove(group_id);
    }
}

// =============================================================================
// Strategies
// =============================================================================

impl BalancingStrategy {
    /// Narrows the eligible member indices to the ones this strategy prefers.
    fn shortlist(
        &self,
        members: &[GroupMember],
        eligible: &[usize],
        in_flight: &HashMap<String, u32>,
    ) -> Vec<usize> {
        match self {
            BalancingStrategy::RoundRobin => round_robin(eligible),
            BalancingStrategy::Priority => highest_priority(members, eligible),
            BalancingStrategy::LeastBusy => least_busy(members, eligible, in_flight),
        }
    }
}

fn round_robin(eligible: &[usize]) -> Vec<usize> {
    eligible.to_vec()
}

fn highest_priority(members: &[GroupMember], eligible: &[usize]) -> Vec<usize> {
    let top = eligible.iter().map(|&i| members[i].priority).max();
    eligible
        .iter()
        .copied()
        .filter(|&i| Some(members[i].priority) == top)
        .collect()
}

fn least_busy(members: &[GroupMember], eligible: &[usize], in_flight: &HashMap<String, u32>) -> Vec<usize> {
    let load = |i: usize| in_flight.get(&members[i].printer).copied().unwrap_or(0);
    let min_load = eligible.iter().map(|&i| load(i)).min();
    let idlest: Vec<usize> = eligible
        .iter()
        .copied()
        .filter(|&i| Some(load(i)) == min_load)
        .collect();
    highest_priority(members, &idlest)
}

/// Members sorted by priority (desc) then name, one entry per printer.
fn ordered_members(members: &[GroupMember]) -> Vec<GroupMember> {
    let mut ordered = members.to_vec();
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.printer.cmp(&b.printer))
    });
    let mut seen = HashSet::new();
    ordered.retain(|m| seen.insert(m.printer.clone()));
    ordered
}

/// First index in `candidates` strictly after `last`, wrapping around.
fn next_after(last: Option<usize>, len: usize, candidates: &[usize]) -> usize {
    let start = last.map(|l| l + 1).unwrap_or(0);
    (0..len)
        .map(|offset| (start + offset) % len)
        .find(|i| candidates.contains(i))
        .unwrap_or(candidates[0])
}
