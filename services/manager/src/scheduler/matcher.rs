//! Offer-to-slot matching.
//!
//! For each incoming offer the matcher walks pending slots in a
//! deterministic order — applications by creation time ascending, slots by
//! index ascending — and greedily takes every slot whose resource request,
//! port demand, and constraint all fit within what remains of the offer.
//! An offer with no eligible slot is declined by the caller with a short
//! refuse interval so it returns promptly.

use std::collections::{HashMap, HashSet};

use crate::constraint::EvalContext;
use crate::offer::OfferAccount;
use crate::state::App;

/// One slot chosen for the offer under consideration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub app_idx: usize,
    pub slot_index: u32,
    pub ports: Vec<u16>,
}

/// Matches one offer against every pending slot, consuming the account.
///
/// `apps` must be ordered by creation time ascending; slot iteration order
/// follows the per-app index order. Slots assigned earlier in this very
/// offer count as occupying the offer's hostname, so `unique hostname`
/// holds within a single offer as well as across offers.
pub fn match_offer(apps: &[App], account: &mut OfferAccount<'_>) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    // Hostname obligations created by assignments made against this offer,
    // keyed by registry position.
    let mut claimed: HashMap<usize, HashSet<String>> = HashMap::new();

    loop {
        let mut chosen: Option<Assignment> = None;

        'apps: for (app_idx, app) in apps.iter().enumerate() {
            let mut hostnames = app.hostnames_in_use();
            if let Some(extra) = claimed.get(&app_idx) {
                hostnames.extend(extra.iter().cloned());
            }

            for slot in app.slots.values() {
                if !slot.is_schedulable() {
                    continue;
                }
                if assignments
                    .iter()
                    .any(|a: &Assignment| a.app_idx == app_idx && a.slot_index == slot.index)
                {
                    continue;
                }

                let need = &slot.version.resources;
                let nports = slot.version.port_mappings.len();
                if !account.can_fit(need, nports) {
                    continue;
                }

                if let Some(constraint) = slot.version.constraint_ast() {
                    let ctx = EvalContext {
                        offer: account.offer,
                        hostnames_in_use: &hostnames,
                    };
                    if !constraint.eval(&ctx) {
                        continue;
                    }
                }

                let ports = account
                    .take(need, nports)
                    .expect("can_fit checked before take");
                chosen = Some(Assignment {
                    app_idx,
                    slot_index: slot.index,
                    ports,
                });
                break 'apps;
            }
        }

        match chosen {
            Some(assignment) => {
                claimed
                    .entry(assignment.app_idx)
                    .or_default()
                    .insert(account.offer.hostname.clone());
                assignments.push(assignment);
            }
            None => break,
        }
    }

    assignments
}
