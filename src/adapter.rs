//! Boundary adapters between the contest state and the ranking engine.
//!
//! The ranking core only understands the canonical name→rank mapping and the
//! [`TieBreakResolver`] seam; everything legacy or state-shaped is adapted
//! here, once, at the edge.

use std::collections::BTreeMap;

use crate::contest::ContestState;
use crate::ranking::{
    compute_lead_ranking, LeadEntry, RankingOptions, RankingResult, TieBreakDecision,
    TieBreakResolver, TieContext, TieDecision, TieStage,
};

/// Adapt the legacy ordered-name-list tie-break input into the canonical
/// name→rank mapping (position in list + 1). Blank and repeated names are
/// skipped; ranks stay consecutive.
pub fn ranks_from_order(order: &[String]) -> BTreeMap<String, u32> {
    let mut ranks: BTreeMap<String, u32> = BTreeMap::new();
    let mut next = 1u32;
    for raw in order {
        let name = raw.trim();
        if name.is_empty() || ranks.contains_key(name) {
            continue;
        }
        ranks.insert(name.to_string(), next);
        next += 1;
    }
    ranks
}

/// Resolver backed by the admin decisions stored in [`ContestState`].
///
/// Previous-rounds rank mappings are completed from each competitor's
/// recorded `previousRoundsRank` where the stored mapping leaves a member
/// out, so pre-seeded round data participates without re-entry.
pub struct StateDecisionResolver<'a> {
    state: &'a ContestState,
}

impl<'a> StateDecisionResolver<'a> {
    pub fn new(state: &'a ContestState) -> Self {
        Self { state }
    }

    fn recorded_rank(&self, name: &str) -> Option<u32> {
        self.state
            .competitors
            .iter()
            .find(|comp| comp.name == name)
            .and_then(|comp| comp.previous_rounds_rank)
    }
}

impl TieBreakResolver for StateDecisionResolver<'_> {
    fn resolve(&self, context: &TieContext) -> Option<TieBreakDecision> {
        match context.stage {
            TieStage::PreviousRounds => {
                let decision = self
                    .state
                    .prev_rounds_tiebreak_decisions
                    .get(&context.fingerprint)?;
                match decision {
                    TieDecision::No => Some(TieBreakDecision::no()),
                    TieDecision::Yes => {
                        let mut ranks = self
                            .state
                            .prev_rounds_tiebreak_ranks
                            .get(&context.fingerprint)
                            .cloned()
                            .unwrap_or_default();
                        for name in &context.members {
                            if !ranks.contains_key(name) {
                                if let Some(rank) = self.recorded_rank(name) {
                                    ranks.insert(name.clone(), rank);
                                }
                            }
                        }
                        Some(TieBreakDecision::yes(ranks))
                    }
                }
            }
            TieStage::Time => self
                .state
                .time_tiebreak_decisions
                .get(&context.fingerprint)
                .map(|decision| match decision {
                    TieDecision::Yes => TieBreakDecision::yes(BTreeMap::new()),
                    TieDecision::No => TieBreakDecision::no(),
                }),
        }
    }
}

/// The one ranking query surface. Live views, public views and exports all
/// derive their rows from here, over whatever state snapshot they hold.
pub fn compute_ranking(state: &ContestState) -> RankingResult {
    let entries: Vec<LeadEntry> = state
        .competitors
        .iter()
        .filter(|comp| comp.marked)
        .map(LeadEntry::from)
        .collect();
    let resolver = StateDecisionResolver::new(state);
    let options = RankingOptions {
        round_name: if state.category.is_empty() {
            RankingOptions::default().round_name
        } else {
            state.category.clone()
        },
        time_criterion_enabled: state.time_criterion_enabled,
        ..RankingOptions::default()
    };
    compute_lead_ranking(&entries, Some(&resolver), &options)
}
