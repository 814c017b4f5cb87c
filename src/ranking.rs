//! Lead ranking: performance comparator plus the staged tie-break protocol.
//!
//! One ordering rule for every caller: top beats non-top, then higher hold,
//! then plus (plus carries no weight on topped results). Performance ties form
//! groups that move through a two-stage resolution: an admin-driven
//! previous-rounds stage, then an automatic time stage. Groups on the podium
//! must end fully ordered; if they cannot be, the result carries an
//! error-status tie event instead of an invented order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::contest::Competitor;
use crate::types::HoldCount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieDecision {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieStage {
    PreviousRounds,
    Time,
}

impl TieStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreviousRounds => "previous_rounds",
            Self::Time => "time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieStatus {
    Pending,
    Resolved,
    Error,
}

/// Direction of "better" in the time stage. Competition rules decide this,
/// not the engine; lower-elapsed-wins is the configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOrder {
    #[default]
    LowerWins,
    HigherWins,
}

/// A finished lead performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadResult {
    pub topped: bool,
    pub hold: HoldCount,
    #[serde(default)]
    pub plus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEntry {
    pub name: String,
    #[serde(flatten)]
    pub result: LeadResult,
}

impl From<&Competitor> for LeadEntry {
    fn from(comp: &Competitor) -> Self {
        Self {
            name: comp.name.clone(),
            result: LeadResult {
                topped: comp.topped,
                hold: comp.hold,
                plus: comp.plus,
                time_seconds: comp.time_seconds,
            },
        }
    }
}

/// Sort key realizing the comparator; bigger is better.
pub fn performance_key(result: &LeadResult) -> (bool, u32, bool) {
    (
        result.topped,
        result.hold.halves(),
        result.plus && !result.topped,
    )
}

/// `Less` means `a` ranks ahead of `b`.
pub fn compare_results(a: &LeadResult, b: &LeadResult) -> Ordering {
    performance_key(b).cmp(&performance_key(a))
}

fn score_hint(result: &LeadResult) -> f64 {
    if result.topped {
        result.hold.value()
    } else if result.plus {
        result.hold.value() + 0.1
    } else {
        result.hold.value()
    }
}

/// An admin tie-break decision for one group and stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TieBreakDecision {
    pub decision: TieDecision,
    /// Previous-rounds stage only; empty for the time stage.
    pub ranks_by_name: BTreeMap<String, u32>,
}

impl TieBreakDecision {
    pub fn yes(ranks_by_name: BTreeMap<String, u32>) -> Self {
        Self {
            decision: TieDecision::Yes,
            ranks_by_name,
        }
    }

    pub fn no() -> Self {
        Self {
            decision: TieDecision::No,
            ranks_by_name: BTreeMap::new(),
        }
    }
}

/// Everything a resolver needs to recognize a tie group.
#[derive(Debug, Clone, PartialEq)]
pub struct TieContext {
    pub round_name: String,
    pub stage: TieStage,
    pub rank_start: usize,
    pub rank_end: usize,
    pub affects_podium: bool,
    pub fingerprint: String,
    pub members: Vec<String>,
}

/// Seam for admin decisions. `None` means no decision has been made for this
/// group and stage yet.
pub trait TieBreakResolver {
    fn resolve(&self, context: &TieContext) -> Option<TieBreakDecision>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub name: String,
    pub topped: bool,
    pub hold: HoldCount,
    pub plus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<u32>,
    /// Shared by every member of an unresolved tie group.
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_group: Option<String>,
    pub tb_prev: bool,
    pub tb_time: bool,
    pub score_hint: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieEvent {
    pub group_id: String,
    pub stage: TieStage,
    pub rank_start: usize,
    pub rank_end: usize,
    pub affects_podium: bool,
    pub members: Vec<String>,
    pub status: TieStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<TieDecision>,
}

#[must_use]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingResult {
    pub rows: Vec<RankingRow>,
    pub tie_events: Vec<TieEvent>,
    pub is_resolved: bool,
    pub has_pending_podium_ties: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingOptions {
    pub podium_places: usize,
    pub round_name: String,
    pub time_order: TimeOrder,
    /// When set, groups with no stage-1 decision go straight to the time
    /// stage once every member has a time.
    pub time_criterion_enabled: bool,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            podium_places: 3,
            round_name: "Final".to_string(),
            time_order: TimeOrder::default(),
            time_criterion_enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Item {
    name: String,
    result: LeadResult,
    tb_prev: bool,
    tb_time: bool,
}

impl Item {
    fn sort_key(&self) -> (String, String) {
        (self.name.to_lowercase(), self.name.clone())
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    items: Vec<Item>,
    /// Fingerprint of the deepest stage that left these items tied.
    tie_group: Option<String>,
}

impl Chunk {
    fn single(item: Item) -> Self {
        Self {
            items: vec![item],
            tie_group: None,
        }
    }

    fn tied(items: Vec<Item>, fingerprint: String) -> Self {
        Self {
            items,
            tie_group: Some(fingerprint),
        }
    }
}

/// Compute the full lead ranking with tie-break workflow support.
///
/// The resolver supplies admin decisions; pass `None` for a plain
/// performance-ordered view. Tied groups keep shared positions; podium groups
/// that cannot be resolved are reported through `tie_events` and
/// `has_pending_podium_ties`.
pub fn compute_lead_ranking(
    entries: &[LeadEntry],
    resolver: Option<&dyn TieBreakResolver>,
    options: &RankingOptions,
) -> RankingResult {
    let podium_places = options.podium_places.max(1);
    let mut items: Vec<Item> = entries
        .iter()
        .map(|entry| Item {
            name: entry.name.clone(),
            result: entry.result.clone(),
            tb_prev: false,
            tb_time: false,
        })
        .collect();
    items.sort_by(|a, b| {
        compare_results(&a.result, &b.result).then_with(|| a.sort_key().cmp(&b.sort_key()))
    });

    let mut resolution = TieResolution {
        resolver,
        options,
        podium_places,
        events: Vec::new(),
        errors: Vec::new(),
    };

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut emitted = 0usize;
    let mut i = 0usize;
    while i < items.len() {
        let key = performance_key(&items[i].result);
        let mut j = i + 1;
        while j < items.len() && performance_key(&items[j].result) == key {
            j += 1;
        }
        let group: Vec<Item> = items[i..j].to_vec();
        let rank_start = emitted + 1;
        emitted += group.len();
        if group.len() == 1 {
            chunks.push(Chunk::single(group.into_iter().next().expect("one item")));
        } else {
            chunks.extend(resolution.resolve_group(group, rank_start));
        }
        i = j;
    }

    let mut rows: Vec<RankingRow> = Vec::new();
    let mut has_pending_podium = false;
    let mut pos = 1usize;
    for chunk in &chunks {
        let rank = pos;
        let mut members = chunk.items.clone();
        members.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        for item in &members {
            rows.push(RankingRow {
                name: item.name.clone(),
                topped: item.result.topped,
                hold: item.result.hold,
                plus: item.result.plus,
                time_seconds: item.result.time_seconds,
                position: rank,
                tie_group: chunk.tie_group.clone(),
                tb_prev: item.tb_prev,
                tb_time: item.tb_time,
                score_hint: score_hint(&item.result),
            });
        }
        if chunk.items.len() > 1 && rank <= podium_places {
            has_pending_podium = true;
        }
        pos += chunk.items.len();
    }
    for event in &resolution.events {
        if event.affects_podium && matches!(event.status, TieStatus::Pending | TieStatus::Error) {
            has_pending_podium = true;
        }
    }

    RankingResult {
        rows,
        tie_events: resolution.events,
        is_resolved: !has_pending_podium,
        has_pending_podium_ties: has_pending_podium,
        errors: resolution.errors,
    }
}

struct TieResolution<'a> {
    resolver: Option<&'a dyn TieBreakResolver>,
    options: &'a RankingOptions,
    podium_places: usize,
    events: Vec<TieEvent>,
    errors: Vec<String>,
}

impl TieResolution<'_> {
    /// Stage 1: previous rounds. Admin-driven; omission advances the whole
    /// group to the time stage (or parks it pending on the podium when the
    /// time criterion is off).
    fn resolve_group(&mut self, members: Vec<Item>, rank_start: usize) -> Vec<Chunk> {
        let affects_podium = rank_start <= self.podium_places;
        let ctx = self.context(TieStage::PreviousRounds, rank_start, &members, affects_podium);
        let decision = self.resolver.and_then(|resolver| resolver.resolve(&ctx));

        let decision = match decision {
            None => {
                if self.options.time_criterion_enabled {
                    return self.time_stage(members, rank_start, false);
                }
                if affects_podium {
                    self.push_event(&ctx, &members, TieStatus::Pending, "previous_rounds_pending", None);
                    return vec![Chunk::tied(members, ctx.fingerprint)];
                }
                // Non-podium groups stay tied until an admin says otherwise.
                return vec![Chunk::tied(members, ctx.fingerprint)];
            }
            Some(decision) => decision,
        };

        if decision.decision == TieDecision::No {
            return self.time_stage(members, rank_start, true);
        }

        let ranks = &decision.ranks_by_name;
        if ranks.is_empty() {
            self.fail(&ctx, &members, "missing_previous_rounds_ranks");
            return vec![Chunk::tied(members, ctx.fingerprint)];
        }
        let member_names: BTreeSet<&str> = members.iter().map(|item| item.name.as_str()).collect();
        for name in ranks.keys() {
            if !member_names.contains(name.as_str()) {
                self.fail(
                    &ctx,
                    &members,
                    &format!("invalid_previous_rounds_rank_member:{name}"),
                );
                return vec![Chunk::tied(members, ctx.fingerprint)];
            }
        }
        let mut seen_ranks: BTreeSet<u32> = BTreeSet::new();
        for rank in ranks.values() {
            if !seen_ranks.insert(*rank) {
                self.fail(&ctx, &members, "duplicate_previous_rounds_rank");
                return vec![Chunk::tied(members, ctx.fingerprint)];
            }
        }

        let (mut mapped, omitted): (Vec<Item>, Vec<Item>) = members
            .into_iter()
            .partition(|item| ranks.contains_key(&item.name));
        mapped.sort_by_key(|item| ranks[&item.name]);
        if let Some(best) = mapped.first_mut() {
            best.tb_prev = true;
        }
        let mapped_len = mapped.len();
        let mut chunks: Vec<Chunk> = mapped.into_iter().map(Chunk::single).collect();

        if omitted.len() > 1 {
            // The unmapped remainder stays tied and takes its chances in the
            // time stage, placed after every mapped member.
            let sub_rank_start = rank_start + mapped_len;
            chunks.extend(self.time_stage(omitted, sub_rank_start, true));
        } else {
            if let Some(last) = omitted.into_iter().next() {
                chunks.push(Chunk::single(last));
            }
            self.push_event(
                &ctx,
                &[],
                TieStatus::Resolved,
                "resolved_by_previous_rounds",
                Some(TieDecision::Yes),
            );
        }
        chunks
    }

    /// Stage 2: time. Automatic once every member has a registered time.
    /// `explicit` marks groups sent here by an admin decision; only those may
    /// produce error events on missing times outside the podium.
    fn time_stage(&mut self, members: Vec<Item>, rank_start: usize, explicit: bool) -> Vec<Chunk> {
        let affects_podium = rank_start <= self.podium_places;
        let ctx = self.context(TieStage::Time, rank_start, &members, affects_podium);
        let stored = self.resolver.and_then(|resolver| resolver.resolve(&ctx));
        let explicit = explicit || stored.is_some();

        if let Some(decision) = &stored {
            if decision.decision == TieDecision::No {
                if affects_podium {
                    self.errors
                        .push(format!("podium_time_tiebreak_keep_tied_not_allowed:{}", ctx.fingerprint));
                    self.push_event(
                        &ctx,
                        &members,
                        TieStatus::Error,
                        "podium_keep_tied_not_allowed",
                        Some(TieDecision::No),
                    );
                }
                return vec![Chunk::tied(members, ctx.fingerprint)];
            }
        }

        let missing: Vec<&str> = members
            .iter()
            .filter(|item| item.result.time_seconds.is_none())
            .map(|item| item.name.as_str())
            .collect();
        if !missing.is_empty() {
            if explicit {
                self.errors
                    .push(format!("time_tiebreak_missing_times:{}", ctx.fingerprint));
                self.push_event(&ctx, &members, TieStatus::Error, "missing_time_seconds", None);
            } else if affects_podium {
                self.push_event(&ctx, &members, TieStatus::Pending, "missing_time_seconds", None);
            }
            return vec![Chunk::tied(members, ctx.fingerprint)];
        }

        let mut members = members;
        for item in &mut members {
            item.tb_time = true;
        }
        let time_order = self.options.time_order;
        members.sort_by(|a, b| {
            let ta = a.result.time_seconds.expect("checked above");
            let tb = b.result.time_seconds.expect("checked above");
            let by_time = match time_order {
                TimeOrder::LowerWins => ta.cmp(&tb),
                TimeOrder::HigherWins => tb.cmp(&ta),
            };
            by_time.then_with(|| a.sort_key().cmp(&b.sort_key()))
        });

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut has_unresolved = false;
        let mut i = 0usize;
        while i < members.len() {
            let time = members[i].result.time_seconds;
            let mut j = i + 1;
            while j < members.len() && members[j].result.time_seconds == time {
                j += 1;
            }
            if j - i > 1 {
                has_unresolved = true;
                chunks.push(Chunk::tied(members[i..j].to_vec(), ctx.fingerprint.clone()));
            } else {
                chunks.push(Chunk::single(members[i].clone()));
            }
            i = j;
        }

        if has_unresolved && affects_podium {
            self.errors
                .push(format!("identical_time_keeps_podium_tie:{}", ctx.fingerprint));
            self.push_event(
                &ctx,
                &members,
                TieStatus::Error,
                "identical_time_keeps_podium_tie",
                None,
            );
        } else if !has_unresolved {
            self.push_event(&ctx, &[], TieStatus::Resolved, "resolved_by_time", Some(TieDecision::Yes));
        }
        chunks
    }

    fn context(
        &self,
        stage: TieStage,
        rank_start: usize,
        members: &[Item],
        affects_podium: bool,
    ) -> TieContext {
        let rank_end = rank_start + members.len() - 1;
        let mut names: Vec<String> = members.iter().map(|item| item.name.clone()).collect();
        names.sort_by_key(|name| (name.to_lowercase(), name.clone()));
        TieContext {
            round_name: self.options.round_name.clone(),
            stage,
            rank_start,
            rank_end,
            affects_podium,
            fingerprint: fingerprint(&self.options.round_name, stage, rank_start, rank_end, affects_podium, members),
            members: names,
        }
    }

    fn push_event(
        &mut self,
        ctx: &TieContext,
        members: &[Item],
        status: TieStatus,
        detail: &str,
        decision: Option<TieDecision>,
    ) {
        let members = if members.is_empty() {
            ctx.members.clone()
        } else {
            let mut names: Vec<String> = members.iter().map(|item| item.name.clone()).collect();
            names.sort_by_key(|name| (name.to_lowercase(), name.clone()));
            names
        };
        self.events.push(TieEvent {
            group_id: ctx.fingerprint.clone(),
            stage: ctx.stage,
            rank_start: ctx.rank_start,
            rank_end: ctx.rank_end,
            affects_podium: ctx.affects_podium,
            members,
            status,
            detail: Some(detail.to_string()),
            decision,
        });
    }

    fn fail(&mut self, ctx: &TieContext, members: &[Item], detail: &str) {
        self.errors
            .push(format!("invalid_previous_rounds_decision:{}:{}", ctx.fingerprint, detail));
        self.push_event(ctx, members, TieStatus::Error, detail, None);
    }
}

/// Deterministic tie-group identity: SHA-256 over a canonical,
/// insertion-ordered JSON payload of the group's round, stage, rank span and
/// member performances.
fn fingerprint(
    round_name: &str,
    stage: TieStage,
    rank_start: usize,
    rank_end: usize,
    affects_podium: bool,
    members: &[Item],
) -> String {
    let mut sorted: Vec<&Item> = members.iter().collect();
    sorted.sort_by_key(|item| (item.name.to_lowercase(), item.name.clone()));

    let mut member_values: Vec<Value> = Vec::with_capacity(sorted.len());
    for item in sorted {
        let mut entry = Map::new();
        entry.insert("name".to_string(), Value::String(item.name.clone()));
        entry.insert("topped".to_string(), Value::Bool(item.result.topped));
        entry.insert(
            "holdHalves".to_string(),
            Value::Number(item.result.hold.halves().into()),
        );
        entry.insert(
            "plus".to_string(),
            Value::Bool(item.result.plus && !item.result.topped),
        );
        entry.insert(
            "time".to_string(),
            match item.result.time_seconds {
                Some(seconds) => Value::Number(seconds.into()),
                None => Value::Null,
            },
        );
        member_values.push(Value::Object(entry));
    }

    let mut root = Map::new();
    root.insert("round".to_string(), Value::String(round_name.to_string()));
    root.insert("stage".to_string(), Value::String(stage.as_str().to_string()));
    root.insert("rankStart".to_string(), Value::Number((rank_start as u64).into()));
    root.insert("rankEnd".to_string(), Value::Number((rank_end as u64).into()));
    root.insert("affectsPodium".to_string(), Value::Bool(affects_podium));
    root.insert("members".to_string(), Value::Array(member_values));

    let raw = serde_json::to_string(&Value::Object(root)).expect("fingerprint payload serializes");
    let digest = Sha256::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("tb:{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapResolver {
        decisions: BTreeMap<(TieStage, Vec<String>, usize), TieBreakDecision>,
    }

    impl MapResolver {
        fn new() -> Self {
            Self {
                decisions: BTreeMap::new(),
            }
        }

        fn with(
            mut self,
            stage: TieStage,
            members: &[&str],
            rank_start: usize,
            decision: TieBreakDecision,
        ) -> Self {
            let mut members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
            members.sort();
            self.decisions.insert((stage, members, rank_start), decision);
            self
        }
    }

    impl TieBreakResolver for MapResolver {
        fn resolve(&self, context: &TieContext) -> Option<TieBreakDecision> {
            let mut members = context.members.clone();
            members.sort();
            self.decisions
                .get(&(context.stage, members, context.rank_start))
                .cloned()
        }
    }

    fn entry(name: &str, topped: bool, hold: f64, plus: bool, time: Option<u32>) -> LeadEntry {
        LeadEntry {
            name: name.to_string(),
            result: LeadResult {
                topped,
                hold: HoldCount::from_value(hold).unwrap(),
                plus,
                time_seconds: time,
            },
        }
    }

    fn ranks(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(n, r)| (n.to_string(), *r)).collect()
    }

    fn positions(result: &RankingResult) -> BTreeMap<String, usize> {
        result
            .rows
            .iter()
            .map(|row| (row.name.clone(), row.position))
            .collect()
    }

    #[test]
    fn top_beats_any_hold_count() {
        let a = LeadResult {
            topped: true,
            hold: HoldCount::ZERO,
            plus: false,
            time_seconds: None,
        };
        let b = LeadResult {
            topped: false,
            hold: HoldCount::from_holds(9),
            plus: true,
            time_seconds: None,
        };
        assert_eq!(compare_results(&a, &b), Ordering::Less);
        assert_eq!(compare_results(&b, &a), Ordering::Greater);
    }

    #[test]
    fn plus_breaks_hold_ties_only_below_the_top() {
        let plain = LeadResult {
            topped: false,
            hold: HoldCount::from_holds(30),
            plus: false,
            time_seconds: None,
        };
        let plus = LeadResult {
            plus: true,
            ..plain.clone()
        };
        assert_eq!(compare_results(&plus, &plain), Ordering::Less);

        let top_plain = LeadResult {
            topped: true,
            ..plain.clone()
        };
        let top_plus = LeadResult {
            topped: true,
            ..plus.clone()
        };
        assert_eq!(compare_results(&top_plain, &top_plus), Ordering::Equal);
    }

    #[test]
    fn distinct_performances_rank_without_events() {
        let entries = vec![
            entry("Ana", true, 40.0, false, Some(90)),
            entry("Bob", false, 39.0, true, Some(100)),
            entry("Cara", false, 39.0, false, Some(80)),
        ];
        let out = compute_lead_ranking(&entries, None, &RankingOptions::default());
        assert!(out.is_resolved);
        assert!(out.tie_events.is_empty());
        let names: Vec<&str> = out.rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, ["Ana", "Bob", "Cara"]);
        let ranks: Vec<usize> = out.rows.iter().map(|row| row.position).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn tie_outside_podium_keeps_shared_position() {
        let entries = vec![
            entry("Ana", true, 40.0, false, Some(100)),
            entry("Bob", false, 39.0, true, Some(101)),
            entry("Cara", false, 38.0, true, Some(102)),
            entry("Dan", false, 30.0, false, Some(103)),
            entry("Ema", false, 30.0, false, Some(104)),
        ];
        let out = compute_lead_ranking(&entries, None, &RankingOptions::default());
        assert!(out.is_resolved);
        assert!(out.tie_events.is_empty());
        let by_name = positions(&out);
        assert_eq!(by_name["Dan"], 4);
        assert_eq!(by_name["Ema"], 4);
        let dan = out.rows.iter().find(|row| row.name == "Dan").unwrap();
        assert!(dan.tie_group.is_some());
    }

    #[test]
    fn positions_skip_after_shared_rank() {
        let entries = vec![
            entry("Ana", true, 40.0, false, None),
            entry("Bob", false, 30.0, false, Some(10)),
            entry("Cara", false, 30.0, false, Some(10)),
            entry("Dan", false, 20.0, false, None),
        ];
        // Tie at rank 2 is outside podium scrutiny only if podium is 1 place.
        let options = RankingOptions {
            podium_places: 1,
            ..RankingOptions::default()
        };
        let out = compute_lead_ranking(&entries, None, &options);
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 2);
        assert_eq!(by_name["Cara"], 2);
        assert_eq!(by_name["Dan"], 4);
    }

    #[test]
    fn podium_tie_without_decision_is_pending() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let out = compute_lead_ranking(&entries, None, &RankingOptions::default());
        assert!(!out.is_resolved);
        assert!(out.has_pending_podium_ties);
        let event = &out.tie_events[0];
        assert_eq!(event.stage, TieStage::PreviousRounds);
        assert_eq!(event.status, TieStatus::Pending);
        assert!(event.affects_podium);
        assert_eq!(event.members, vec!["Ana".to_string(), "Bob".to_string()]);
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 1);
    }

    #[test]
    fn two_way_podium_tie_resolved_by_previous_rounds() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob"],
            1,
            TieBreakDecision::yes(ranks(&[("Ana", 1), ("Bob", 2)])),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(out.is_resolved);
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 2);
        let ana = out.rows.iter().find(|row| row.name == "Ana").unwrap();
        assert!(ana.tb_prev);
        assert!(out
            .tie_events
            .iter()
            .any(|event| event.status == TieStatus::Resolved));
    }

    #[test]
    fn three_way_tie_fully_ordered_by_ranks() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(130)),
            entry("Bob", false, 30.0, false, Some(120)),
            entry("Cara", false, 30.0, false, Some(110)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob", "Cara"],
            1,
            TieBreakDecision::yes(ranks(&[("Cara", 1), ("Ana", 2), ("Bob", 3)])),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(out.is_resolved);
        let names: Vec<&str> = out.rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, ["Cara", "Ana", "Bob"]);
        let ranks: Vec<usize> = out.rows.iter().map(|row| row.position).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn partial_mapping_routes_the_rest_to_the_time_stage() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(105)),
            entry("Bob", false, 30.0, false, Some(130)),
            entry("Cara", false, 30.0, false, Some(150)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob", "Cara"],
            1,
            TieBreakDecision::yes(ranks(&[("Cara", 1)])),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(out.is_resolved);
        let names: Vec<&str> = out.rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, ["Cara", "Ana", "Bob"]);
        let by_name = positions(&out);
        assert_eq!(by_name["Cara"], 1);
        assert_eq!(by_name["Ana"], 2);
        assert_eq!(by_name["Bob"], 3);
        let ana = out.rows.iter().find(|row| row.name == "Ana").unwrap();
        assert!(ana.tb_time);
        let cara = out.rows.iter().find(|row| row.name == "Cara").unwrap();
        assert!(cara.tb_prev);
        assert!(!cara.tb_time);
    }

    #[test]
    fn mapping_with_unknown_member_is_rejected() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(90)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob"],
            1,
            TieBreakDecision::yes(ranks(&[("Ana", 1), ("Zoe", 2)])),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(!out.is_resolved);
        assert!(!out.errors.is_empty());
        let event = &out.tie_events[0];
        assert_eq!(event.status, TieStatus::Error);
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 1);
    }

    #[test]
    fn duplicate_rank_values_are_rejected() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(90)),
            entry("Bob", false, 30.0, false, Some(100)),
            entry("Cara", false, 30.0, false, Some(110)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob", "Cara"],
            1,
            TieBreakDecision::yes(ranks(&[("Ana", 1), ("Bob", 2), ("Cara", 2)])),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(!out.is_resolved);
        assert!(out
            .tie_events
            .iter()
            .any(|event| event.detail.as_deref() == Some("duplicate_previous_rounds_rank")));
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 1);
        assert_eq!(by_name["Cara"], 1);
    }

    #[test]
    fn declined_stage_one_uses_times() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob"],
            1,
            TieBreakDecision::no(),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(out.is_resolved);
        let by_name = positions(&out);
        assert_eq!(by_name["Bob"], 1);
        assert_eq!(by_name["Ana"], 2);
        assert!(out.rows.iter().all(|row| row.tb_time));
    }

    #[test]
    fn higher_wins_reverses_the_time_stage() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob"],
            1,
            TieBreakDecision::no(),
        );
        let options = RankingOptions {
            time_order: TimeOrder::HigherWins,
            ..RankingOptions::default()
        };
        let out = compute_lead_ranking(&entries, Some(&resolver), &options);
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 2);
    }

    #[test]
    fn equal_podium_times_surface_an_error_event() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(120)),
            entry("Bob", false, 30.0, false, Some(120)),
            entry("Cara", false, 30.0, false, Some(120)),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob", "Cara"],
            1,
            TieBreakDecision::no(),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(!out.is_resolved);
        assert!(out.has_pending_podium_ties);
        let event = out
            .tie_events
            .iter()
            .find(|event| event.stage == TieStage::Time)
            .unwrap();
        assert_eq!(event.status, TieStatus::Error);
        assert_eq!(event.detail.as_deref(), Some("identical_time_keeps_podium_tie"));
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 1);
        assert_eq!(by_name["Cara"], 1);
    }

    #[test]
    fn missing_times_surface_an_error_when_admin_asked() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(120)),
            entry("Bob", false, 30.0, false, None),
        ];
        let resolver = MapResolver::new().with(
            TieStage::PreviousRounds,
            &["Ana", "Bob"],
            1,
            TieBreakDecision::no(),
        );
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(!out.is_resolved);
        let event = out
            .tie_events
            .iter()
            .find(|event| event.stage == TieStage::Time)
            .unwrap();
        assert_eq!(event.status, TieStatus::Error);
        assert_eq!(event.detail.as_deref(), Some("missing_time_seconds"));
        let by_name = positions(&out);
        assert_eq!(by_name["Ana"], 1);
        assert_eq!(by_name["Bob"], 1);
    }

    #[test]
    fn time_criterion_resolves_omitted_groups_automatically() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let options = RankingOptions {
            time_criterion_enabled: true,
            ..RankingOptions::default()
        };
        let out = compute_lead_ranking(&entries, None, &options);
        assert!(out.is_resolved);
        let by_name = positions(&out);
        assert_eq!(by_name["Bob"], 1);
        assert_eq!(by_name["Ana"], 2);
    }

    #[test]
    fn explicit_keep_tied_on_podium_is_an_error() {
        let entries = vec![
            entry("Ana", false, 30.0, false, Some(140)),
            entry("Bob", false, 30.0, false, Some(100)),
        ];
        let resolver = MapResolver::new()
            .with(
                TieStage::PreviousRounds,
                &["Ana", "Bob"],
                1,
                TieBreakDecision::no(),
            )
            .with(TieStage::Time, &["Ana", "Bob"], 1, TieBreakDecision::no());
        let out = compute_lead_ranking(&entries, Some(&resolver), &RankingOptions::default());
        assert!(!out.is_resolved);
        let event = out
            .tie_events
            .iter()
            .find(|event| event.stage == TieStage::Time)
            .unwrap();
        assert_eq!(event.status, TieStatus::Error);
        assert_eq!(event.detail.as_deref(), Some("podium_keep_tied_not_allowed"));
    }

    #[test]
    fn score_hint_reflects_plus_below_the_top() {
        let plus = LeadResult {
            topped: false,
            hold: HoldCount::from_holds(20),
            plus: true,
            time_seconds: None,
        };
        assert_eq!(score_hint(&plus), 20.1);
        let topped = LeadResult {
            topped: true,
            hold: HoldCount::from_holds(40),
            plus: false,
            time_seconds: None,
        };
        assert_eq!(score_hint(&topped), 40.0);
    }

    #[test]
    fn fingerprints_are_deterministic_and_member_order_free() {
        let items = |order: &[&str]| -> Vec<Item> {
            order
                .iter()
                .map(|name| Item {
                    name: name.to_string(),
                    result: LeadResult {
                        topped: false,
                        hold: HoldCount::from_holds(30),
                        plus: false,
                        time_seconds: Some(100),
                    },
                    tb_prev: false,
                    tb_time: false,
                })
                .collect()
        };
        let a = fingerprint("Final", TieStage::PreviousRounds, 1, 2, true, &items(&["Ana", "Bob"]));
        let b = fingerprint("Final", TieStage::PreviousRounds, 1, 2, true, &items(&["Bob", "Ana"]));
        assert_eq!(a, b);
        assert!(a.starts_with("tb:"));
        let other = fingerprint("Final", TieStage::Time, 1, 2, true, &items(&["Ana", "Bob"]));
        assert_ne!(a, other);
    }
}
