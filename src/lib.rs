//! Pure scoring core for climbing (lead) competitions.
//!
//! Two tightly coupled pieces: a deterministic contest state machine
//! ([`contest::apply`]) that validates and applies scoring commands, and a
//! lead ranking engine ([`adapter::compute_ranking`]) that derives the final
//! order and walks tie groups through the staged resolution protocol.
//!
//! Everything here is synchronous, side-effect free and caller-clocked:
//! no wall time, no randomness, no I/O. Transport, persistence and
//! authentication live in the surrounding service.

pub mod adapter;
pub mod contest;
pub mod ranking;
pub mod types;
pub mod validation;

pub use adapter::{compute_ranking, ranks_from_order, StateDecisionResolver};
pub use contest::{
    apply, transition, Command, CommandKind, CommandOutcome, Competitor, CompetitorEntry,
    ContestState, EngineError, OutcomeStatus, StaleReason,
};
pub use ranking::{
    compare_results, compute_lead_ranking, LeadEntry, LeadResult, RankingOptions, RankingResult,
    RankingRow, TieBreakDecision, TieBreakResolver, TieContext, TieDecision, TieEvent, TieStage,
    TieStatus, TimeOrder,
};
pub use types::{HoldCount, HoldDelta, Scalar, SessionId, TimerPhase};
pub use validation::{validate, TimerPreset, ValidatedCommand};
