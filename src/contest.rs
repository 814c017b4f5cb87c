//! Contest state machine: validates and applies scoring commands.
//!
//! `apply` is the single entry point for the transport layer. It is a pure
//! function over `(state, command)`: the input state is never mutated, every
//! outcome carries a complete new state value, and re-invoking it with
//! identical inputs returns a structurally identical outcome. The caller owns
//! persistence and per-session serialization of writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ranking::TieDecision;
use crate::types::{HoldCount, Scalar, SessionId, TimerPhase};
use crate::validation::{self, ValidatedCommand};

/// A competitor entry as supplied to INIT_ROUTE, before sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club: Option<String>,
}

/// A competitor in the fixed per-route scoring order.
///
/// `hold`, `topped`, `plus` and `time_seconds` hold the performance recorded
/// by SUBMIT_SCORE; they are meaningful once `marked` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club: Option<String>,
    #[serde(default)]
    pub marked: bool,
    #[serde(default)]
    pub hold: HoldCount,
    #[serde(default)]
    pub topped: bool,
    #[serde(default)]
    pub plus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rounds_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<u32>,
}

impl Competitor {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_string(),
            club: None,
            marked: false,
            hold: HoldCount::ZERO,
            topped: false,
            plus: false,
            previous_rounds_rank: None,
            time_seconds: None,
        }
    }
}

/// Full contest box state for one category/session.
///
/// Mutated only by [`apply`]; the (`session_id`, `box_version`) pair names the
/// exact state a command was issued against, and `box_version` moves up by one
/// per applied command of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestState {
    pub session_id: SessionId,
    pub box_version: u64,
    pub initiated: bool,
    pub category: String,
    pub route_index: u32,
    pub routes_count: u32,
    pub holds_count: u32,
    pub holds_counts: Vec<u32>,
    #[serde(rename = "timerState")]
    pub timer_phase: TimerPhase,
    pub timer_preset: Option<String>,
    pub timer_preset_sec: Option<u32>,
    pub remaining: Option<f64>,
    pub hold_count: HoldCount,
    #[serde(rename = "currentClimberIndex")]
    pub current_climber: Option<usize>,
    pub last_registered_time: Option<u32>,
    pub competitors: Vec<Competitor>,
    pub time_criterion_enabled: bool,
    /// Per-competitor score history, one slot per route.
    pub scores: BTreeMap<String, Vec<Option<f64>>>,
    /// Per-competitor time history, one slot per route.
    pub times: BTreeMap<String, Vec<Option<u32>>>,
    /// Admin previous-rounds decisions keyed by tie-group fingerprint.
    pub prev_rounds_tiebreak_decisions: BTreeMap<String, TieDecision>,
    pub prev_rounds_tiebreak_ranks: BTreeMap<String, BTreeMap<String, u32>>,
    /// Admin time-stage decisions keyed by tie-group fingerprint.
    pub time_tiebreak_decisions: BTreeMap<String, TieDecision>,
}

impl ContestState {
    /// Fresh pre-init state under a caller-supplied session token.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            box_version: 0,
            initiated: false,
            category: String::new(),
            route_index: 1,
            routes_count: 1,
            holds_count: 0,
            holds_counts: Vec::new(),
            timer_phase: TimerPhase::Idle,
            timer_preset: None,
            timer_preset_sec: None,
            remaining: None,
            hold_count: HoldCount::ZERO,
            current_climber: None,
            last_registered_time: None,
            competitors: Vec::new(),
            time_criterion_enabled: false,
            scores: BTreeMap::new(),
            times: BTreeMap::new(),
            prev_rounds_tiebreak_decisions: BTreeMap::new(),
            prev_rounds_tiebreak_ranks: BTreeMap::new(),
            time_tiebreak_decisions: BTreeMap::new(),
        }
    }

    pub fn current_climber_name(&self) -> Option<&str> {
        self.current_climber
            .and_then(|idx| self.competitors.get(idx))
            .map(|comp| comp.name.as_str())
    }

    /// The next unmarked competitor after the active one, in list order.
    pub fn preparing_climber(&self) -> Option<usize> {
        let current = self.current_climber?;
        next_unmarked_after(&self.competitors, current)
    }

    pub fn route_complete(&self) -> bool {
        self.initiated && self.current_climber.is_none()
    }
}

/// One scoring command as received from the transport layer.
///
/// Every kind except INIT_ROUTE must carry the (`session_id`, `box_version`)
/// pair of the state it was issued against; a mismatch makes the command
/// stale and the outcome `ignored`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_version: Option<u64>,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            session_id: None,
            box_version: None,
            kind,
        }
    }

    /// Attach the freshness envelope of the state this command targets.
    pub fn against(mut self, state: &ContestState) -> Self {
        self.session_id = Some(state.session_id.clone());
        self.box_version = Some(state.box_version);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CommandKind {
    InitRoute {
        #[serde(default)]
        route_index: Option<u32>,
        #[serde(default)]
        routes_count: Option<u32>,
        holds_count: u32,
        #[serde(default)]
        holds_counts: Option<Vec<u32>>,
        #[serde(default)]
        competitors: Vec<CompetitorEntry>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        timer_preset: Option<String>,
    },
    ProgressUpdate {
        delta: f64,
    },
    SubmitScore {
        #[serde(default)]
        idx: Option<Scalar>,
        #[serde(default)]
        competitor_idx: Option<Scalar>,
        #[serde(default)]
        competitor: Option<String>,
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        hold: Option<f64>,
        #[serde(default)]
        topped: bool,
        #[serde(default)]
        plus: bool,
        #[serde(default)]
        registered_time: Option<Scalar>,
    },
    RegisterTime {
        registered_time: Scalar,
    },
    StartTimer,
    StopTimer {
        #[serde(default)]
        elapsed: Option<Scalar>,
    },
    ResumeTimer,
    TimerSync {
        remaining: f64,
    },
    SetTimerPreset {
        timer_preset: String,
    },
    SetTimeCriterion {
        time_criterion_enabled: bool,
    },
    PrevRoundsTiebreak {
        decision: TieDecision,
        fingerprint: String,
        #[serde(default)]
        ranks_by_name: Option<BTreeMap<String, i64>>,
        /// Legacy ordered-name-list input; adapted to `ranks_by_name` at the
        /// validation boundary.
        #[serde(default)]
        order: Option<Vec<String>>,
    },
    TimeTiebreak {
        decision: TieDecision,
        fingerprint: String,
    },
    ResetPartial {
        #[serde(default)]
        reset_timer: bool,
        #[serde(default)]
        clear_progress: bool,
        #[serde(default)]
        unmark_all: bool,
        #[serde(default)]
        new_session_id: Option<SessionId>,
    },
    ResetBox {
        new_session_id: SessionId,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitRoute { .. } => "INIT_ROUTE",
            Self::ProgressUpdate { .. } => "PROGRESS_UPDATE",
            Self::SubmitScore { .. } => "SUBMIT_SCORE",
            Self::RegisterTime { .. } => "REGISTER_TIME",
            Self::StartTimer => "START_TIMER",
            Self::StopTimer { .. } => "STOP_TIMER",
            Self::ResumeTimer => "RESUME_TIMER",
            Self::TimerSync { .. } => "TIMER_SYNC",
            Self::SetTimerPreset { .. } => "SET_TIMER_PRESET",
            Self::SetTimeCriterion { .. } => "SET_TIME_CRITERION",
            Self::PrevRoundsTiebreak { .. } => "PREV_ROUNDS_TIEBREAK",
            Self::TimeTiebreak { .. } => "TIME_TIEBREAK",
            Self::ResetPartial { .. } => "RESET_PARTIAL",
            Self::ResetBox { .. } => "RESET_BOX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    SessionMismatch,
    VersionMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Validation {
        field: Option<String>,
        message: String,
    },
    MissingSession,
    Stale(StaleReason),
    InvalidIndex(String),
    InvalidTime(String),
    IllegalTransition {
        phase: TimerPhase,
        command: &'static str,
    },
    InconsistentTieDecision(String),
}

impl EngineError {
    pub fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Stale commands map to outcome `ignored`; everything else is `error`.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, message } => match field {
                Some(field) => write!(f, "invalid {}: {}", field, message),
                None => write!(f, "invalid command: {}", message),
            },
            EngineError::MissingSession => {
                write!(f, "sessionId and boxVersion required for all commands except INIT_ROUTE")
            }
            EngineError::Stale(StaleReason::SessionMismatch) => {
                write!(f, "stale command: session mismatch")
            }
            EngineError::Stale(StaleReason::VersionMismatch) => {
                write!(f, "stale command: box version mismatch")
            }
            EngineError::InvalidIndex(msg) => write!(f, "invalid index: {}", msg),
            EngineError::InvalidTime(msg) => write!(f, "invalid time: {}", msg),
            EngineError::IllegalTransition { phase, command } => {
                write!(f, "{} not allowed while timer is {}", command, phase.as_str())
            }
            EngineError::InconsistentTieDecision(msg) => {
                write!(f, "inconsistent tie decision: {}", msg)
            }
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Applied,
    Ignored,
    Error,
}

/// Result of applying one command.
///
/// `state` is the new state on `Applied` and the unchanged input state on
/// `Ignored`/`Error`. `enriched` is the validated command with resolved
/// fields (competitor index resolved to a name, coerced times, adapted
/// legacy inputs); callers broadcast it instead of the raw input.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub status: OutcomeStatus,
    pub state: ContestState,
    pub enriched: Command,
    pub snapshot_required: bool,
    pub error: Option<EngineError>,
}

impl CommandOutcome {
    fn applied(state: ContestState, enriched: Command, snapshot_required: bool) -> Self {
        Self {
            status: OutcomeStatus::Applied,
            state,
            enriched,
            snapshot_required,
            error: None,
        }
    }

    fn ignored(state: ContestState, enriched: Command, error: EngineError) -> Self {
        Self {
            status: OutcomeStatus::Ignored,
            state,
            enriched,
            snapshot_required: false,
            error: Some(error),
        }
    }

    fn error(state: ContestState, enriched: Command, error: EngineError) -> Self {
        Self {
            status: OutcomeStatus::Error,
            state,
            enriched,
            snapshot_required: false,
            error: Some(error),
        }
    }
}

/// Apply one command to a state snapshot.
///
/// Never panics and never silently drops a command: stale commands come back
/// as `Ignored` (safe to retry after resynchronizing), invalid ones as
/// `Error` with the structured reason, and everything else as `Applied` with
/// the successor state.
pub fn apply(state: &ContestState, cmd: &Command) -> CommandOutcome {
    if let Err(err) = validation::check_freshness(state, cmd) {
        if err.is_stale() {
            return CommandOutcome::ignored(state.clone(), cmd.clone(), err);
        }
        return CommandOutcome::error(state.clone(), cmd.clone(), err);
    }

    let validated = match validation::validate(state, cmd) {
        Ok(validated) => validated,
        Err(err) => return CommandOutcome::error(state.clone(), cmd.clone(), err),
    };
    let enriched = validation::enrich(state, cmd, &validated);

    match transition(state, &validated) {
        Ok((next, snapshot_required)) => CommandOutcome::applied(next, enriched, snapshot_required),
        Err(err) => CommandOutcome::error(state.clone(), cmd.clone(), err),
    }
}

/// Pure transition over a validated command.
///
/// Bumps `box_version` by exactly one on every success path.
pub fn transition(
    state: &ContestState,
    cmd: &ValidatedCommand,
) -> Result<(ContestState, bool), EngineError> {
    let mut next = state.clone();
    let snapshot_required = match cmd {
        ValidatedCommand::InitRoute {
            route_index,
            routes_count,
            holds_count,
            holds_counts,
            competitors,
            category,
            timer_preset,
        } => {
            next.initiated = true;
            next.route_index = *route_index;
            if let Some(routes_count) = routes_count {
                next.routes_count = *routes_count;
            }
            next.holds_count = *holds_count;
            if let Some(holds_counts) = holds_counts {
                next.holds_counts = holds_counts.clone();
            }
            next.competitors = competitors.clone();
            next.current_climber = if competitors.is_empty() { None } else { Some(0) };
            next.timer_phase = TimerPhase::Idle;
            next.hold_count = HoldCount::ZERO;
            next.last_registered_time = None;
            next.remaining = None;
            // Route 1 starts a fresh contest; later routes accumulate onto
            // the existing score/time history.
            if *route_index == 1 {
                next.scores.clear();
                next.times.clear();
                clear_tiebreak_decisions(&mut next);
            }
            if let Some(category) = category {
                next.category = category.clone();
            }
            if let Some(preset) = timer_preset {
                next.timer_preset = Some(preset.text.clone());
                next.timer_preset_sec = Some(preset.seconds);
            }
            true
        }
        ValidatedCommand::ProgressUpdate { delta } => {
            let max = HoldCount::from_holds(state.holds_count);
            next.hold_count = state.hold_count.apply_delta(*delta, max);
            true
        }
        ValidatedCommand::RegisterTime { seconds } => {
            // An explicit null is valid input but does not erase the last
            // registered value; only a coerced number replaces it.
            if let Some(seconds) = seconds {
                next.last_registered_time = Some(*seconds);
            }
            true
        }
        ValidatedCommand::StartTimer => {
            if state.timer_phase != TimerPhase::Idle {
                return Err(EngineError::IllegalTransition {
                    phase: state.timer_phase,
                    command: "START_TIMER",
                });
            }
            next.timer_phase = TimerPhase::Running;
            next.last_registered_time = None;
            next.remaining = None;
            true
        }
        ValidatedCommand::StopTimer { elapsed_seconds } => {
            if state.timer_phase != TimerPhase::Running {
                return Err(EngineError::IllegalTransition {
                    phase: state.timer_phase,
                    command: "STOP_TIMER",
                });
            }
            next.timer_phase = TimerPhase::Paused;
            if let Some(elapsed) = elapsed_seconds {
                next.last_registered_time = Some(*elapsed);
            }
            true
        }
        ValidatedCommand::ResumeTimer => {
            if state.timer_phase != TimerPhase::Paused {
                return Err(EngineError::IllegalTransition {
                    phase: state.timer_phase,
                    command: "RESUME_TIMER",
                });
            }
            next.timer_phase = TimerPhase::Running;
            next.last_registered_time = None;
            true
        }
        ValidatedCommand::TimerSync { remaining } => {
            next.remaining = Some(*remaining);
            false
        }
        ValidatedCommand::SetTimerPreset { preset } => {
            next.timer_preset = Some(preset.text.clone());
            next.timer_preset_sec = Some(preset.seconds);
            if next.timer_phase == TimerPhase::Idle {
                next.remaining = Some(f64::from(preset.seconds));
            }
            true
        }
        ValidatedCommand::SetTimeCriterion { enabled } => {
            next.time_criterion_enabled = *enabled;
            true
        }
        ValidatedCommand::SubmitScore {
            index,
            name,
            score,
            hold,
            topped,
            plus,
            effective_time,
        } => {
            let route_slot = state.route_index.saturating_sub(1) as usize;
            {
                let comp = &mut next.competitors[*index];
                comp.marked = true;
                comp.hold = hold.unwrap_or(state.hold_count);
                comp.topped = *topped;
                comp.plus = *plus;
                comp.time_seconds = *effective_time;
            }
            if let Some(score) = score {
                write_history(&mut next.scores, name, route_slot, *score);
            }
            if let Some(time) = effective_time {
                write_history(&mut next.times, name, route_slot, *time);
            }
            next.timer_phase = TimerPhase::Idle;
            next.hold_count = HoldCount::ZERO;
            next.last_registered_time = *effective_time;
            next.remaining = None;
            // Advance the queue only when the active climber was scored;
            // scoring someone else is a retroactive fix.
            if state.current_climber == Some(*index) {
                next.current_climber = next_unmarked_after(&next.competitors, *index);
            }
            true
        }
        ValidatedCommand::PrevRoundsTiebreak {
            decision,
            fingerprint,
            ranks_by_name,
        } => {
            next.prev_rounds_tiebreak_decisions
                .insert(fingerprint.clone(), *decision);
            if *decision == TieDecision::Yes && !ranks_by_name.is_empty() {
                next.prev_rounds_tiebreak_ranks
                    .insert(fingerprint.clone(), ranks_by_name.clone());
            } else {
                next.prev_rounds_tiebreak_ranks.remove(fingerprint);
            }
            true
        }
        ValidatedCommand::TimeTiebreak {
            decision,
            fingerprint,
        } => {
            next.time_tiebreak_decisions
                .insert(fingerprint.clone(), *decision);
            true
        }
        ValidatedCommand::ResetPartial {
            reset_timer,
            clear_progress,
            unmark_all,
            new_session_id,
        } => {
            let mut reset_timer = *reset_timer;
            let mut clear_progress = *clear_progress;
            if *unmark_all {
                // Restarting from the first competitor returns the box to the
                // pre-init state; stale judge tabs must not keep scoring.
                reset_timer = true;
                clear_progress = true;
                next.initiated = false;
                if let Some(session_id) = new_session_id {
                    next.session_id = session_id.clone();
                }
                next.route_index = 1;
                if let Some(first) = next.holds_counts.first().copied() {
                    next.holds_count = first;
                }
                next.scores.clear();
                next.times.clear();
                next.last_registered_time = None;
                clear_tiebreak_decisions(&mut next);
                for comp in &mut next.competitors {
                    comp.marked = false;
                    comp.hold = HoldCount::ZERO;
                    comp.topped = false;
                    comp.plus = false;
                    comp.time_seconds = None;
                }
                next.current_climber = None;
            }
            if reset_timer {
                next.timer_phase = TimerPhase::Idle;
                let preset_sec = next.timer_preset_sec.or_else(|| {
                    next.timer_preset
                        .as_deref()
                        .and_then(validation::parse_timer_preset)
                        .map(|preset| preset.seconds)
                });
                next.remaining = preset_sec.map(f64::from);
                next.last_registered_time = None;
            }
            if clear_progress {
                next.hold_count = HoldCount::ZERO;
            }
            true
        }
        ValidatedCommand::ResetBox { new_session_id } => {
            next = ContestState::new(new_session_id.clone());
            true
        }
    };

    next.box_version = state.box_version + 1;
    Ok((next, snapshot_required))
}

fn clear_tiebreak_decisions(state: &mut ContestState) {
    state.prev_rounds_tiebreak_decisions.clear();
    state.prev_rounds_tiebreak_ranks.clear();
    state.time_tiebreak_decisions.clear();
}

fn write_history<T: Copy>(
    history: &mut BTreeMap<String, Vec<Option<T>>>,
    name: &str,
    slot: usize,
    value: T,
) {
    let entries = history.entry(name.to_string()).or_default();
    while entries.len() <= slot {
        entries.push(None);
    }
    entries[slot] = Some(value);
}

fn next_unmarked_after(competitors: &[Competitor], index: usize) -> Option<usize> {
    competitors
        .iter()
        .enumerate()
        .skip(index + 1)
        .find(|(_, comp)| !comp.marked)
        .map(|(idx, _)| idx)
}
