//! Command validation: field bounds, input sanitization, and the explicit
//! coercions for loosely typed wire fields.
//!
//! Everything a command needs resolved before the transition engine touches
//! it happens here: numeric-string indexes become concrete list positions,
//! raw time values become whole seconds or a structured error, legacy
//! ordered-name tie-break lists become rank mappings. Values outside their
//! bounds are rejected, never clamped.

use std::collections::BTreeMap;

use crate::adapter::ranks_from_order;
use crate::contest::{Command, CommandKind, Competitor, ContestState, EngineError, StaleReason};
use crate::ranking::TieDecision;
use crate::types::{HoldCount, HoldDelta, Scalar, SessionId};

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_COMPETITORS: usize = 500;
pub const MAX_HOLDS: u32 = 100;
pub const MAX_ROUTE_INDEX: u32 = 999;
pub const DELTA_LIMIT: f64 = 10.0;
pub const SCORE_MAX: f64 = 100.0;
pub const TIME_MAX_SECONDS: u32 = 3600;
pub const REMAINING_MAX: f64 = 9999.0;

/// A normalized `MM:SS` timer preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerPreset {
    pub text: String,
    pub seconds: u32,
}

/// A command after validation: bounds checked, names sanitized, loose
/// scalars coerced, and the scoring target resolved to a concrete position.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedCommand {
    InitRoute {
        route_index: u32,
        routes_count: Option<u32>,
        holds_count: u32,
        holds_counts: Option<Vec<u32>>,
        competitors: Vec<Competitor>,
        category: Option<String>,
        timer_preset: Option<TimerPreset>,
    },
    ProgressUpdate {
        delta: HoldDelta,
    },
    SubmitScore {
        index: usize,
        name: String,
        score: Option<f64>,
        hold: Option<HoldCount>,
        topped: bool,
        plus: bool,
        effective_time: Option<u32>,
    },
    RegisterTime {
        seconds: Option<u32>,
    },
    StartTimer,
    StopTimer {
        elapsed_seconds: Option<u32>,
    },
    ResumeTimer,
    TimerSync {
        remaining: f64,
    },
    SetTimerPreset {
        preset: TimerPreset,
    },
    SetTimeCriterion {
        enabled: bool,
    },
    PrevRoundsTiebreak {
        decision: TieDecision,
        fingerprint: String,
        ranks_by_name: BTreeMap<String, u32>,
    },
    TimeTiebreak {
        decision: TieDecision,
        fingerprint: String,
    },
    ResetPartial {
        reset_timer: bool,
        clear_progress: bool,
        unmark_all: bool,
        new_session_id: Option<SessionId>,
    },
    ResetBox {
        new_session_id: SessionId,
    },
}

/// Session/version freshness.
///
/// INIT_ROUTE establishes the session and is exempt. Every other command must
/// name the exact (`sessionId`, `boxVersion`) pair of the current state: a
/// missing envelope is malformed (`Error`), a mismatched one is stale
/// (`Ignored`, safe to retry after the caller resynchronizes).
pub fn check_freshness(state: &ContestState, cmd: &Command) -> Result<(), EngineError> {
    if matches!(cmd.kind, CommandKind::InitRoute { .. }) {
        return Ok(());
    }
    let (session_id, box_version) = match (&cmd.session_id, cmd.box_version) {
        (Some(session_id), Some(box_version)) => (session_id, box_version),
        _ => return Err(EngineError::MissingSession),
    };
    if *session_id != state.session_id {
        return Err(EngineError::Stale(StaleReason::SessionMismatch));
    }
    if box_version != state.box_version {
        return Err(EngineError::Stale(StaleReason::VersionMismatch));
    }
    Ok(())
}

pub fn validate(state: &ContestState, cmd: &Command) -> Result<ValidatedCommand, EngineError> {
    match validate_inner(state, cmd) {
        Ok(validated) => Ok(validated),
        Err(err) => {
            tracing::warn!(command = cmd.kind.name(), %err, "command validation failed");
            Err(err)
        }
    }
}

fn validate_inner(state: &ContestState, cmd: &Command) -> Result<ValidatedCommand, EngineError> {
    match &cmd.kind {
        CommandKind::InitRoute {
            route_index,
            routes_count,
            holds_count,
            holds_counts,
            competitors,
            category,
            timer_preset,
        } => {
            let route_index = route_index.unwrap_or(1);
            if !(1..=MAX_ROUTE_INDEX).contains(&route_index) {
                return Err(EngineError::validation(
                    Some("routeIndex"),
                    format!("must be 1..={MAX_ROUTE_INDEX}"),
                ));
            }
            if *holds_count > MAX_HOLDS {
                return Err(EngineError::validation(
                    Some("holdsCount"),
                    format!("must be 0..={MAX_HOLDS}"),
                ));
            }
            if let Some(counts) = holds_counts {
                if counts.iter().any(|count| *count > MAX_HOLDS) {
                    return Err(EngineError::validation(
                        Some("holdsCounts"),
                        format!("every entry must be 0..={MAX_HOLDS}"),
                    ));
                }
            }
            if competitors.len() > MAX_COMPETITORS {
                return Err(EngineError::validation(
                    Some("competitors"),
                    format!("cannot exceed {MAX_COMPETITORS} entries"),
                ));
            }
            let mut normalized: Vec<Competitor> = Vec::with_capacity(competitors.len());
            for entry in competitors {
                let name = sanitize_name(&entry.name);
                if name.is_empty() {
                    return Err(EngineError::validation(
                        Some("competitors"),
                        "competitor name empty after sanitization",
                    ));
                }
                if normalized.iter().any(|comp| comp.name == name) {
                    continue;
                }
                let mut comp = Competitor::new(&name);
                comp.club = entry
                    .club
                    .as_deref()
                    .map(|club| sanitize_text(club, MAX_NAME_LEN))
                    .filter(|club| !club.is_empty());
                normalized.push(comp);
            }
            let category = match category {
                Some(category) => {
                    let sanitized = sanitize_text(category, MAX_CATEGORY_LEN);
                    if sanitized.is_empty() {
                        return Err(EngineError::validation(Some("category"), "cannot be empty"));
                    }
                    Some(sanitized)
                }
                None => None,
            };
            let timer_preset = timer_preset
                .as_deref()
                .map(|preset| {
                    parse_timer_preset(preset).ok_or_else(|| {
                        EngineError::validation(Some("timerPreset"), "must be MM:SS")
                    })
                })
                .transpose()?;
            Ok(ValidatedCommand::InitRoute {
                route_index,
                routes_count: *routes_count,
                holds_count: *holds_count,
                holds_counts: holds_counts.clone(),
                competitors: normalized,
                category,
                timer_preset,
            })
        }
        CommandKind::ProgressUpdate { delta } => {
            if !delta.is_finite() || delta.abs() > DELTA_LIMIT {
                return Err(EngineError::validation(
                    Some("delta"),
                    format!("must be within -{DELTA_LIMIT}..={DELTA_LIMIT}"),
                ));
            }
            let delta = HoldDelta::from_value(*delta).ok_or_else(|| {
                EngineError::validation(Some("delta"), "must be a half-hold multiple")
            })?;
            Ok(ValidatedCommand::ProgressUpdate { delta })
        }
        CommandKind::SubmitScore {
            idx,
            competitor_idx,
            competitor,
            score,
            hold,
            topped,
            plus,
            registered_time,
        } => {
            let (index, name) =
                resolve_target(state, idx.as_ref(), competitor_idx.as_ref(), competitor.as_deref())?;
            if let Some(score) = score {
                if !score.is_finite() || !(0.0..=SCORE_MAX).contains(score) {
                    return Err(EngineError::validation(
                        Some("score"),
                        format!("must be within 0..={SCORE_MAX}"),
                    ));
                }
            }
            let hold = hold
                .map(|hold| {
                    let parsed = HoldCount::from_value(hold).ok_or_else(|| {
                        EngineError::validation(Some("hold"), "must be a non-negative half-hold multiple")
                    })?;
                    if parsed > HoldCount::from_holds(state.holds_count) {
                        return Err(EngineError::validation(
                            Some("hold"),
                            "exceeds the route's hold count",
                        ));
                    }
                    Ok(parsed)
                })
                .transpose()?;
            let submitted = registered_time
                .as_ref()
                .map(coerce_seconds)
                .transpose()?
                .flatten();
            let effective_time = submitted.or(state.last_registered_time);
            Ok(ValidatedCommand::SubmitScore {
                index,
                name,
                score: *score,
                hold,
                topped: *topped,
                plus: *plus,
                effective_time,
            })
        }
        CommandKind::RegisterTime { registered_time } => Ok(ValidatedCommand::RegisterTime {
            seconds: coerce_seconds(registered_time)?,
        }),
        CommandKind::StartTimer => Ok(ValidatedCommand::StartTimer),
        CommandKind::StopTimer { elapsed } => Ok(ValidatedCommand::StopTimer {
            elapsed_seconds: elapsed.as_ref().map(coerce_seconds).transpose()?.flatten(),
        }),
        CommandKind::ResumeTimer => Ok(ValidatedCommand::ResumeTimer),
        CommandKind::TimerSync { remaining } => {
            if !remaining.is_finite() || !(0.0..=REMAINING_MAX).contains(remaining) {
                return Err(EngineError::validation(
                    Some("remaining"),
                    format!("must be within 0..={REMAINING_MAX}"),
                ));
            }
            Ok(ValidatedCommand::TimerSync {
                remaining: *remaining,
            })
        }
        CommandKind::SetTimerPreset { timer_preset } => {
            let preset = parse_timer_preset(timer_preset)
                .ok_or_else(|| EngineError::validation(Some("timerPreset"), "must be MM:SS"))?;
            Ok(ValidatedCommand::SetTimerPreset { preset })
        }
        CommandKind::SetTimeCriterion {
            time_criterion_enabled,
        } => Ok(ValidatedCommand::SetTimeCriterion {
            enabled: *time_criterion_enabled,
        }),
        CommandKind::PrevRoundsTiebreak {
            decision,
            fingerprint,
            ranks_by_name,
            order,
        } => {
            let fingerprint = require_fingerprint(fingerprint)?;
            // Legacy ordered-name input becomes the canonical mapping right
            // here; the resolver only ever sees ranks.
            let raw_ranks: BTreeMap<String, i64> = match (ranks_by_name, order) {
                (Some(ranks), _) => ranks.clone(),
                (None, Some(order)) => ranks_from_order(order)
                    .into_iter()
                    .map(|(name, rank)| (name, i64::from(rank)))
                    .collect(),
                (None, None) => BTreeMap::new(),
            };
            let mut ranks = BTreeMap::new();
            if *decision == TieDecision::Yes {
                for (raw_name, rank) in &raw_ranks {
                    let name = raw_name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    if *rank <= 0 || *rank > i64::from(u32::MAX) {
                        return Err(EngineError::InconsistentTieDecision(format!(
                            "rank for {} must be a positive integer",
                            name
                        )));
                    }
                    ranks.insert(name.to_string(), *rank as u32);
                }
            }
            Ok(ValidatedCommand::PrevRoundsTiebreak {
                decision: *decision,
                fingerprint,
                ranks_by_name: ranks,
            })
        }
        CommandKind::TimeTiebreak {
            decision,
            fingerprint,
        } => Ok(ValidatedCommand::TimeTiebreak {
            decision: *decision,
            fingerprint: require_fingerprint(fingerprint)?,
        }),
        CommandKind::ResetPartial {
            reset_timer,
            clear_progress,
            unmark_all,
            new_session_id,
        } => {
            let new_session_id = require_optional_session(new_session_id.as_ref())?;
            if *unmark_all && new_session_id.is_none() {
                return Err(EngineError::validation(
                    Some("newSessionId"),
                    "required when unmarkAll is set",
                ));
            }
            Ok(ValidatedCommand::ResetPartial {
                reset_timer: *reset_timer,
                clear_progress: *clear_progress,
                unmark_all: *unmark_all,
                new_session_id,
            })
        }
        CommandKind::ResetBox { new_session_id } => {
            let new_session_id = require_optional_session(Some(new_session_id))?
                .ok_or_else(|| EngineError::validation(Some("newSessionId"), "cannot be empty"))?;
            Ok(ValidatedCommand::ResetBox { new_session_id })
        }
    }
}

/// The validated command rendered back into wire shape, with resolved fields
/// filled in; this is what the caller persists and broadcasts.
pub fn enrich(state: &ContestState, cmd: &Command, validated: &ValidatedCommand) -> Command {
    let mut enriched = cmd.clone();
    match validated {
        ValidatedCommand::InitRoute {
            route_index,
            routes_count,
            holds_count,
            holds_counts,
            competitors,
            category,
            timer_preset,
        } => {
            // INIT_ROUTE establishes the session, so the broadcast payload
            // names the session the new state belongs to.
            enriched.session_id = Some(state.session_id.clone());
            enriched.kind = CommandKind::InitRoute {
                route_index: Some(*route_index),
                routes_count: *routes_count,
                holds_count: *holds_count,
                holds_counts: holds_counts.clone(),
                competitors: competitors
                    .iter()
                    .map(|comp| crate::contest::CompetitorEntry {
                        name: comp.name.clone(),
                        club: comp.club.clone(),
                    })
                    .collect(),
                category: category.clone(),
                timer_preset: timer_preset.as_ref().map(|preset| preset.text.clone()),
            };
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
            enriched.kind = CommandKind::SubmitScore {
                idx: Some(Scalar::Number(*index as f64)),
                competitor_idx: None,
                competitor: Some(name.clone()),
                score: *score,
                hold: hold.map(|hold| hold.value()),
                topped: *topped,
                plus: *plus,
                registered_time: Some(match effective_time {
                    Some(seconds) => Scalar::Number(f64::from(*seconds)),
                    None => Scalar::Null,
                }),
            };
        }
        ValidatedCommand::RegisterTime { seconds } => {
            enriched.kind = CommandKind::RegisterTime {
                registered_time: match seconds {
                    Some(seconds) => Scalar::Number(f64::from(*seconds)),
                    None => Scalar::Null,
                },
            };
        }
        ValidatedCommand::StopTimer { elapsed_seconds } => {
            enriched.kind = CommandKind::StopTimer {
                elapsed: elapsed_seconds.map(|seconds| Scalar::Number(f64::from(seconds))),
            };
        }
        ValidatedCommand::SetTimerPreset { preset } => {
            enriched.kind = CommandKind::SetTimerPreset {
                timer_preset: preset.text.clone(),
            };
        }
        ValidatedCommand::PrevRoundsTiebreak {
            decision,
            fingerprint,
            ranks_by_name,
        } => {
            enriched.kind = CommandKind::PrevRoundsTiebreak {
                decision: *decision,
                fingerprint: fingerprint.clone(),
                ranks_by_name: Some(
                    ranks_by_name
                        .iter()
                        .map(|(name, rank)| (name.clone(), i64::from(*rank)))
                        .collect(),
                ),
                order: None,
            };
        }
        ValidatedCommand::TimeTiebreak {
            decision,
            fingerprint,
        } => {
            enriched.kind = CommandKind::TimeTiebreak {
                decision: *decision,
                fingerprint: fingerprint.clone(),
            };
        }
        _ => {}
    }
    enriched
}

fn resolve_target(
    state: &ContestState,
    idx: Option<&Scalar>,
    competitor_idx: Option<&Scalar>,
    competitor: Option<&str>,
) -> Result<(usize, String), EngineError> {
    let raw_index = match (idx, competitor_idx) {
        (Some(value), _) => coerce_index(value)?,
        (None, Some(value)) => coerce_index(value)?,
        (None, None) => None,
    };
    if let Some(raw) = raw_index {
        // Zero is a valid index; only range and shape are checked.
        if raw < 0 || raw as usize >= state.competitors.len() {
            return Err(EngineError::InvalidIndex(format!(
                "idx {} out of range for {} competitors",
                raw,
                state.competitors.len()
            )));
        }
        let index = raw as usize;
        return Ok((index, state.competitors[index].name.clone()));
    }
    if let Some(raw_name) = competitor {
        let name = sanitize_name(raw_name);
        if name.is_empty() {
            return Err(EngineError::validation(
                Some("competitor"),
                "name empty after sanitization",
            ));
        }
        let index = state
            .competitors
            .iter()
            .position(|comp| comp.name == name)
            .ok_or_else(|| {
                EngineError::validation(Some("competitor"), format!("unknown competitor {name}"))
            })?;
        return Ok((index, name));
    }
    let index = state.current_climber.ok_or_else(|| {
        EngineError::validation(Some("competitor"), "no active climber to score")
    })?;
    let name = state
        .competitors
        .get(index)
        .map(|comp| comp.name.clone())
        .ok_or_else(|| EngineError::InvalidIndex("active climber index out of range".to_string()))?;
    Ok((index, name))
}

/// Explicit index coercion: integers and numeric strings pass, everything
/// else is an error. An empty or null value means "no index supplied".
fn coerce_index(value: &Scalar) -> Result<Option<i64>, EngineError> {
    match value {
        Scalar::Null => Ok(None),
        Scalar::Bool(_) => Err(EngineError::InvalidIndex(
            "idx must be an integer or numeric string".to_string(),
        )),
        Scalar::Number(number) => {
            if number.is_finite() && number.fract() == 0.0 {
                Ok(Some(*number as i64))
            } else {
                Err(EngineError::InvalidIndex(format!(
                    "idx {} is not an integer",
                    number
                )))
            }
        }
        Scalar::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<i64>().map(Some).map_err(|_| {
                EngineError::InvalidIndex(format!("idx {:?} is not numeric", trimmed))
            })
        }
    }
}

/// Explicit time coercion: null stays null, finite numbers truncate to whole
/// seconds, numeric strings parse; anything else is a structured error and
/// never replaces the previous value.
pub fn coerce_seconds(value: &Scalar) -> Result<Option<u32>, EngineError> {
    let number = match value {
        Scalar::Null => return Ok(None),
        Scalar::Bool(_) => {
            return Err(EngineError::InvalidTime(
                "time must be a number or numeric string".to_string(),
            ))
        }
        Scalar::Number(number) => *number,
        Scalar::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| EngineError::InvalidTime(format!("{:?} is not numeric", trimmed)))?
        }
    };
    if !number.is_finite() {
        return Err(EngineError::InvalidTime("time must be finite".to_string()));
    }
    let truncated = number.trunc();
    if truncated < 0.0 || truncated > f64::from(TIME_MAX_SECONDS) {
        return Err(EngineError::InvalidTime(format!(
            "time must be within 0..={TIME_MAX_SECONDS} seconds"
        )));
    }
    Ok(Some(truncated as u32))
}

/// Parse and normalize an `MM:SS` preset (`5:00` becomes `05:00`).
pub fn parse_timer_preset(preset: &str) -> Option<TimerPreset> {
    let trimmed = preset.trim();
    let (minutes, seconds) = trimmed.split_once(':')?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    let seconds: u32 = seconds.trim().parse().ok()?;
    if minutes > 99 || seconds > 59 {
        return None;
    }
    let text = format!("{minutes:02}:{seconds:02}");
    if text != trimmed {
        tracing::debug!(input = trimmed, normalized = %text, "timer preset normalized");
    }
    Some(TimerPreset {
        text,
        seconds: minutes * 60 + seconds,
    })
}

/// Trim, strip control and markup-dangerous characters, cap at 255 chars.
pub fn sanitize_name(name: &str) -> String {
    sanitize_text(name, MAX_NAME_LEN)
}

pub fn sanitize_text(value: &str, max_len: usize) -> String {
    const STRIPPED: &[char] = &[
        '<', '>', '{', '}', '[', ']', '\\', '|', ';', '(', ')', '&', '$', '`', '"', '*',
    ];
    value
        .chars()
        .filter(|c| !c.is_control() && !STRIPPED.contains(c))
        .take(max_len)
        .collect::<String>()
        .trim()
        .to_string()
}

fn require_fingerprint(fingerprint: &str) -> Result<String, EngineError> {
    let trimmed = fingerprint.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(Some("fingerprint"), "cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn require_optional_session(
    session_id: Option<&SessionId>,
) -> Result<Option<SessionId>, EngineError> {
    match session_id {
        None => Ok(None),
        Some(session_id) if session_id.as_str().is_empty() => Err(EngineError::validation(
            Some("newSessionId"),
            "cannot be empty",
        )),
        Some(session_id) => Ok(Some(session_id.clone())),
    }
}
