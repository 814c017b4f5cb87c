use lead_engine::{
    apply, compute_ranking, Command, CommandKind, CompetitorEntry, ContestState, OutcomeStatus,
    Scalar, SessionId, TieDecision,
};

fn main() {
    let mut state = ContestState::new(SessionId::new("demo-session"));

    let init = Command::new(CommandKind::InitRoute {
        route_index: Some(1),
        routes_count: None,
        holds_count: 40,
        holds_counts: None,
        competitors: ["Ana", "Bob", "Cara"]
            .into_iter()
            .map(|name| CompetitorEntry {
                name: name.to_string(),
                club: None,
            })
            .collect(),
        category: Some("Final".to_string()),
        timer_preset: Some("5:00".to_string()),
    });
    state = apply(&state, &init).state;

    // Ana and Bob finish on the same hold; Cara tops out.
    for (idx, hold, topped, time) in [
        (0u32, Some(30.0), false, 95.0),
        (1, Some(30.0), false, 120.0),
        (2, None, true, 140.0),
    ] {
        let submit = Command::new(CommandKind::SubmitScore {
            idx: Some(Scalar::Number(f64::from(idx))),
            competitor_idx: None,
            competitor: None,
            score: None,
            hold,
            topped,
            plus: false,
            registered_time: Some(Scalar::Number(time)),
        })
        .against(&state);
        let outcome = apply(&state, &submit);
        assert_eq!(outcome.status, OutcomeStatus::Applied);
        state = outcome.state;
    }

    let pending = compute_ranking(&state);
    println!("before tie-break (resolved: {}):", pending.is_resolved);
    for event in &pending.tie_events {
        println!(
            "  tie {:?} at {}..{}: {:?} [{}]",
            event.stage,
            event.rank_start,
            event.rank_end,
            event.status,
            event.members.join(", ")
        );
    }

    // The jury orders the tied pair by their semi-final ranks.
    if let Some(event) = pending.tie_events.first() {
        let decide = Command::new(CommandKind::PrevRoundsTiebreak {
            decision: TieDecision::Yes,
            fingerprint: event.group_id.clone(),
            ranks_by_name: None,
            order: Some(vec!["Bob".to_string(), "Ana".to_string()]),
        })
        .against(&state);
        state = apply(&state, &decide).state;
    }

    let ranking = compute_ranking(&state);
    println!("final ranking (resolved: {}):", ranking.is_resolved);
    for row in &ranking.rows {
        println!(
            "  {}. {} hold={} topped={} time={:?}",
            row.position, row.name, row.hold.value(), row.topped, row.time_seconds
        );
    }
}
