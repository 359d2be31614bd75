//! Call engine integration tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use advisor_gateway::call::{
    CallId, CallRegistry, CallSession, CallState, EventDispatcher, Role, StopReason, TurnOutcome,
};
use advisor_gateway::lead::{InvestmentInterest, RiskTolerance};
use advisor_gateway::retry::RetryPolicy;
use advisor_gateway::script::{CLOSING_NOT_QUALIFIED, CLOSING_QUALIFIED, GREETING};
use advisor_gateway::telephony::{EventKind, TelephonyEvent};
use advisor_gateway::Error;

mod common;
use common::{
    FakeNetwork, FakeResponder, Line, MemoryLeadSink, Op, QUALIFYING, REPLY, UNDECIDED,
    controller, say,
};

fn new_session(id: &str) -> CallSession {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (session, _handle) = CallSession::new(CallId::new(id), "+15550001111", shutdown_rx);
    session
}

fn dispatcher(
    network: &Arc<FakeNetwork>,
    responder: &Arc<FakeResponder>,
    sink: &Arc<MemoryLeadSink>,
    grace: Duration,
) -> EventDispatcher {
    EventDispatcher::new(
        Arc::new(CallRegistry::new()),
        Arc::new(controller(network, responder)),
        sink.clone(),
        grace,
        RetryPolicy::immediate(1),
    )
}

fn started(id: &str, caller: &str) -> TelephonyEvent {
    TelephonyEvent::new(id, caller, EventKind::CallStarted)
}

async fn idle(dispatcher: &EventDispatcher) {
    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_idle())
        .await
        .expect("calls did not finish");
}

#[tokio::test]
async fn unqualified_call_stops_after_exactly_ten_turns() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", std::iter::repeat_with(|| say(UNDECIDED)).take(15));
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    let summary = new_session("chan-1").run(&turns).await;

    assert_eq!(summary.stop_reason, StopReason::TurnLimit);
    assert_eq!(summary.turns, 10);
    assert_eq!(summary.transcript.len(), 20);
    assert_eq!(responder.calls(), 10);
    assert!(!summary.lead.is_qualified());

    let spoken = network.spoken("chan-1");
    assert_eq!(spoken.len(), 12);
    assert_eq!(spoken[0], GREETING);
    assert_eq!(spoken[11], CLOSING_NOT_QUALIFIED);
    assert_eq!(network.ops_for("chan-1").last(), Some(&Op::Teardown("chan-1".into())));
}

#[tokio::test]
async fn qualifying_answer_ends_call_with_callback_promise() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    let summary = new_session("chan-1").run(&turns).await;

    assert_eq!(summary.stop_reason, StopReason::Qualified);
    assert_eq!(summary.turns, 1);
    assert_eq!(
        summary.lead.investment_interest(),
        Some(InvestmentInterest::Stocks)
    );
    assert_eq!(summary.lead.investment_amount(), Some("50,000"));
    assert_eq!(summary.lead.risk_tolerance(), Some(RiskTolerance::Moderate));
    assert!(summary.lead.is_qualified());

    assert_eq!(network.spoken("chan-1"), vec![GREETING, REPLY, CLOSING_QUALIFIED]);
    assert!(network.torn_down("chan-1"));
}

#[tokio::test]
async fn turn_decision_stops_on_qualification() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);
    let mut session = new_session("chan-1");

    let outcome = turns.run_turn(&mut session).await.unwrap();

    assert_eq!(outcome, TurnOutcome::Stop(StopReason::Qualified));
    assert_eq!(session.turn_count(), 1);
    let roles: Vec<Role> = session.transcript().entries().iter().map(|u| u.role()).collect();
    assert_eq!(roles, vec![Role::Caller, Role::Assistant]);
}

#[tokio::test]
async fn empty_transcription_changes_nothing() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(""), say("   ")]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);
    let mut session = new_session("chan-1");
    let lead_before = session.lead().clone();

    for _ in 0..2 {
        let outcome = turns.run_turn(&mut session).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Continue);
    }

    assert!(session.transcript().is_empty());
    assert_eq!(session.lead(), &lead_before);
    assert_eq!(session.turn_count(), 0);
    assert_eq!(session.no_input_count(), 2);
    assert_eq!(responder.calls(), 0);
}

#[tokio::test]
async fn collaborator_failures_count_as_no_input() {
    let network = Arc::new(FakeNetwork::new());
    network.script(
        "chan-1",
        [Line::CaptureFails, Line::TranscriptionFails, Line::Silence, say(UNDECIDED)],
    );
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);
    let mut session = new_session("chan-1");

    for _ in 0..4 {
        assert_eq!(turns.run_turn(&mut session).await.unwrap(), TurnOutcome::Continue);
    }

    assert_eq!(session.no_input_count(), 3);
    assert_eq!(session.turn_count(), 1);
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn silent_caller_is_released_after_no_input_limit() {
    let network = Arc::new(FakeNetwork::new());
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder).with_max_turns(3);

    let summary = new_session("chan-1").run(&turns).await;

    assert_eq!(summary.stop_reason, StopReason::NoInputLimit);
    assert_eq!(summary.turns, 0);
    assert_eq!(network.spoken("chan-1"), vec![GREETING, CLOSING_NOT_QUALIFIED]);
    assert!(network.torn_down("chan-1"));
}

#[tokio::test]
async fn generation_failure_closes_gracefully() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::failing());
    let turns = controller(&network, &responder);

    let summary = new_session("chan-1").run(&turns).await;

    assert_eq!(summary.stop_reason, StopReason::GenerationFailed);
    assert_eq!(summary.turns, 0);

    let ops = network.ops_for("chan-1");
    let closing = ops
        .iter()
        .position(|op| matches!(op, Op::Play(_, text) if text == CLOSING_NOT_QUALIFIED))
        .expect("closing was spoken");
    let teardown = ops
        .iter()
        .position(|op| matches!(op, Op::Teardown(_)))
        .expect("call was torn down");
    assert!(closing < teardown);
    assert_eq!(network.spoken("chan-1"), vec![GREETING, CLOSING_NOT_QUALIFIED]);
}

#[tokio::test]
async fn stalled_responder_closes_the_call() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::hanging());
    let turns = controller(&network, &responder).with_step_timeout(Duration::from_millis(100));

    let summary = tokio::time::timeout(Duration::from_secs(5), new_session("chan-1").run(&turns))
        .await
        .expect("call never closed");

    assert_eq!(summary.stop_reason, StopReason::GenerationFailed);
    assert_eq!(responder.calls(), 1);
    assert_eq!(network.spoken("chan-1"), vec![GREETING, CLOSING_NOT_QUALIFIED]);
    assert_eq!(network.ops_for("chan-1").last(), Some(&Op::Teardown("chan-1".into())));
}

#[tokio::test]
async fn stalled_transcription_counts_as_no_input() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [Line::TranscriptionHangs, say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder).with_step_timeout(Duration::from_millis(100));
    let mut session = new_session("chan-1");

    let first = tokio::time::timeout(Duration::from_secs(5), turns.run_turn(&mut session))
        .await
        .expect("turn never finished")
        .unwrap();
    assert_eq!(first, TurnOutcome::Continue);
    assert_eq!(session.no_input_count(), 1);
    assert!(session.transcript().is_empty());

    let second = turns.run_turn(&mut session).await.unwrap();
    assert_eq!(second, TurnOutcome::Stop(StopReason::Qualified));
}

#[tokio::test]
async fn failed_answer_releases_channel_without_speaking() {
    let network = Arc::new(FakeNetwork::new().failing_answer());
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    let summary = new_session("chan-1").run(&turns).await;

    assert_eq!(summary.stop_reason, StopReason::Failed);
    assert!(network.spoken("chan-1").is_empty());
    assert!(network.torn_down("chan-1"));
}

#[tokio::test]
async fn dtmf_is_collected_by_the_session() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (session, handle) = CallSession::new(CallId::new("chan-1"), "100", shutdown_rx);
    assert!(handle.send_dtmf("5"));
    assert!(handle.send_dtmf("#"));

    let summary = session.run(&turns).await;
    assert_eq!(summary.dtmf, vec!["5".to_string(), "#".to_string()]);
    assert_eq!(handle.state(), CallState::Ended);
}

#[tokio::test]
async fn replies_see_the_whole_transcript_in_order() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-1", [say("I like bonds"), say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    new_session("chan-1").run(&turns).await;

    let seen = responder.seen();
    assert_eq!(seen.len(), 2);
    let roles: Vec<&str> = seen[1].iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(seen[1][1].content, "I like bonds");
    assert_eq!(seen[1][3].content, QUALIFYING);
}

#[tokio::test]
async fn concurrent_calls_keep_their_own_transcripts() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_millis(5)));
    network.script("chan-a", [say("I want bonds"), say("about $20,000"), say("keep it safe")]);
    network.script(
        "chan-b",
        [say("crypto please"), say("maybe 5,000"), say("aggressive growth")],
    );
    let responder = Arc::new(FakeResponder::replying());
    let turns = controller(&network, &responder);

    let (a, b) = tokio::join!(
        new_session("chan-a").run(&turns),
        new_session("chan-b").run(&turns)
    );

    let caller_lines = |t: &advisor_gateway::call::Transcript| -> Vec<String> {
        t.entries()
            .iter()
            .filter(|u| u.role() == Role::Caller)
            .map(|u| u.text().to_string())
            .collect()
    };
    assert_eq!(
        caller_lines(&a.transcript),
        vec!["I want bonds", "about $20,000", "keep it safe"]
    );
    assert_eq!(
        caller_lines(&b.transcript),
        vec!["crypto please", "maybe 5,000", "aggressive growth"]
    );

    assert_eq!(a.lead.investment_interest(), Some(InvestmentInterest::Bonds));
    assert_eq!(a.lead.investment_amount(), Some("20,000"));
    assert_eq!(a.lead.risk_tolerance(), Some(RiskTolerance::Conservative));
    assert_eq!(
        b.lead.investment_interest(),
        Some(InvestmentInterest::Cryptocurrency)
    );
    assert_eq!(b.lead.investment_amount(), Some("5,000"));
    assert_eq!(b.lead.risk_tolerance(), Some(RiskTolerance::Aggressive));
}

#[tokio::test]
async fn dispatcher_runs_calls_and_persists_leads() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_millis(5)));
    network.script("chan-a", [say(QUALIFYING)]);
    network.script("chan-b", [say("bonds, 10,000, conservative")]);
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher.dispatch(started("chan-a", "+15550000001")).unwrap();
    dispatcher.dispatch(started("chan-b", "+15550000002")).unwrap();
    assert_eq!(dispatcher.registry().len(), 2);

    idle(&dispatcher).await;

    assert!(dispatcher.registry().is_empty());
    let mut leads = sink.leads();
    leads.sort_by(|a, b| a.caller_number().cmp(b.caller_number()));
    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0].caller_number(), "+15550000001");
    assert_eq!(leads[0].investment_interest(), Some(InvestmentInterest::Stocks));
    assert_eq!(leads[1].caller_number(), "+15550000002");
    assert_eq!(leads[1].investment_interest(), Some(InvestmentInterest::Bonds));
    assert!(leads.iter().all(|l| l.is_qualified()));
}

#[tokio::test]
async fn duplicate_call_started_is_dropped() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_millis(20)));
    network.script("chan-a", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher.dispatch(started("chan-a", "100")).unwrap();
    let err = dispatcher.dispatch(started("chan-a", "200")).unwrap_err();
    assert!(matches!(err, Error::DuplicateCall(id) if id == "chan-a"));

    idle(&dispatcher).await;
    assert_eq!(sink.leads().len(), 1);
    assert_eq!(sink.leads()[0].caller_number(), "100");
}

#[tokio::test]
async fn stray_events_are_not_fatal() {
    let network = Arc::new(FakeNetwork::new());
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher
        .dispatch(TelephonyEvent::new("ghost", "", EventKind::Signal("1".into())))
        .unwrap();
    dispatcher
        .dispatch(TelephonyEvent::new("ghost", "", EventKind::CallEnded))
        .unwrap();
    dispatcher
        .dispatch(TelephonyEvent::new("ghost", "", EventKind::Other("ChannelVarset".into())))
        .unwrap();

    assert!(dispatcher.registry().is_empty());
    assert!(network.ops().is_empty());
}

#[tokio::test]
async fn hang_up_skips_closing_and_still_saves_lead() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_millis(200)));
    network.script("chan-a", [say("I like real estate")]);
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher.dispatch(started("chan-a", "100")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    dispatcher
        .dispatch(TelephonyEvent::new("chan-a", "100", EventKind::CallEnded))
        .unwrap();

    idle(&dispatcher).await;

    assert_eq!(network.spoken("chan-a"), vec![GREETING]);
    assert!(!network.torn_down("chan-a"));
    assert_eq!(responder.calls(), 0);
    assert!(dispatcher.registry().is_empty());
    assert_eq!(sink.leads().len(), 1);
}

#[tokio::test]
async fn shutdown_closes_active_calls_and_refuses_new_ones() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_millis(200)));
    network.script("chan-a", [say(QUALIFYING)]);
    network.script("chan-b", [say(UNDECIDED)]);
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher.dispatch(started("chan-a", "100")).unwrap();
    dispatcher.dispatch(started("chan-b", "200")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown finished");

    for call in ["chan-a", "chan-b"] {
        assert_eq!(
            network.spoken(call).last().map(String::as_str),
            Some(CLOSING_NOT_QUALIFIED)
        );
        assert!(network.torn_down(call));
    }
    assert_eq!(sink.leads().len(), 2);
    assert!(dispatcher.registry().is_empty());

    let err = dispatcher.dispatch(started("chan-c", "300")).unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn stuck_call_is_aborted_after_grace_period() {
    let network = Arc::new(FakeNetwork::new().with_capture_delay(Duration::from_secs(60)));
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::default());
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_millis(100));

    dispatcher.dispatch(started("chan-a", "100")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown finished within grace");

    assert_eq!(
        network.spoken("chan-a"),
        vec![GREETING, CLOSING_NOT_QUALIFIED]
    );
    assert!(network.torn_down("chan-a"));
    assert_eq!(sink.leads().len(), 1);
    assert_eq!(sink.leads()[0].caller_number(), "100");
}

#[tokio::test]
async fn lead_is_retried_before_being_dropped() {
    let network = Arc::new(FakeNetwork::new());
    network.script("chan-a", [say(QUALIFYING)]);
    let responder = Arc::new(FakeResponder::replying());
    let sink = Arc::new(MemoryLeadSink::failing_first(1));
    let dispatcher = dispatcher(&network, &responder, &sink, Duration::from_secs(5));

    dispatcher.dispatch(started("chan-a", "100")).unwrap();
    idle(&dispatcher).await;

    assert_eq!(sink.attempts(), 2);
    assert_eq!(sink.leads().len(), 1);
    assert!(sink.leads()[0].is_qualified());
}
