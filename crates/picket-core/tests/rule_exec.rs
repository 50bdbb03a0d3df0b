// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rule engine behavior: targets, transformations, operators, capture,
//! chains, and block semantics.

mod common;

use bytes::Bytes;
use common::{build_engine, conn, started_tx};
use picket_core::{Field, HeaderSet, Outcome, Phase, RuleDraft};

// =============================================================================
// Matching and transformation pipelines
// =============================================================================

#[test]
fn simple_match_fires_event_without_blocking() {
    // Given: ARGS -> ["hi"], rule `ARGS|trim streq "hi"` with an event action.
    // Expect: truthy, one event, no block.
    let (engine, host) = build_engine(vec![RuleDraft::new("r-args", Phase::RequestHeader)
        .target("ARGS", &["trim"])
        .operator("streq", "hi")
        .action("event", "")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data
        .set(Field::list("ARGS", vec![Field::bytes("q", "hi")]));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(status, Outcome::Ok);
    assert_eq!(tx.events.len(), 1);
    assert_eq!(tx.events[0].rule_id, "r-args");
    assert!(!tx.block_flags().enforcing());
    assert_eq!(host.error_response_count(), 0);
}

#[test]
fn transformations_apply_left_to_right_before_the_operator() {
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-pipe", Phase::RequestHeader)
        .target("X", &["trim", "lowercase"])
        .operator("streq", "hello")
        .action("event", "")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "  HELLO  "));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    assert_eq!(tx.events.len(), 1);
}

#[test]
fn absent_target_skips_rules_without_allow_null() {
    let (engine, _host) = build_engine(vec![
        RuleDraft::new("r-missing", Phase::RequestHeader)
            .target("NOPE", &[])
            .operator("streq", "x")
            .action("event", ""),
        // `exists` advertises allow-null and is evaluated with the null field.
        RuleDraft::new("r-exists", Phase::RequestHeader)
            .target("NOPE", &[])
            .operator("exists", "")
            .false_action("setvar", "SAW_NULL=1"),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    // r-missing stayed falsy (target skipped); r-exists saw the null.
    assert!(tx.events.is_empty());
    assert_eq!(tx.data.get("SAW_NULL").unwrap().as_num(), Some(1));
}

#[test]
fn empty_list_is_equivalent_to_an_absent_field() {
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-empty", Phase::RequestHeader)
        .target("ARGS", &[])
        .operator("exists", "")
        .action("event", "")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::list("ARGS", Vec::new()));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    // `exists` saw a null field, not a present list: no true-branch event.
    assert!(tx.events.is_empty());
}

#[test]
fn a_falsy_target_does_not_clear_a_prior_truthy_result() {
    // Two targets; only the first matches. The rule result stays truthy.
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-sticky", Phase::RequestHeader)
        .target("A", &[])
        .target("B", &[])
        .operator("streq", "match")
        .action("event", "")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("A", "match"));
    tx.data.set(Field::bytes("B", "miss"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    assert_eq!(tx.events.len(), 1);
}

#[test]
fn list_recursion_beyond_the_bound_aborts_the_rule() {
    // Six levels of nesting exceeds the bound of five; the rule aborts and
    // fires nothing, and the phase is unaffected.
    let (engine, _host) = build_engine(vec![
        RuleDraft::new("r-deep", Phase::RequestHeader)
            .target("NEST", &[])
            .operator("streq", "leaf")
            .action("event", ""),
        RuleDraft::new("r-after", Phase::RequestHeader)
            .target("OK", &[])
            .operator("streq", "yes")
            .action("setvar", "AFTER=1"),
    ]);
    let mut nested = Field::bytes("leaf", "leaf");
    for depth in 0..6 {
        nested = Field::list(format!("level{depth}"), vec![nested]);
    }
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field {
        name: "NEST".to_owned(),
        value: nested.value,
    });
    tx.data.set(Field::bytes("OK", "yes"));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    assert_eq!(status, Outcome::Ok);
    assert!(tx.events.is_empty());
    assert_eq!(tx.data.get("AFTER").unwrap().as_num(), Some(1));
}

#[test]
fn invert_negates_action_selection() {
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-inv", Phase::RequestHeader)
        .target("X", &[])
        .operator("streq", "nope")
        .invert()
        .action("setvar", "INVERTED=1")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "value"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    assert_eq!(tx.data.get("INVERTED").unwrap().as_num(), Some(1));
}

#[test]
fn external_rules_run_the_operator_without_targets() {
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-ext", Phase::RequestHeader)
        .external()
        .operator("exists", "")
        .false_action("setvar", "EXT_FALSY=1")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    // `exists` with no input is falsy; the false branch ran.
    assert_eq!(tx.data.get("EXT_FALSY").unwrap().as_num(), Some(1));
}

// =============================================================================
// Capture
// =============================================================================

#[test]
fn capture_writes_group_zero_then_groups() {
    // Given: X = "string 2", `rx "(string 2)"` with capture enabled.
    // Expect: CAPTURE:0 and CAPTURE:1 are "string 2"; no CAPTURE:2.
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-cap", Phase::RequestHeader)
        .target("X", &[])
        .operator("rx", "(string 2)")
        .capture()
        .action("event", "")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "string 2"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(tx.events.len(), 1);
    assert_eq!(
        tx.data.get("CAPTURE:0").unwrap().as_bytes().unwrap(),
        "string 2"
    );
    assert_eq!(
        tx.data.get("CAPTURE:1").unwrap().as_bytes().unwrap(),
        "string 2"
    );
    assert!(tx.data.get("CAPTURE:2").is_none());
}

#[test]
fn a_new_capture_clears_the_previous_one() {
    let (engine, _host) = build_engine(vec![
        RuleDraft::new("r-cap-a", Phase::RequestHeader)
            .target("A", &[])
            .operator("rx", "(one) (two)")
            .capture(),
        RuleDraft::new("r-cap-b", Phase::RequestHeader)
            .target("B", &[])
            .operator("rx", "(second)")
            .capture(),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("A", "one two"));
    tx.data.set(Field::bytes("B", "second"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    // Only the most recent capture survives.
    assert_eq!(
        tx.data.get("CAPTURE:0").unwrap().as_bytes().unwrap(),
        "second"
    );
    assert!(tx.data.get("CAPTURE:2").is_none());
}

#[test]
fn capture_action_prefix_renames_the_list() {
    let (engine, _host) = build_engine(vec![RuleDraft::new("r-prefix", Phase::RequestHeader)
        .target("X", &[])
        .operator("rx", "(v[0-9]+)")
        .action("capture", "MATCH")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "v42"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();
    assert_eq!(tx.data.get("MATCH:0").unwrap().as_bytes().unwrap(), "v42");
    assert_eq!(tx.capture_prefix.as_deref(), Some("MATCH"));
}

// =============================================================================
// Chains
// =============================================================================

#[test]
fn chains_run_children_only_while_truthy() {
    let (engine, _host) = build_engine(vec![
        RuleDraft::new("head", Phase::RequestHeader)
            .target("A", &[])
            .operator("streq", "yes")
            .chain_to_next("c1"),
        RuleDraft::new("mid", Phase::RequestHeader)
            .target("B", &[])
            .operator("false", "")
            .in_chain("c1")
            .chain_to_next("c1")
            .false_action("setvar", "MID_FALSY=1"),
        RuleDraft::new("tail", Phase::RequestHeader)
            .target("C", &[])
            .operator("exists", "")
            .in_chain("c1")
            .action("setvar", "TAIL_RAN=1"),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("A", "yes"));
    tx.data.set(Field::bytes("B", "whatever"));
    tx.data.set(Field::bytes("C", "present"));

    let _ = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    // The middle link evaluated falsy: its false actions ran, the tail never did.
    assert_eq!(tx.data.get("MID_FALSY").unwrap().as_num(), Some(1));
    assert!(tx.data.get("TAIL_RAN").is_none());
}

#[test]
fn chain_abort_on_immediate_block_skips_the_child_and_signals_once() {
    // S4: head fires block:immediate; the chained child must not run, the
    // phase returns Declined, and the host sees exactly one error response.
    let (engine, host) = build_engine(vec![
        RuleDraft::new("head", Phase::RequestHeader)
            .target("A", &[])
            .operator("streq", "attack")
            .chain_to_next("c1")
            .action("block", "immediate"),
        RuleDraft::new("child", Phase::RequestHeader)
            .target("A", &[])
            .operator("exists", "")
            .in_chain("c1")
            .action("setvar", "CHILD_RAN=1"),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("A", "attack"));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(status, Outcome::Declined);
    assert!(tx.data.get("CHILD_RAN").is_none());
    assert_eq!(host.error_response_count(), 1);
    assert_eq!(*host.error_responses.lock().unwrap(), vec![403]);
}

// =============================================================================
// Blocking
// =============================================================================

#[test]
fn immediate_block_stops_later_rules_in_the_phase() {
    let (engine, host) = build_engine(vec![
        RuleDraft::new("blocker", Phase::RequestHeader)
            .target("X", &[])
            .operator("exists", "")
            .action("block", "immediate=503"),
        RuleDraft::new("after", Phase::RequestHeader)
            .target("X", &[])
            .operator("exists", "")
            .action("setvar", "AFTER=1"),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "1"));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(status, Outcome::Declined);
    assert!(tx.data.get("AFTER").is_none());
    assert_eq!(*host.error_responses.lock().unwrap(), vec![503]);
}

#[test]
fn phase_block_finishes_the_phase_then_declines() {
    let (engine, host) = build_engine(vec![
        RuleDraft::new("blocker", Phase::RequestHeader)
            .target("X", &[])
            .operator("exists", "")
            .action("block", "phase"),
        RuleDraft::new("after", Phase::RequestHeader)
            .target("X", &[])
            .operator("exists", "")
            .action("setvar", "AFTER=1"),
    ]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "1"));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(status, Outcome::Declined);
    // The phase ran to completion before enforcement.
    assert_eq!(tx.data.get("AFTER").unwrap().as_num(), Some(1));
    assert_eq!(host.error_response_count(), 1);
}

#[test]
fn advisory_block_never_signals_the_host() {
    let (engine, host) = build_engine(vec![RuleDraft::new("advisor", Phase::RequestHeader)
        .target("X", &[])
        .operator("exists", "")
        .action("block", "advisory")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    tx.data.set(Field::bytes("X", "1"));

    let status = engine
        .notify_request_header(&mut tx, HeaderSet::new())
        .unwrap();

    assert_eq!(status, Outcome::Ok);
    assert!(tx.block_flags().advisory());
    assert_eq!(host.error_response_count(), 0);
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn identical_inputs_yield_identical_outcomes() {
    let run = || {
        let (engine, host) = build_engine(vec![
            RuleDraft::new("r1", Phase::RequestHeader)
                .target("ARGS", &["lowercase"])
                .operator("contains", "attack")
                .action("event", "")
                .action("block", "phase"),
            RuleDraft::new("r2", Phase::RequestHeader)
                .target("ARGS", &[])
                .operator("rx", "(a+ttack)")
                .capture()
                .action("event", ""),
        ]);
        let mut c = conn();
        let mut tx = started_tx(&engine, &mut c);
        tx.data
            .set(Field::list("ARGS", vec![Field::bytes("q", "An ATTACK here")]));
        let status = engine
            .notify_request_header(&mut tx, HeaderSet::new())
            .unwrap();
        let capture = tx
            .data
            .get("CAPTURE:0")
            .map(|f| f.as_bytes().unwrap().clone());
        (
            status,
            tx.events.len(),
            tx.block_flags(),
            capture,
            host.error_response_count(),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn set_header_actions_reach_the_host() {
    let (engine, host) = build_engine(vec![RuleDraft::new("r-hdr", Phase::ResponseHeader)
        .target("RESPONSE_STATUS", &[])
        .operator("eq", "200")
        .action("set_header", "response:X-Inspected=%{REQUEST_METHOD}")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);
    let _ = engine
        .notify_request_line(
            &mut tx,
            picket_core::RequestLine {
                method: Bytes::from("GET"),
                uri: Bytes::from("/"),
                protocol: Bytes::from("HTTP/1.1"),
            },
        )
        .unwrap();
    let _ = engine
        .notify_response_started(
            &mut tx,
            picket_core::ResponseLine {
                protocol: Bytes::from("HTTP/1.1"),
                status: 200,
                message: Bytes::from("OK"),
            },
        )
        .unwrap();
    let _ = engine
        .notify_response_header(&mut tx, HeaderSet::new())
        .unwrap();

    let edits = host.header_edits.lock().unwrap();
    assert_eq!(edits.len(), 1);
    let (direction, op, name, value) = &edits[0];
    assert_eq!(*direction, picket_core::HeaderDirection::Response);
    assert_eq!(*op, picket_core::HeaderOp::Set);
    assert_eq!(name, "X-Inspected");
    assert_eq!(value, b"GET");
}

#[test]
fn stream_phase_rules_see_body_chunks() {
    let (engine, _host) = build_engine(vec![RuleDraft::new(
        "r-stream",
        Phase::StreamRequestBody,
    )
    .operator("contains", "attack")
    .action("setvar", "STREAM_HIT=1")]);
    let mut c = conn();
    let mut tx = started_tx(&engine, &mut c);

    let _ = engine
        .notify_request_body_data(&mut tx, Bytes::from("clean chunk"))
        .unwrap();
    assert!(tx.data.get("STREAM_HIT").is_none());

    let _ = engine
        .notify_request_body_data(&mut tx, Bytes::from("an attack chunk"))
        .unwrap();
    assert_eq!(tx.data.get("STREAM_HIT").unwrap().as_num(), Some(1));
}
