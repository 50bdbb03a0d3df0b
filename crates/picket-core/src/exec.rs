// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Rule execution: the per-phase walk over targets, transformations,
//! operators, actions, and chains.
//!
//! Error policy: a failing transformation or operator aborts its rule, is
//! logged, and never aborts the phase. Blocking is communicated upward as
//! `Outcome::Declined`; the state machine owns host signaling.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::action::ActionCx;
use crate::engine::Engine;
use crate::field::Field;
use crate::operator::EvalCx;
use crate::phase::Phase;
use crate::rule::{Rule, RuleSet};
use crate::status::{EngineError, EngineResult, Outcome};
use crate::tfn::apply_pipeline;
use crate::tx::Transaction;

/// List descent bound; deeper nesting aborts the rule.
pub(crate) const MAX_LIST_RECURSION: usize = 5;

/// Chain descent bound; longer chains abort the rule.
pub(crate) const MAX_CHAIN_RECURSION: usize = 10;

/// Runs the top-level rules of `phase` for the transaction's context chain.
///
/// Returns `Declined` when blocking was requested at or before the end of
/// the phase: immediately on an `immediate` block, at the phase boundary
/// for a `phase` block.
pub(crate) fn run_phase(engine: &Engine, tx: &mut Transaction, phase: Phase) -> EngineResult {
    for ctx_idx in engine.context_chain(tx.context()) {
        let ctx = engine.context(ctx_idx);
        if !ctx.enabled {
            continue;
        }
        for &idx in ctx.rules.phase_rules(phase) {
            if let Err(err) = run_rule(engine, &ctx.rules, idx, tx, 0) {
                warn!(
                    rule_id = %ctx.rules.rule(idx).id,
                    phase = %phase,
                    error = %err,
                    "rule aborted"
                );
            }
            if tx.block_flags().immediate() {
                debug!(phase = %phase, "immediate block aborts phase");
                return Ok(Outcome::Declined);
            }
        }
    }
    if tx.block_flags().phase() {
        return Ok(Outcome::Declined);
    }
    Ok(Outcome::Ok)
}

/// Runs the rules of a stream phase against one data chunk.
pub(crate) fn run_stream_phase(
    engine: &Engine,
    tx: &mut Transaction,
    phase: Phase,
    chunk: &Bytes,
) -> EngineResult {
    for ctx_idx in engine.context_chain(tx.context()) {
        let ctx = engine.context(ctx_idx);
        if !ctx.enabled {
            continue;
        }
        for &idx in ctx.rules.phase_rules(phase) {
            let rule = ctx.rules.rule(idx);
            if !(rule.flags.valid && rule.flags.enabled) {
                continue;
            }
            let field = Field::bytes("DATA", chunk.clone());
            let mut rule_result = 0_i64;
            if let Err(err) = eval_leaf(rule, tx, Some(&field), &mut rule_result) {
                warn!(rule_id = %rule.id, phase = %phase, error = %err, "rule aborted");
                continue;
            }
            let truthy = (rule_result != 0) != rule.operator.invert;
            if let Err(err) = run_actions(engine, rule, tx, truthy) {
                warn!(rule_id = %rule.id, phase = %phase, error = %err, "action failed");
            }
            if tx.block_flags().immediate() {
                debug!(phase = %phase, "immediate block aborts stream phase");
                return Ok(Outcome::Declined);
            }
        }
    }
    if tx.block_flags().phase() {
        return Ok(Outcome::Declined);
    }
    Ok(Outcome::Ok)
}

/// Evaluates one rule and, on a truthy result, its chain.
fn run_rule(
    engine: &Engine,
    rules: &RuleSet,
    idx: usize,
    tx: &mut Transaction,
    depth: usize,
) -> EngineResult {
    if depth > MAX_CHAIN_RECURSION {
        return Err(EngineError::Other(format!(
            "chain recursion limit ({MAX_CHAIN_RECURSION}) exceeded"
        )));
    }
    let rule = rules.rule(idx);
    if !(rule.flags.valid && rule.flags.enabled) {
        return Ok(Outcome::Ok);
    }

    let result = eval_operator(rule, tx)?;
    let truthy = (result != 0) != rule.operator.invert;
    let status = run_actions(engine, rule, tx, truthy);

    if tx.block_flags().immediate() {
        return Ok(Outcome::Declined);
    }
    if truthy {
        if let Some(child) = rule.child {
            match run_rule(engine, rules, child, tx, depth + 1) {
                Ok(Outcome::Declined) => return Ok(Outcome::Declined),
                Ok(Outcome::Ok) => {}
                Err(err) => {
                    warn!(
                        rule_id = %rules.rule(child).id,
                        parent = %rule.id,
                        error = %err,
                        "chained rule aborted"
                    );
                }
            }
        }
    }
    status
}

/// Walks the rule's targets and evaluates the operator, returning the
/// rule result.
///
/// A non-zero operator result is recorded and a later falsy evaluation
/// does not clear it.
fn eval_operator(rule: &Rule, tx: &mut Transaction) -> EngineResult<i64> {
    let mut rule_result = 0_i64;
    if rule.flags.external {
        eval_leaf(rule, tx, None, &mut rule_result)?;
        return Ok(rule_result);
    }
    for target in &rule.targets {
        // A zero-element list is equivalent to an absent field.
        let field = tx
            .data
            .get(&target.name)
            .cloned()
            .filter(|f| !matches!(f.as_list(), Some(items) if items.is_empty()));
        match field {
            None => {
                if rule.operator.caps.allow_null {
                    eval_leaf(rule, tx, None, &mut rule_result)?;
                }
            }
            Some(field) => eval_value(rule, target, tx, field, 0, &mut rule_result)?,
        }
    }
    Ok(rule_result)
}

/// Descends into list values (bounded) and pipelines leaves through the
/// target's transformations before the operator sees them.
fn eval_value(
    rule: &Rule,
    target: &crate::rule::Target,
    tx: &mut Transaction,
    field: Field,
    depth: usize,
    rule_result: &mut i64,
) -> EngineResult<()> {
    if let Some(items) = field.as_list() {
        if depth >= MAX_LIST_RECURSION {
            return Err(EngineError::Other(format!(
                "list recursion limit ({MAX_LIST_RECURSION}) exceeded on target {}",
                target.name
            )));
        }
        for item in items {
            eval_value(rule, target, tx, item.clone(), depth + 1, rule_result)?;
        }
        return Ok(());
    }
    let transformed = apply_pipeline(&target.tfns, field)?;
    eval_leaf(rule, tx, Some(&transformed), rule_result)
}

/// Evaluates the operator once and folds the outcome into the rule result,
/// writing the capture list on truthy capture-enabled evaluations.
fn eval_leaf(
    rule: &Rule,
    tx: &mut Transaction,
    input: Option<&Field>,
    rule_result: &mut i64,
) -> EngineResult<()> {
    let out = {
        let cx = EvalCx {
            tx: &*tx,
            expand: rule.operator.expand,
        };
        rule.operator.compiled.eval(&cx, input)?
    };
    if out.result != 0 {
        *rule_result = out.result;
        if rule.flags.capture {
            if let Some(items) = out.capture {
                tx.capture_prefix = rule.capture_prefix.clone();
                tx.data.set_capture(rule.capture_prefix.as_deref(), items);
            }
        }
    }
    Ok(())
}

/// Runs the selected action branch in order, through every action.
///
/// The rule's observable status: `Declined` if any action declined, else
/// the first action error, else `Ok`.
fn run_actions(engine: &Engine, rule: &Rule, tx: &mut Transaction, truthy: bool) -> EngineResult {
    let list = if truthy {
        &rule.true_actions
    } else {
        &rule.false_actions
    };
    let cx = ActionCx {
        rule_id: &rule.id,
        phase: rule.phase,
        meta: &rule.meta,
        host: engine.host(),
    };
    let mut declined = false;
    let mut first_err = None;
    for action in list {
        match action.compiled.execute(&cx, tx) {
            Ok(Outcome::Declined) => declined = true,
            Ok(Outcome::Ok) => {}
            Err(err) => {
                debug!(
                    rule_id = %rule.id,
                    action = %action.name,
                    error = %err,
                    "action errored"
                );
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    if declined {
        Ok(Outcome::Declined)
    } else if let Some(err) = first_err {
        Err(err)
    } else {
        Ok(Outcome::Ok)
    }
}
