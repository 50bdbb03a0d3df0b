// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Operators: named predicates over fields.
//!
//! An operator is compiled once per rule from its textual parameter; the
//! compiled form is evaluated per transaction with an optional input field
//! and yields a truthy number plus an optional capture list.

pub mod builtin;

use bytes::Bytes;

use crate::status::EngineResult;
use crate::tx::Transaction;

/// Capability flags an operator advertises; checked at rule registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatorCaps {
    /// Valid in non-stream phases.
    pub phase: bool,
    /// Valid in stream phases.
    pub stream: bool,
    /// May be called with no input field present.
    pub allow_null: bool,
    /// Produces a capture list on match.
    pub capture: bool,
}

/// Result of one operator evaluation.
#[derive(Debug, Clone, Default)]
pub struct OperatorOutcome {
    /// Truthy number; `0` is false, anything else is true.
    pub result: i64,
    /// Capture list produced on match, when the operator supports capture.
    pub capture: Option<Vec<Bytes>>,
}

impl OperatorOutcome {
    /// Falsy outcome.
    pub const fn falsy() -> Self {
        Self {
            result: 0,
            capture: None,
        }
    }

    /// Truthy outcome without capture.
    pub const fn truthy() -> Self {
        Self {
            result: 1,
            capture: None,
        }
    }

    /// Whether the result is truthy.
    pub const fn is_truthy(&self) -> bool {
        self.result != 0
    }
}

/// Evaluation context handed to a compiled operator.
pub struct EvalCx<'a> {
    /// The transaction under inspection (read-only to operators).
    pub tx: &'a Transaction,
    /// Whether the rule requested parameter expansion at evaluation time.
    pub expand: bool,
}

/// Factory for a named operator.
pub trait Operator: Send + Sync {
    /// Capabilities of every instance this operator compiles.
    fn caps(&self) -> OperatorCaps;

    /// Compiles the textual parameter into an evaluable instance.
    ///
    /// # Errors
    /// `BadValue` when the parameter does not parse.
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledOperator>>;
}

/// A compiled operator instance bound to one rule.
pub trait CompiledOperator: Send + Sync {
    /// Evaluates the predicate against `input`.
    ///
    /// `input` is `None` only for operators advertising `allow_null` and for
    /// external rules evaluated without a target.
    fn eval(&self, cx: &EvalCx<'_>, input: Option<&crate::field::Field>)
        -> EngineResult<OperatorOutcome>;
}
