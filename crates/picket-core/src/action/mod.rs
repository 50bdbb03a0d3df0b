// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Actions: named side effects fired when a rule's branch is taken.
//!
//! Actions compile their textual parameter at configuration time and execute
//! per transaction. `Outcome::Declined` from an action is the exclusive
//! "please block" signal; any error status is recorded but never aborts the
//! remaining actions of the rule.

pub mod builtin;

use crate::host::HostServer;
use crate::phase::Phase;
use crate::rule::RuleMeta;
use crate::status::EngineResult;
use crate::tx::Transaction;

/// View of the firing rule handed to an executing action.
pub struct ActionCx<'a> {
    /// Id of the rule whose branch fired.
    pub rule_id: &'a str,
    /// Phase in which the rule ran.
    pub phase: Phase,
    /// The rule's metadata.
    pub meta: &'a RuleMeta,
    /// The host contract, for actions that edit the transaction's messages.
    pub host: &'a dyn HostServer,
}

/// Factory for a named action.
pub trait Action: Send + Sync {
    /// Compiles the textual parameter into an executable instance.
    ///
    /// # Errors
    /// `BadValue` when the parameter does not parse.
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>>;
}

/// A compiled action instance bound to one rule branch.
pub trait CompiledAction: Send + Sync {
    /// Executes the side effect.
    ///
    /// Returning `Ok(Outcome::Declined)` requests blocking; the enforcement
    /// strength is whatever block flag the action set on the transaction.
    fn execute(&self, cx: &ActionCx<'_>, tx: &mut Transaction) -> EngineResult;
}
