// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The in-memory rule model and per-context rule sets.
//!
//! Rules are compiled at registration: operator and action parameters are
//! parsed, transformation names resolved, and phase compatibility verified.
//! Chained rules form parent/child links as indices into the owning rule
//! set; ownership stays with the set, links are non-owning.

use rustc_hash::FxHashMap;
use tracing::info;

use crate::action::CompiledAction;
use crate::operator::{CompiledOperator, OperatorCaps};
use crate::phase::Phase;
use crate::status::{EngineError, EngineResult};
use crate::tfn::TfnRef;

/// Rule metadata carried into audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMeta {
    /// Severity 0..=9.
    pub severity: u8,
    /// Confidence 0..=9.
    pub confidence: u8,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Human-readable message.
    pub message: Option<String>,
    /// Configuration file the rule came from.
    pub file: Option<String>,
    /// Line in that file.
    pub line: u32,
}

/// Per-rule flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFlags {
    /// The rule compiled cleanly and may run.
    pub valid: bool,
    /// The rule is enabled.
    pub enabled: bool,
    /// The rule is a chain member reached only via its parent.
    pub in_chain: bool,
    /// The next registered rule with the same chain id continues this one.
    pub chain_to_next: bool,
    /// The operator runs without a target.
    pub external: bool,
    /// The operator's capture list is written to the data store.
    pub capture: bool,
    /// Targets may carry transformations.
    pub allow_tfns: bool,
    /// The rule may head a chain.
    pub allow_chain: bool,
}

impl Default for RuleFlags {
    fn default() -> Self {
        Self {
            valid: true,
            enabled: true,
            in_chain: false,
            chain_to_next: false,
            external: false,
            capture: false,
            allow_tfns: true,
            allow_chain: true,
        }
    }
}

/// A rule target: a field name plus its transformation pipeline.
#[derive(Debug, Clone)]
pub struct Target {
    /// Data-store name to fetch.
    pub name: String,
    /// Transformations applied in order before the operator runs.
    pub tfns: Vec<TfnRef>,
}

/// A compiled operator bound to a rule.
pub struct OperatorInstance {
    /// Registered operator name.
    pub name: String,
    /// Raw textual parameter.
    pub param: String,
    /// Negate the result before action selection.
    pub invert: bool,
    /// Expand `%{NAME}` tokens in the parameter at evaluation time.
    pub expand: bool,
    /// Write the operator's capture list on truthy results.
    pub capture: bool,
    /// Capabilities advertised by the operator.
    pub caps: OperatorCaps,
    pub(crate) compiled: Box<dyn CompiledOperator>,
}

impl core::fmt::Debug for OperatorInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperatorInstance")
            .field("name", &self.name)
            .field("param", &self.param)
            .field("invert", &self.invert)
            .finish_non_exhaustive()
    }
}

/// A compiled action bound to a rule branch.
pub struct ActionInstance {
    /// Registered action name.
    pub name: String,
    /// Raw textual parameter.
    pub param: String,
    pub(crate) compiled: Box<dyn CompiledAction>,
}

impl core::fmt::Debug for ActionInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionInstance")
            .field("name", &self.name)
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

/// One compiled rule.
#[derive(Debug)]
pub struct Rule {
    /// Unique id within the owning context.
    pub id: String,
    /// Chain grouping id, when the rule heads or continues a chain.
    pub chain_id: Option<String>,
    /// Revision; re-registration requires a strictly greater one.
    pub revision: u32,
    /// Phase the rule runs in.
    pub phase: Phase,
    /// Metadata for audit events.
    pub meta: RuleMeta,
    /// Flags.
    pub flags: RuleFlags,
    /// Capture prefix installed by the rule's `capture` action.
    pub capture_prefix: Option<String>,
    /// The operator.
    pub operator: OperatorInstance,
    /// Targets walked in order.
    pub targets: Vec<Target>,
    /// Actions fired on a truthy result.
    pub true_actions: Vec<ActionInstance>,
    /// Actions fired on a falsy result.
    pub false_actions: Vec<ActionInstance>,
    /// Chain parent, as an index into the owning set.
    pub parent: Option<usize>,
    /// Chain child, as an index into the owning set.
    pub child: Option<usize>,
}

/// Rules of one configuration context, indexed by phase at registration.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    by_id: FxHashMap<String, usize>,
    phase_lists: [Vec<usize>; Phase::COUNT],
}

impl RuleSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or, with a strictly greater revision, replaces) a rule.
    ///
    /// Top-level rules are appended to their phase's list in registration
    /// order; `in_chain` rules are linked to their chain head instead and
    /// never appear in a phase list.
    ///
    /// # Errors
    /// - `Exists` when the id is present at an equal or greater revision;
    /// - `Incompat` when the operator, transformations, chaining, or capture
    ///   request do not fit the phase;
    /// - `InvalidArg` for structural problems (no targets, missing chain
    ///   head, phase mismatch within a chain).
    pub fn register(&mut self, rule: Rule) -> EngineResult<()> {
        Self::validate(&rule)?;
        let mut replaced = false;
        let idx = match self.by_id.get(&rule.id).copied() {
            Some(idx) => {
                replaced = true;
                let (old_revision, old_phase) = (self.rules[idx].revision, self.rules[idx].phase);
                if rule.revision <= old_revision {
                    return Err(EngineError::Exists(format!(
                        "rule {} revision {} (installed: {})",
                        rule.id, rule.revision, old_revision
                    )));
                }
                info!(
                    rule_id = %rule.id,
                    old_revision,
                    new_revision = rule.revision,
                    "replacing rule"
                );
                self.unlink(idx);
                self.phase_lists[old_phase.index()].retain(|&i| i != idx);
                self.rules[idx] = rule;
                idx
            }
            None => {
                self.rules.push(rule);
                let idx = self.rules.len() - 1;
                self.by_id.insert(self.rules[idx].id.clone(), idx);
                idx
            }
        };

        if self.rules[idx].flags.in_chain {
            if let Err(err) = self.link_chain(idx) {
                // Do not leave a half-registered rule behind: fresh inserts
                // roll back; a failed replacement stays installed but is
                // marked invalid so it can never run.
                if replaced {
                    self.rules[idx].flags.valid = false;
                } else {
                    let id = self.rules[idx].id.clone();
                    self.by_id.remove(&id);
                    self.rules.pop();
                }
                return Err(err);
            }
        } else {
            self.phase_lists[self.rules[idx].phase.index()].push(idx);
        }
        Ok(())
    }

    /// Top-level rule indices for `phase`, in registration order.
    pub fn phase_rules(&self, phase: Phase) -> &[usize] {
        &self.phase_lists[phase.index()]
    }

    /// Borrows a rule by index.
    pub fn rule(&self, idx: usize) -> &Rule {
        &self.rules[idx]
    }

    /// Looks a rule up by id.
    pub fn by_id(&self, id: &str) -> Option<&Rule> {
        self.by_id.get(id).map(|&idx| &self.rules[idx])
    }

    /// Number of registered rules (chain members included).
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn validate(rule: &Rule) -> EngineResult<()> {
        let caps = rule.operator.caps;
        if rule.phase.is_stream() && !caps.stream {
            return Err(EngineError::Incompat(format!(
                "operator {} is not stream-capable (rule {}, phase {})",
                rule.operator.name, rule.id, rule.phase
            )));
        }
        if !rule.phase.is_stream() && !caps.phase {
            return Err(EngineError::Incompat(format!(
                "operator {} is stream-only (rule {}, phase {})",
                rule.operator.name, rule.id, rule.phase
            )));
        }
        if !rule.phase.allows_tfns() && rule.targets.iter().any(|t| !t.tfns.is_empty()) {
            return Err(EngineError::Incompat(format!(
                "phase {} does not allow transformations (rule {})",
                rule.phase, rule.id
            )));
        }
        if rule.flags.chain_to_next && !(rule.phase.allows_chain() && rule.flags.allow_chain) {
            return Err(EngineError::Incompat(format!(
                "rule {} may not chain in phase {}",
                rule.id, rule.phase
            )));
        }
        if rule.operator.capture && !caps.capture {
            return Err(EngineError::Incompat(format!(
                "operator {} does not support capture (rule {})",
                rule.operator.name, rule.id
            )));
        }
        if !rule.flags.external && !rule.phase.is_stream() && rule.targets.is_empty() {
            return Err(EngineError::InvalidArg(format!(
                "rule {} has no targets and is not external",
                rule.id
            )));
        }
        if rule.flags.in_chain && rule.chain_id.is_none() {
            return Err(EngineError::InvalidArg(format!(
                "rule {} is in a chain but has no chain id",
                rule.id
            )));
        }
        Ok(())
    }

    /// Links `idx` to the most recent childless chain head with the same
    /// chain id.
    fn link_chain(&mut self, idx: usize) -> EngineResult<()> {
        let chain_id = self.rules[idx].chain_id.clone();
        let parent = self
            .rules
            .iter()
            .enumerate()
            .rev()
            .find(|(i, r)| {
                *i != idx
                    && r.flags.chain_to_next
                    && r.child.is_none()
                    && r.chain_id == chain_id
            })
            .map(|(i, _)| i);
        let Some(parent) = parent else {
            return Err(EngineError::InvalidArg(format!(
                "rule {}: no open chain head for chain {:?}",
                self.rules[idx].id, chain_id
            )));
        };
        if self.rules[parent].phase != self.rules[idx].phase {
            return Err(EngineError::InvalidArg(format!(
                "rule {}: phase {} does not match chain head phase {}",
                self.rules[idx].id, self.rules[idx].phase, self.rules[parent].phase
            )));
        }
        self.rules[parent].child = Some(idx);
        self.rules[idx].parent = Some(parent);
        Ok(())
    }

    /// Detaches a slot from its chain neighbors before replacement.
    fn unlink(&mut self, idx: usize) {
        if let Some(parent) = self.rules[idx].parent.take() {
            self.rules[parent].child = None;
        }
        if let Some(child) = self.rules[idx].child.take() {
            self.rules[child].parent = None;
        }
    }
}
