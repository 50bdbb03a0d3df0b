// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The engine: registries, contexts, hook table, and the registration
//! facade that compiles rule drafts into the executable model.
//!
//! An engine is mutable while it is being configured. [`Engine::close`]
//! freezes it: the rule-dispatch hooks are installed and from then on the
//! engine is immutable and freely shareable across threads.

use std::sync::Arc;

use bytes::Bytes;

use crate::action::builtin::parse_grade;
use crate::action::Action;
use crate::exec;
use crate::field::norm;
use crate::host::HostServer;
use crate::operator::Operator;
use crate::phase::Phase;
use crate::rule::{
    ActionInstance, OperatorInstance, Rule, RuleFlags, RuleMeta, RuleSet, Target,
};
use crate::state::{ConnHook, DataHook, HookTable, State, TxHook};
use crate::status::{EngineError, EngineResult, Outcome};
use crate::tfn::{TfnRef, Transformation};
use crate::tx::Transaction;
use crate::registry::Registry;

/// A configuration scope: the main context or a named child (site,
/// location). Each carries its own rule set and an enable switch consulted
/// by the runnability check. A transaction executing under a child context
/// runs the ancestors' rules first.
#[derive(Debug)]
pub struct Context {
    /// Context name; the main context is `"main"`.
    pub name: String,
    /// Parent context index; `None` for the main context.
    pub parent: Option<usize>,
    /// Rules of disabled contexts never run.
    pub enabled: bool,
    /// Rules registered to this context.
    pub rules: RuleSet,
}

/// Unresolved target: a field name plus transformation names.
#[derive(Debug, Clone, Default)]
pub struct TargetDraft {
    /// Data-store field name.
    pub name: String,
    /// Transformation names, applied in order.
    pub tfns: Vec<String>,
}

/// Unresolved operator reference.
#[derive(Debug, Clone, Default)]
pub struct OperatorDraft {
    /// Registered operator name.
    pub name: String,
    /// Textual parameter, compiled at registration.
    pub param: String,
    /// Negate the result.
    pub invert: bool,
    /// Expand the parameter at evaluation time.
    pub expand: bool,
    /// Write the capture list on truthy results.
    pub capture: bool,
}

/// Unresolved action reference.
#[derive(Debug, Clone, Default)]
pub struct ActionDraft {
    /// Registered action name.
    pub name: String,
    /// Textual parameter, compiled at registration.
    pub param: String,
}

/// A declarative rule, before names are resolved and parameters compiled.
#[derive(Debug, Clone)]
pub struct RuleDraft {
    /// Unique id within the target context.
    pub id: String,
    /// Revision; defaults to 1.
    pub revision: u32,
    /// Phase the rule runs in.
    pub phase: Phase,
    /// Chain grouping id.
    pub chain_id: Option<String>,
    /// The next rule with this chain id continues this one.
    pub chain_to_next: bool,
    /// This rule continues a chain and never runs top-level.
    pub in_chain: bool,
    /// Evaluate the operator without a target.
    pub external: bool,
    /// Rule enable switch.
    pub enabled: bool,
    /// Metadata (message, severity, tags, provenance).
    pub meta: RuleMeta,
    /// Targets walked in order.
    pub targets: Vec<TargetDraft>,
    /// The operator.
    pub operator: OperatorDraft,
    /// Actions on a truthy result.
    pub true_actions: Vec<ActionDraft>,
    /// Actions on a falsy result.
    pub false_actions: Vec<ActionDraft>,
}

impl RuleDraft {
    /// Minimal draft: everything else defaults.
    pub fn new(id: impl Into<String>, phase: Phase) -> Self {
        Self {
            id: id.into(),
            revision: 1,
            phase,
            chain_id: None,
            chain_to_next: false,
            in_chain: false,
            external: false,
            enabled: true,
            meta: RuleMeta::default(),
            targets: Vec::new(),
            operator: OperatorDraft::default(),
            true_actions: Vec::new(),
            false_actions: Vec::new(),
        }
    }

    /// Adds a target with its transformation pipeline.
    pub fn target(mut self, name: &str, tfns: &[&str]) -> Self {
        self.targets.push(TargetDraft {
            name: name.to_owned(),
            tfns: tfns.iter().map(|&t| t.to_owned()).collect(),
        });
        self
    }

    /// Sets the operator.
    pub fn operator(mut self, name: &str, param: &str) -> Self {
        self.operator.name = name.to_owned();
        self.operator.param = param.to_owned();
        self
    }

    /// Negates the operator result.
    pub fn invert(mut self) -> Self {
        self.operator.invert = true;
        self
    }

    /// Enables capture of the operator's match list.
    pub fn capture(mut self) -> Self {
        self.operator.capture = true;
        self
    }

    /// Appends a true-branch action.
    pub fn action(mut self, name: &str, param: &str) -> Self {
        self.true_actions.push(ActionDraft {
            name: name.to_owned(),
            param: param.to_owned(),
        });
        self
    }

    /// Appends a false-branch action.
    pub fn false_action(mut self, name: &str, param: &str) -> Self {
        self.false_actions.push(ActionDraft {
            name: name.to_owned(),
            param: param.to_owned(),
        });
        self
    }

    /// Marks this rule as a chain head for `chain_id`.
    pub fn chain_to_next(mut self, chain_id: &str) -> Self {
        self.chain_id = Some(chain_id.to_owned());
        self.chain_to_next = true;
        self
    }

    /// Marks this rule as a chain member of `chain_id`.
    pub fn in_chain(mut self, chain_id: &str) -> Self {
        self.chain_id = Some(chain_id.to_owned());
        self.in_chain = true;
        self
    }

    /// Sets the revision.
    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Marks the rule external (operator runs without a target).
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    host: Arc<dyn HostServer>,
    serial: u64,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            host: Arc::new(crate::host::NullHost),
            serial: 0,
        }
    }

    /// Installs the host vtable.
    pub fn host(mut self, host: Arc<dyn HostServer>) -> Self {
        self.host = host;
        self
    }

    /// Sets the engine serial (assigned by the manager).
    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Builds a configurable engine with the built-in registries populated
    /// and an enabled main context.
    pub fn build(self) -> EngineResult<Engine> {
        let mut tfns = Registry::new("transformation");
        crate::tfn::builtin::register_builtins(&mut tfns)?;
        let mut operators = Registry::new("operator");
        crate::operator::builtin::register_builtins(&mut operators)?;
        let mut actions = Registry::new("action");
        crate::action::builtin::register_builtins(&mut actions)?;
        Ok(Engine {
            contexts: vec![Context {
                name: "main".to_owned(),
                parent: None,
                enabled: true,
                rules: RuleSet::new(),
            }],
            tfns,
            operators,
            actions,
            hooks: HookTable::new(),
            host: self.host,
            serial: self.serial,
            closed: false,
        })
    }
}

/// An inspection engine: immutable after [`Engine::close`].
pub struct Engine {
    pub(crate) contexts: Vec<Context>,
    tfns: Registry<dyn Transformation>,
    operators: Registry<dyn Operator>,
    actions: Registry<dyn Action>,
    pub(crate) hooks: HookTable,
    pub(crate) host: Arc<dyn HostServer>,
    serial: u64,
    closed: bool,
}

impl Engine {
    /// Starts building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Serial assigned by the engine manager (0 for standalone engines).
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// True once [`Engine::close`] has frozen the configuration.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// The host vtable.
    pub fn host(&self) -> &dyn HostServer {
        &*self.host
    }

    /// Index of the main context.
    pub const fn main_context(&self) -> usize {
        0
    }

    /// Borrows a context.
    pub fn context(&self, idx: usize) -> &Context {
        &self.contexts[idx]
    }

    /// Finds a context by name.
    pub fn context_by_name(&self, name: &str) -> Option<usize> {
        let want = norm(name);
        self.contexts.iter().position(|c| norm(&c.name) == want)
    }

    /// Creates a child context under `parent`.
    ///
    /// # Errors
    /// `InvalidArg` after close or for an unknown parent; `Exists` for a
    /// duplicate name.
    pub fn context_create(&mut self, name: &str, parent: usize) -> EngineResult<usize> {
        self.writable()?;
        if parent >= self.contexts.len() {
            return Err(EngineError::InvalidArg(format!(
                "unknown parent context {parent}"
            )));
        }
        if self.context_by_name(name).is_some() {
            return Err(EngineError::Exists(format!("context {name}")));
        }
        self.contexts.push(Context {
            name: name.to_owned(),
            parent: Some(parent),
            enabled: true,
            rules: RuleSet::new(),
        });
        Ok(self.contexts.len() - 1)
    }

    /// Enables or disables a context.
    pub fn context_set_enabled(&mut self, ctx: usize, enabled: bool) -> EngineResult<()> {
        self.writable()?;
        let context = self
            .contexts
            .get_mut(ctx)
            .ok_or_else(|| EngineError::InvalidArg(format!("unknown context {ctx}")))?;
        context.enabled = enabled;
        Ok(())
    }

    /// Ancestor chain of `ctx`, root first, ending with `ctx` itself.
    pub(crate) fn context_chain(&self, ctx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = Some(ctx);
        while let Some(idx) = cursor {
            chain.push(idx);
            cursor = self.contexts[idx].parent;
        }
        chain.reverse();
        chain
    }

    /// Registers a transformation.
    pub fn register_transformation(
        &mut self,
        name: &str,
        tfn: Arc<dyn Transformation>,
    ) -> EngineResult<()> {
        self.writable()?;
        self.tfns.register(name, tfn)
    }

    /// Registers an operator.
    pub fn register_operator(&mut self, name: &str, op: Arc<dyn Operator>) -> EngineResult<()> {
        self.writable()?;
        self.operators.register(name, op)
    }

    /// Registers an action.
    pub fn register_action(&mut self, name: &str, action: Arc<dyn Action>) -> EngineResult<()> {
        self.writable()?;
        self.actions.register(name, action)
    }

    /// Registers a transaction hook at `state`.
    pub fn hook_register_tx(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn TxHook>,
    ) -> EngineResult<()> {
        self.writable()?;
        self.hooks.register_tx(state, name, hook)
    }

    /// Registers a connection hook at `state`.
    pub fn hook_register_conn(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn ConnHook>,
    ) -> EngineResult<()> {
        self.writable()?;
        self.hooks.register_conn(state, name, hook)
    }

    /// Registers a data hook at `state`.
    pub fn hook_register_data(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn DataHook>,
    ) -> EngineResult<()> {
        self.writable()?;
        self.hooks.register_data(state, name, hook)
    }

    /// Removes a transaction hook registered under `name` at `state`.
    pub fn hook_unregister_tx(&mut self, state: State, name: &str) -> EngineResult<()> {
        self.writable()?;
        self.hooks.unregister_tx(state, name)
    }

    /// Removes a connection hook registered under `name` at `state`.
    pub fn hook_unregister_conn(&mut self, state: State, name: &str) -> EngineResult<()> {
        self.writable()?;
        self.hooks.unregister_conn(state, name)
    }

    /// Removes a data hook registered under `name` at `state`.
    pub fn hook_unregister_data(&mut self, state: State, name: &str) -> EngineResult<()> {
        self.writable()?;
        self.hooks.unregister_data(state, name)
    }

    /// Compiles and registers a rule draft into context `ctx`.
    ///
    /// Operator and action parameters are parsed now; transformation names
    /// resolve through the registry; metadata actions (`capture`,
    /// `severity`, `confidence`, `tag`, `msg`) bind into the rule.
    pub fn rule_register(&mut self, ctx: usize, draft: RuleDraft) -> EngineResult<()> {
        self.writable()?;
        if ctx >= self.contexts.len() {
            return Err(EngineError::InvalidArg(format!("unknown context {ctx}")));
        }

        let operator_factory = self.operators.lookup(&draft.operator.name)?;
        let compiled_op = operator_factory.compile(&draft.operator.param)?;

        let mut targets = Vec::with_capacity(draft.targets.len());
        for target in &draft.targets {
            let mut tfns = Vec::with_capacity(target.tfns.len());
            for name in &target.tfns {
                tfns.push(TfnRef {
                    name: name.clone(),
                    tfn: self.tfns.lookup(name)?,
                });
            }
            targets.push(Target {
                name: target.name.clone(),
                tfns,
            });
        }

        let mut meta = draft.meta.clone();
        let mut capture = draft.operator.capture;
        let mut capture_prefix = None;
        for action in draft.true_actions.iter().chain(&draft.false_actions) {
            match norm(&action.name).as_str() {
                "capture" => {
                    capture = true;
                    let prefix = action.param.trim();
                    if !prefix.is_empty() {
                        capture_prefix = Some(prefix.to_owned());
                    }
                }
                "severity" => meta.severity = parse_grade("severity", &action.param)?,
                "confidence" => meta.confidence = parse_grade("confidence", &action.param)?,
                "tag" => meta.tags.push(action.param.trim().to_owned()),
                "msg" => meta.message = Some(action.param.clone()),
                _ => {}
            }
        }

        let compile_actions = |reg: &Registry<dyn Action>,
                               drafts: &[ActionDraft]|
         -> EngineResult<Vec<ActionInstance>> {
            drafts
                .iter()
                .map(|a| {
                    Ok(ActionInstance {
                        name: a.name.clone(),
                        param: a.param.clone(),
                        compiled: reg.lookup(&a.name)?.compile(&a.param)?,
                    })
                })
                .collect()
        };
        let true_actions = compile_actions(&self.actions, &draft.true_actions)?;
        let false_actions = compile_actions(&self.actions, &draft.false_actions)?;

        let rule = Rule {
            id: draft.id,
            chain_id: draft.chain_id,
            revision: draft.revision,
            phase: draft.phase,
            meta,
            flags: RuleFlags {
                valid: true,
                enabled: draft.enabled,
                in_chain: draft.in_chain,
                chain_to_next: draft.chain_to_next,
                external: draft.external,
                capture,
                ..RuleFlags::default()
            },
            capture_prefix,
            operator: OperatorInstance {
                name: draft.operator.name,
                param: draft.operator.param,
                invert: draft.operator.invert,
                expand: draft.operator.expand,
                capture,
                caps: operator_factory.caps(),
                compiled: compiled_op,
            },
            targets,
            true_actions,
            false_actions,
            parent: None,
            child: None,
        };
        self.contexts[ctx].rules.register(rule)
    }

    /// Freezes the configuration and installs the rule-dispatch hooks.
    ///
    /// # Errors
    /// `InvalidArg` when already closed.
    pub fn close(&mut self) -> EngineResult<()> {
        self.writable()?;
        for phase in Phase::ALL {
            let state = phase.dispatch_state();
            let name = format!("picket::rules::{phase}");
            if state.is_data() {
                self.hooks
                    .register_data(state, &name, Arc::new(StreamBodyRunner { phase }))?;
            } else if phase.is_stream() {
                self.hooks
                    .register_tx(state, &name, Arc::new(StreamHeaderRunner { phase }))?;
            } else {
                self.hooks
                    .register_tx(state, &name, Arc::new(PhaseRunner { phase }))?;
            }
        }
        self.closed = true;
        Ok(())
    }

    fn writable(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::InvalidArg(
                "engine configuration is closed".to_owned(),
            ));
        }
        Ok(())
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("serial", &self.serial)
            .field("contexts", &self.contexts.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Dispatch hook for one non-stream phase.
struct PhaseRunner {
    phase: Phase,
}

impl TxHook for PhaseRunner {
    fn notify(&self, engine: &Engine, tx: &mut Transaction, _state: State) -> EngineResult {
        exec::run_phase(engine, tx, self.phase)
    }
}

/// Dispatch hook for a stream body phase; runs once per chunk.
struct StreamBodyRunner {
    phase: Phase,
}

impl DataHook for StreamBodyRunner {
    fn notify(
        &self,
        engine: &Engine,
        tx: &mut Transaction,
        _state: State,
        chunk: &Bytes,
    ) -> EngineResult {
        exec::run_stream_phase(engine, tx, self.phase, chunk)
    }
}

/// Dispatch hook for a stream header phase; feeds each header pair as one
/// `name: value` chunk.
struct StreamHeaderRunner {
    phase: Phase,
}

impl TxHook for StreamHeaderRunner {
    fn notify(&self, engine: &Engine, tx: &mut Transaction, state: State) -> EngineResult {
        let headers = if state == State::RequestHeader {
            &tx.request_headers
        } else {
            &tx.response_headers
        };
        let chunks: Vec<Bytes> = headers
            .iter()
            .map(|(name, value)| {
                let mut line = Vec::with_capacity(name.len() + value.len() + 2);
                line.extend_from_slice(name.as_bytes());
                line.extend_from_slice(b": ");
                line.extend_from_slice(value);
                Bytes::from(line)
            })
            .collect();
        let mut status = Outcome::Ok;
        for chunk in &chunks {
            match exec::run_stream_phase(engine, tx, self.phase, chunk)? {
                Outcome::Declined => {
                    status = Outcome::Declined;
                    break;
                }
                Outcome::Ok => {}
            }
        }
        Ok(status)
    }
}
