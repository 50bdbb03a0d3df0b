// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! picket-core: inline HTTP inspection engine.
//!
//! The engine embeds in a reverse proxy. The host feeds it parsed state
//! transitions ([`Engine::notify_request_header`] and friends); the engine
//! walks the configured rules at each phase and signals blocking back
//! through the [`HostServer`] contract. Everything is synchronous: the
//! host owns all I/O and threading, one transaction is touched by one
//! task at a time, and a closed engine is immutable and freely shareable.
#![forbid(unsafe_code)]

/// Actions fired when a rule's branch is taken.
pub mod action;
/// Configuration documents (serde model + loader).
pub mod config;
mod data;
mod engine;
mod events;
mod exec;
mod field;
mod headers;
mod host;
mod notify;
/// Operators: named predicates over fields.
pub mod operator;
mod phase;
mod registry;
mod rule;
mod scope;
mod state;
mod status;
/// Transformations: named pure functions over fields.
pub mod tfn;
mod tx;

// Re-exports for the stable public API.
/// Per-transaction data store and expansion.
pub use data::{TxData, CAPTURE, EXPAND_LIMIT};
/// Engine, contexts, and the rule-draft registration surface.
pub use engine::{
    ActionDraft, Context, Engine, EngineBuilder, OperatorDraft, RuleDraft, TargetDraft,
};
/// Structured audit events.
pub use events::AuditEvent;
/// Typed fields.
pub use field::{Field, FieldValue, StreamHandle};
/// Host-delivered header sets.
pub use headers::HeaderSet;
/// The host-embedding contract.
pub use host::{HeaderDirection, HeaderOp, HostServer, NullHost};
/// Rule phases.
pub use phase::Phase;
/// Name-keyed registries.
pub use registry::Registry;
/// The compiled rule model.
pub use rule::{
    ActionInstance, OperatorInstance, Rule, RuleFlags, RuleMeta, RuleSet, Target,
};
/// Lifetime-scoped cleanup and module data.
pub use scope::Scope;
/// States and hook traits.
pub use state::{ConnHook, DataHook, State, TxHook};
/// Uniform status values.
pub use status::{EngineError, EngineResult, Outcome};
/// Connections and transactions.
pub use tx::{
    BlockFlags, BlockMode, Connection, RequestLine, ResponseLine, Transaction, TxFlags,
    DEFAULT_BLOCK_STATUS,
};
