// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Transaction states and the per-state hook table.
//!
//! The host informs the engine of state transitions; the engine dispatches
//! the hooks registered against each state in registration order. Hooks come
//! in three families: connection hooks (connection bracket states),
//! transaction hooks (everything in between), and data hooks (body chunk
//! states, which also receive the chunk).

use std::sync::Arc;

use bytes::Bytes;

use crate::engine::Engine;
use crate::status::{EngineError, EngineResult};
use crate::tx::{Connection, Transaction};

/// States a connection and its transactions move through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// A connection was opened.
    ConnOpened,
    /// A transaction started on the connection.
    TxStarted,
    /// The request line arrived.
    RequestLine,
    /// All request headers arrived.
    RequestHeader,
    /// A request body chunk arrived (may repeat).
    RequestBody,
    /// The request is complete.
    RequestFinished,
    /// The response line arrived.
    ResponseStarted,
    /// All response headers arrived.
    ResponseHeader,
    /// A response body chunk arrived (may repeat).
    ResponseBody,
    /// The response is complete.
    ResponseFinished,
    /// Post-processing; always runs for a started transaction.
    PostProcess,
    /// Audit logging; always runs for a started transaction.
    Logging,
    /// The transaction is being destroyed.
    TxDestroyed,
    /// The connection closed.
    ConnClosed,
}

impl State {
    /// All states, in order.
    pub const ALL: [Self; 14] = [
        Self::ConnOpened,
        Self::TxStarted,
        Self::RequestLine,
        Self::RequestHeader,
        Self::RequestBody,
        Self::RequestFinished,
        Self::ResponseStarted,
        Self::ResponseHeader,
        Self::ResponseBody,
        Self::ResponseFinished,
        Self::PostProcess,
        Self::Logging,
        Self::TxDestroyed,
        Self::ConnClosed,
    ];

    /// Number of states.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index for per-state tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// True for the connection bracket states.
    pub const fn is_conn(self) -> bool {
        matches!(self, Self::ConnOpened | Self::ConnClosed)
    }

    /// True for the body chunk states, whose hooks also receive data.
    pub const fn is_data(self) -> bool {
        matches!(self, Self::RequestBody | Self::ResponseBody)
    }

    /// Whether a `Declined` hook result may enforce blocking at this state.
    ///
    /// Header and body states only; everywhere else a declining hook is
    /// logged and ignored.
    pub const fn allows_blocking(self) -> bool {
        matches!(
            self,
            Self::RequestHeader
                | Self::RequestBody
                | Self::RequestFinished
                | Self::ResponseHeader
                | Self::ResponseBody
                | Self::ResponseFinished
        )
    }

    /// Stable lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConnOpened => "conn_opened",
            Self::TxStarted => "tx_started",
            Self::RequestLine => "request_line",
            Self::RequestHeader => "request_header",
            Self::RequestBody => "request_body",
            Self::RequestFinished => "request_finished",
            Self::ResponseStarted => "response_started",
            Self::ResponseHeader => "response_header",
            Self::ResponseBody => "response_body",
            Self::ResponseFinished => "response_finished",
            Self::PostProcess => "post_process",
            Self::Logging => "logging",
            Self::TxDestroyed => "tx_destroyed",
            Self::ConnClosed => "conn_closed",
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook invoked at a transaction state.
pub trait TxHook: Send + Sync {
    /// Called when the host notifies `state`.
    fn notify(&self, engine: &Engine, tx: &mut Transaction, state: State) -> EngineResult;
}

/// Hook invoked at a connection bracket state.
pub trait ConnHook: Send + Sync {
    /// Called when the host notifies `state`.
    fn notify(&self, engine: &Engine, conn: &mut Connection, state: State) -> EngineResult;
}

/// Hook invoked with a body data chunk.
pub trait DataHook: Send + Sync {
    /// Called once per delivered chunk at `state`.
    fn notify(
        &self,
        engine: &Engine,
        tx: &mut Transaction,
        state: State,
        chunk: &Bytes,
    ) -> EngineResult;
}

struct Named<T: ?Sized> {
    name: String,
    hook: Arc<T>,
}

/// Per-state hook lists, populated during configuration and frozen when the
/// engine closes.
pub(crate) struct HookTable {
    tx: [Vec<Named<dyn TxHook>>; State::COUNT],
    conn: [Vec<Named<dyn ConnHook>>; State::COUNT],
    data: [Vec<Named<dyn DataHook>>; State::COUNT],
}

impl HookTable {
    pub(crate) fn new() -> Self {
        Self {
            tx: std::array::from_fn(|_| Vec::new()),
            conn: std::array::from_fn(|_| Vec::new()),
            data: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub(crate) fn register_tx(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn TxHook>,
    ) -> EngineResult<()> {
        if state.is_conn() {
            return Err(EngineError::Incompat(format!(
                "{state} takes connection hooks, not transaction hooks"
            )));
        }
        Self::insert(&mut self.tx[state.index()], state, name, hook)
    }

    pub(crate) fn register_conn(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn ConnHook>,
    ) -> EngineResult<()> {
        if !state.is_conn() {
            return Err(EngineError::Incompat(format!(
                "{state} does not take connection hooks"
            )));
        }
        Self::insert(&mut self.conn[state.index()], state, name, hook)
    }

    pub(crate) fn register_data(
        &mut self,
        state: State,
        name: &str,
        hook: Arc<dyn DataHook>,
    ) -> EngineResult<()> {
        if !state.is_data() {
            return Err(EngineError::Incompat(format!(
                "{state} does not take data hooks"
            )));
        }
        Self::insert(&mut self.data[state.index()], state, name, hook)
    }

    pub(crate) fn unregister_tx(&mut self, state: State, name: &str) -> EngineResult<()> {
        Self::remove(&mut self.tx[state.index()], state, name)
    }

    pub(crate) fn unregister_conn(&mut self, state: State, name: &str) -> EngineResult<()> {
        Self::remove(&mut self.conn[state.index()], state, name)
    }

    pub(crate) fn unregister_data(&mut self, state: State, name: &str) -> EngineResult<()> {
        Self::remove(&mut self.data[state.index()], state, name)
    }

    pub(crate) fn tx_hooks(&self, state: State) -> impl Iterator<Item = (&str, &dyn TxHook)> {
        self.tx[state.index()]
            .iter()
            .map(|n| (n.name.as_str(), &*n.hook))
    }

    pub(crate) fn conn_hooks(&self, state: State) -> impl Iterator<Item = (&str, &dyn ConnHook)> {
        self.conn[state.index()]
            .iter()
            .map(|n| (n.name.as_str(), &*n.hook))
    }

    pub(crate) fn data_hooks(&self, state: State) -> impl Iterator<Item = (&str, &dyn DataHook)> {
        self.data[state.index()]
            .iter()
            .map(|n| (n.name.as_str(), &*n.hook))
    }

    pub(crate) fn hook_count(&self, state: State) -> usize {
        let i = state.index();
        self.tx[i].len() + self.conn[i].len() + self.data[i].len()
    }

    fn insert<T: ?Sized>(
        list: &mut Vec<Named<T>>,
        state: State,
        name: &str,
        hook: Arc<T>,
    ) -> EngineResult<()> {
        if list.iter().any(|n| n.name == name) {
            return Err(EngineError::Exists(format!("hook {name} at {state}")));
        }
        list.push(Named {
            name: name.to_owned(),
            hook,
        });
        Ok(())
    }

    fn remove<T: ?Sized>(list: &mut Vec<Named<T>>, state: State, name: &str) -> EngineResult<()> {
        let Some(pos) = list.iter().position(|n| n.name == name) else {
            return Err(EngineError::NotFound(format!("hook {name} at {state}")));
        };
        list.remove(pos);
        Ok(())
    }
}

impl core::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total: usize = State::ALL.iter().map(|s| self.hook_count(*s)).sum();
        f.debug_struct("HookTable").field("hooks", &total).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl TxHook for Nop {
        fn notify(&self, _: &Engine, _: &mut Transaction, _: State) -> EngineResult {
            Ok(crate::Outcome::Ok)
        }
    }

    impl ConnHook for Nop {
        fn notify(&self, _: &Engine, _: &mut Connection, _: State) -> EngineResult {
            Ok(crate::Outcome::Ok)
        }
    }

    #[test]
    fn state_order_is_monotonic() {
        for pair in State::ALL.windows(2) {
            assert!(pair[0].index() < pair[1].index());
        }
    }

    #[test]
    fn register_then_unregister_restores_table() {
        let mut table = HookTable::new();
        let before = table.hook_count(State::RequestHeader);
        table
            .register_tx(State::RequestHeader, "probe", Arc::new(Nop))
            .unwrap();
        assert_eq!(table.hook_count(State::RequestHeader), before + 1);
        table.unregister_tx(State::RequestHeader, "probe").unwrap();
        assert_eq!(table.hook_count(State::RequestHeader), before);
        assert!(matches!(
            table.unregister_tx(State::RequestHeader, "probe"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn hook_kind_must_match_state_kind() {
        let mut table = HookTable::new();
        assert!(matches!(
            table.register_tx(State::ConnOpened, "x", Arc::new(Nop)),
            Err(EngineError::Incompat(_))
        ));
        assert!(matches!(
            table.register_conn(State::RequestHeader, "x", Arc::new(Nop)),
            Err(EngineError::Incompat(_))
        ));
    }

    #[test]
    fn duplicate_hook_name_is_rejected() {
        let mut table = HookTable::new();
        table
            .register_conn(State::ConnOpened, "dup", Arc::new(Nop))
            .unwrap();
        assert!(matches!(
            table.register_conn(State::ConnOpened, "dup", Arc::new(Nop)),
            Err(EngineError::Exists(_))
        ));
    }
}
