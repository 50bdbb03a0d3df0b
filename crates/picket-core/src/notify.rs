// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! State-machine driver: the notification surface the host calls.
//!
//! Per-transaction notifications are strictly ordered; an out-of-order or
//! duplicated notification is rejected with `InvalidArg` (body data states
//! may repeat). Hook failures are logged and never abort a state. Blocking
//! is enforced at state boundaries: `immediate` short-circuits everything up
//! to (but excluding) `PostProcess` and `Logging`, which always run for a
//! started transaction; the host's error response is invoked exactly once.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::field::{Field, FieldValue, StreamHandle};
use crate::headers::HeaderSet;
use crate::state::State;
use crate::status::{EngineError, EngineResult, Outcome};
use crate::tx::{Connection, RequestLine, ResponseLine, Transaction, TxFlags};

impl Engine {
    /// Creates a transaction on `conn` under the main context.
    pub fn transaction(&self, conn: &mut Connection) -> Transaction {
        Transaction::new(conn, self.main_context())
    }

    /// Creates a transaction on `conn` under the named context.
    ///
    /// # Errors
    /// `NotFound` for an unknown context name.
    pub fn transaction_in(
        &self,
        conn: &mut Connection,
        context: &str,
    ) -> EngineResult<Transaction> {
        let ctx = self
            .context_by_name(context)
            .ok_or_else(|| EngineError::NotFound(format!("context {context}")))?;
        Ok(Transaction::new(conn, ctx))
    }

    /// The host opened a connection.
    pub fn notify_conn_opened(&self, conn: &mut Connection) -> EngineResult {
        self.ensure_serving()?;
        if conn.opened {
            return Err(EngineError::InvalidArg(format!(
                "connection {} already opened",
                conn.id
            )));
        }
        conn.opened = true;
        self.dispatch_conn_state(State::ConnOpened, conn)
    }

    /// The host closed a connection.
    pub fn notify_conn_closed(&self, conn: &mut Connection) -> EngineResult {
        self.ensure_serving()?;
        if !conn.opened || conn.closed {
            return Err(EngineError::InvalidArg(format!(
                "connection {} not open",
                conn.id
            )));
        }
        conn.closed = true;
        conn.closing = true;
        self.dispatch_conn_state(State::ConnClosed, conn)
    }

    /// A transaction started.
    pub fn notify_tx_started(&self, tx: &mut Transaction) -> EngineResult {
        self.advance(tx, State::TxStarted)?;
        self.dispatch_tx_state(State::TxStarted, tx)
    }

    /// The request line arrived.
    pub fn notify_request_line(&self, tx: &mut Transaction, line: RequestLine) -> EngineResult {
        self.advance(tx, State::RequestLine)?;
        let mut raw = Vec::with_capacity(line.method.len() + line.uri.len() + line.protocol.len() + 2);
        raw.extend_from_slice(&line.method);
        raw.push(b' ');
        raw.extend_from_slice(&line.uri);
        raw.push(b' ');
        raw.extend_from_slice(&line.protocol);
        tx.data.set(Field::bytes("REQUEST_LINE", raw));
        tx.data.set(Field::bytes("REQUEST_METHOD", line.method.clone()));
        tx.data.set(Field::bytes("REQUEST_URI", line.uri.clone()));
        tx.data
            .set(Field::bytes("REQUEST_PROTOCOL", line.protocol.clone()));
        tx.request_line = Some(line);
        self.dispatch_tx_state(State::RequestLine, tx)
    }

    /// All request headers arrived.
    pub fn notify_request_header(&self, tx: &mut Transaction, headers: HeaderSet) -> EngineResult {
        self.advance(tx, State::RequestHeader)?;
        tx.data.set(headers.to_field("REQUEST_HEADERS"));
        tx.request_headers = headers;
        self.dispatch_tx_state(State::RequestHeader, tx)
    }

    /// A request body chunk arrived. May be called repeatedly.
    pub fn notify_request_body_data(&self, tx: &mut Transaction, chunk: Bytes) -> EngineResult {
        self.advance(tx, State::RequestBody)?;
        Self::body_stream(tx, "REQUEST_BODY").push_chunk(chunk.clone());
        self.dispatch_data_state(State::RequestBody, tx, &chunk)
    }

    /// The request finished.
    pub fn notify_request_finished(&self, tx: &mut Transaction) -> EngineResult {
        self.advance(tx, State::RequestFinished)?;
        self.dispatch_tx_state(State::RequestFinished, tx)
    }

    /// The response status line arrived.
    pub fn notify_response_started(
        &self,
        tx: &mut Transaction,
        line: ResponseLine,
    ) -> EngineResult {
        self.advance(tx, State::ResponseStarted)?;
        let mut raw =
            Vec::with_capacity(line.protocol.len() + line.message.len() + 5);
        raw.extend_from_slice(&line.protocol);
        raw.push(b' ');
        raw.extend_from_slice(line.status.to_string().as_bytes());
        raw.push(b' ');
        raw.extend_from_slice(&line.message);
        tx.data.set(Field::bytes("RESPONSE_LINE", raw));
        tx.data
            .set(Field::bytes("RESPONSE_PROTOCOL", line.protocol.clone()));
        tx.data
            .set(Field::num("RESPONSE_STATUS", i64::from(line.status)));
        tx.data
            .set(Field::bytes("RESPONSE_MESSAGE", line.message.clone()));
        tx.response_line = Some(line);
        self.dispatch_tx_state(State::ResponseStarted, tx)
    }

    /// All response headers arrived.
    pub fn notify_response_header(&self, tx: &mut Transaction, headers: HeaderSet) -> EngineResult {
        self.advance(tx, State::ResponseHeader)?;
        tx.data.set(headers.to_field("RESPONSE_HEADERS"));
        tx.response_headers = headers;
        self.dispatch_tx_state(State::ResponseHeader, tx)
    }

    /// A response body chunk arrived. May be called repeatedly.
    pub fn notify_response_body_data(&self, tx: &mut Transaction, chunk: Bytes) -> EngineResult {
        self.advance(tx, State::ResponseBody)?;
        Self::body_stream(tx, "RESPONSE_BODY").push_chunk(chunk.clone());
        self.dispatch_data_state(State::ResponseBody, tx, &chunk)
    }

    /// The response finished.
    pub fn notify_response_finished(&self, tx: &mut Transaction) -> EngineResult {
        self.advance(tx, State::ResponseFinished)?;
        self.dispatch_tx_state(State::ResponseFinished, tx)
    }

    /// Post-processing; runs even for blocked transactions.
    pub fn notify_post_process(&self, tx: &mut Transaction) -> EngineResult {
        self.advance(tx, State::PostProcess)?;
        self.dispatch_tx_state(State::PostProcess, tx)
    }

    /// Audit logging; runs even for blocked transactions and emits the
    /// transaction's recorded events.
    pub fn notify_logging(&self, tx: &mut Transaction) -> EngineResult {
        self.advance(tx, State::Logging)?;
        let status = self.dispatch_tx_state(State::Logging, tx)?;
        for event in &tx.events {
            event.emit(tx.id);
        }
        Ok(status)
    }

    /// The transaction is going away. Runs `PostProcess` and `Logging`
    /// first when the host skipped them, then finishes the transaction
    /// scope.
    pub fn notify_tx_destroyed(&self, tx: &mut Transaction) -> EngineResult {
        self.ensure_serving()?;
        if tx.last_state.is_none() {
            return Err(EngineError::InvalidArg(
                "transaction never started".to_owned(),
            ));
        }
        if !tx.flags.has(TxFlags::POST_PROCESS) {
            let _ = self.notify_post_process(tx)?;
        }
        if !tx.flags.has(TxFlags::LOGGING) {
            let _ = self.notify_logging(tx)?;
        }
        self.advance(tx, State::TxDestroyed)?;
        let status = self.dispatch_tx_state(State::TxDestroyed, tx)?;
        tx.scope.finish();
        Ok(status)
    }

    /// Validates ordering and records the transition.
    fn advance(&self, tx: &mut Transaction, state: State) -> EngineResult<()> {
        self.ensure_serving()?;
        let ordered = match tx.last_state {
            None => state == State::TxStarted,
            Some(prev) => state.index() > prev.index() || (state == prev && state.is_data()),
        };
        if !ordered {
            return Err(EngineError::InvalidArg(format!(
                "state {state} out of order (last: {})",
                tx.last_state.map_or("none", State::name)
            )));
        }
        tx.last_state = Some(state);
        if let Some(flag) = Self::flag_for(state) {
            tx.flags.set(flag);
        }
        Ok(())
    }

    const fn flag_for(state: State) -> Option<TxFlags> {
        match state {
            State::TxStarted => Some(TxFlags::STARTED),
            State::RequestLine => Some(TxFlags::REQUEST_LINE),
            State::RequestHeader => Some(TxFlags::REQUEST_HEADER),
            State::RequestBody => Some(TxFlags::REQUEST_BODY),
            State::RequestFinished => Some(TxFlags::REQUEST_FINISHED),
            State::ResponseStarted => Some(TxFlags::RESPONSE_STARTED),
            State::ResponseHeader => Some(TxFlags::RESPONSE_HEADER),
            State::ResponseBody => Some(TxFlags::RESPONSE_BODY),
            State::ResponseFinished => Some(TxFlags::RESPONSE_FINISHED),
            State::PostProcess => Some(TxFlags::POST_PROCESS),
            State::Logging => Some(TxFlags::LOGGING),
            State::TxDestroyed => Some(TxFlags::DESTROYED),
            State::ConnOpened | State::ConnClosed => None,
        }
    }

    fn ensure_serving(&self) -> EngineResult<()> {
        if !self.is_closed() {
            return Err(EngineError::InvalidArg(
                "engine configuration is still open".to_owned(),
            ));
        }
        Ok(())
    }

    /// Fetches (or creates) the named body stream on the transaction.
    fn body_stream(tx: &mut Transaction, name: &str) -> StreamHandle {
        if let Some(field) = tx.data.get(name) {
            if let FieldValue::Stream(handle) = &field.value {
                return handle.clone();
            }
        }
        let handle = StreamHandle::new();
        tx.data.set(Field::stream(name, handle.clone()));
        handle
    }

    fn dispatch_tx_state(&self, state: State, tx: &mut Transaction) -> EngineResult {
        let audit = Self::is_audit_state(state);
        if tx.block_flags().immediate() && !audit {
            debug!(state = %state, "skipping hooks: immediate block");
            return self.enforce_at(state, tx);
        }
        for (name, hook) in self.hooks.tx_hooks(state) {
            match hook.notify(self, tx, state) {
                Ok(Outcome::Ok) => {}
                Ok(Outcome::Declined) => {
                    if !state.allows_blocking() {
                        debug!(hook = name, state = %state, "hook declined outside a blocking state");
                    }
                }
                Err(err) => warn!(hook = name, state = %state, error = %err, "hook failed"),
            }
            if tx.block_flags().immediate() && !audit {
                break;
            }
        }
        if audit {
            Ok(Outcome::Ok)
        } else {
            self.enforce_at(state, tx)
        }
    }

    fn dispatch_data_state(&self, state: State, tx: &mut Transaction, chunk: &Bytes) -> EngineResult {
        if tx.block_flags().immediate() {
            debug!(state = %state, "skipping data hooks: immediate block");
            return self.enforce_at(state, tx);
        }
        for (name, hook) in self.hooks.data_hooks(state) {
            match hook.notify(self, tx, state, chunk) {
                Ok(_) => {}
                Err(err) => warn!(hook = name, state = %state, error = %err, "hook failed"),
            }
            if tx.block_flags().immediate() {
                break;
            }
        }
        self.enforce_at(state, tx)
    }

    fn dispatch_conn_state(&self, state: State, conn: &mut Connection) -> EngineResult {
        for (name, hook) in self.hooks.conn_hooks(state) {
            match hook.notify(self, conn, state) {
                Ok(_) => {}
                Err(err) => warn!(hook = name, state = %state, error = %err, "hook failed"),
            }
        }
        Ok(Outcome::Ok)
    }

    /// Boundary enforcement: signals the host (once) and reports `Declined`
    /// while an enforcing block is pending.
    fn enforce_at(&self, state: State, tx: &mut Transaction) -> EngineResult {
        let block = tx.block_flags();
        if block.immediate() || (block.phase() && state.allows_blocking()) {
            if !tx.error_sent {
                tx.error_sent = true;
                debug!(
                    state = %state,
                    status = tx.block_status,
                    "blocking transaction"
                );
                match self.host().error_response(tx, tx.block_status) {
                    Ok(Outcome::Ok) => {}
                    Ok(Outcome::Declined) => {
                        warn!(state = %state, "host declined the error response")
                    }
                    Err(err) => warn!(state = %state, error = %err, "host error response failed"),
                }
            }
            return Ok(Outcome::Declined);
        }
        if block.advisory() {
            debug!(state = %state, "advisory block flag is set");
        }
        Ok(Outcome::Ok)
    }

    const fn is_audit_state(state: State) -> bool {
        matches!(
            state,
            State::PostProcess | State::Logging | State::TxDestroyed
        )
    }
}
