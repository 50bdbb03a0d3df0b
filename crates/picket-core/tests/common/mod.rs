// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared fixtures: a recording host and engine/transaction builders.

use std::sync::{Arc, Mutex};

use picket_core::{
    Connection, Engine, EngineResult, HeaderDirection, HeaderOp, HostServer, Outcome, RuleDraft,
    Transaction,
};

/// Host double that records every outbound call and accepts them all.
#[derive(Debug, Default)]
pub struct RecordingHost {
    /// Status codes passed to `error_response`, in call order.
    pub error_responses: Mutex<Vec<u16>>,
    /// Header edits, as `(direction, op, name, value)`.
    pub header_edits: Mutex<Vec<(HeaderDirection, HeaderOp, String, Vec<u8>)>>,
    /// Number of `close` calls.
    pub closes: Mutex<usize>,
}

impl HostServer for RecordingHost {
    fn edit_header(
        &self,
        _tx: &Transaction,
        direction: HeaderDirection,
        op: HeaderOp,
        name: &str,
        value: &[u8],
    ) -> EngineResult {
        self.header_edits
            .lock()
            .unwrap()
            .push((direction, op, name.to_owned(), value.to_vec()));
        Ok(Outcome::Ok)
    }

    fn error_response(&self, _tx: &Transaction, status: u16) -> EngineResult {
        self.error_responses.lock().unwrap().push(status);
        Ok(Outcome::Ok)
    }

    fn close(&self, _conn: &Connection, _tx: Option<&Transaction>) -> EngineResult {
        *self.closes.lock().unwrap() += 1;
        Ok(Outcome::Ok)
    }
}

impl RecordingHost {
    /// Number of error responses the engine requested.
    pub fn error_response_count(&self) -> usize {
        self.error_responses.lock().unwrap().len()
    }
}

/// Builds a closed engine with `drafts` registered into the main context.
pub fn build_engine(drafts: Vec<RuleDraft>) -> (Engine, Arc<RecordingHost>) {
    let host = Arc::new(RecordingHost::default());
    let mut engine = Engine::builder()
        .host(Arc::<RecordingHost>::clone(&host))
        .build()
        .unwrap();
    let main = engine.main_context();
    for draft in drafts {
        engine.rule_register(main, draft).unwrap();
    }
    engine.close().unwrap();
    (engine, host)
}

/// A fresh connection with documentation addresses.
pub fn conn() -> Connection {
    Connection::new(
        1,
        "203.0.113.9:49152".parse().unwrap(),
        "192.0.2.1:80".parse().unwrap(),
    )
}

/// Creates and starts a transaction on `conn`.
pub fn started_tx(engine: &Engine, conn: &mut Connection) -> Transaction {
    let mut tx = engine.transaction(conn);
    let _ = engine.notify_tx_started(&mut tx).unwrap();
    tx
}
