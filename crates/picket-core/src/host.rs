// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The host-embedding contract.
//!
//! The embedding proxy implements [`HostServer`]; the engine holds it for
//! the life of the process. Every operation defaults to `Declined` ("not
//! supported"), so a host only implements what it can honor. `Declined`
//! from an implemented operation means "too late / unwilling"; it is never
//! an error.

use crate::status::{EngineResult, Outcome};
use crate::tx::{Connection, Transaction};

/// Which message's headers a header edit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDirection {
    /// Client → server headers.
    Request,
    /// Server → client headers.
    Response,
}

/// Header edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOp {
    /// Replace the header, creating it when absent.
    Set,
    /// Remove the header.
    Unset,
    /// Add a new header line, even when one exists.
    Add,
    /// Append the value to an existing header line.
    Append,
    /// Merge the value into an existing header line unless already present.
    Merge,
}

/// Outbound calls from the engine into the embedding host.
pub trait HostServer: Send + Sync {
    /// Edits a request or response header.
    ///
    /// Hosts return `Declined` when the direction's headers were already
    /// committed to the wire.
    fn edit_header(
        &self,
        _tx: &Transaction,
        _direction: HeaderDirection,
        _op: HeaderOp,
        _name: &str,
        _value: &[u8],
    ) -> EngineResult {
        Ok(Outcome::Declined)
    }

    /// Instructs the host to synthesize an HTTP error response.
    fn error_response(&self, _tx: &Transaction, _status: u16) -> EngineResult {
        Ok(Outcome::Declined)
    }

    /// Accumulates a header for the pending error response.
    fn error_header(&self, _tx: &Transaction, _name: &str, _value: &[u8]) -> EngineResult {
        Ok(Outcome::Declined)
    }

    /// Supplies the body for the pending error response.
    fn error_body(&self, _tx: &Transaction, _body: &[u8]) -> EngineResult {
        Ok(Outcome::Declined)
    }

    /// Requests that the host drop the connection.
    fn close(&self, _conn: &Connection, _tx: Option<&Transaction>) -> EngineResult {
        Ok(Outcome::Declined)
    }
}

/// Host that supports nothing; every call declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostServer for NullHost {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unimplemented_operations_decline() {
        let host = NullHost;
        let tx = Transaction::for_tests();
        assert!(host.error_response(&tx, 403).unwrap().is_declined());
        assert!(host
            .edit_header(&tx, HeaderDirection::Response, HeaderOp::Set, "X", b"1")
            .unwrap()
            .is_declined());
    }
}
