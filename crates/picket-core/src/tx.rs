// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Connections and transactions.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use crate::data::TxData;
use crate::events::AuditEvent;
use crate::headers::HeaderSet;
use crate::scope::Scope;
use crate::state::State;

/// Status code sent for blocked transactions unless an action chose another.
pub const DEFAULT_BLOCK_STATUS: u16 = 403;

/// Monotonic per-transaction flag set; bits are set once and never cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxFlags(u32);

impl TxFlags {
    /// The transaction started.
    pub const STARTED: Self = Self(1 << 0);
    /// The request line was seen.
    pub const REQUEST_LINE: Self = Self(1 << 1);
    /// Request headers were seen.
    pub const REQUEST_HEADER: Self = Self(1 << 2);
    /// At least one request body chunk was seen.
    pub const REQUEST_BODY: Self = Self(1 << 3);
    /// The request finished.
    pub const REQUEST_FINISHED: Self = Self(1 << 4);
    /// The response started.
    pub const RESPONSE_STARTED: Self = Self(1 << 5);
    /// Response headers were seen.
    pub const RESPONSE_HEADER: Self = Self(1 << 6);
    /// At least one response body chunk was seen.
    pub const RESPONSE_BODY: Self = Self(1 << 7);
    /// The response finished.
    pub const RESPONSE_FINISHED: Self = Self(1 << 8);
    /// Post-processing ran.
    pub const POST_PROCESS: Self = Self(1 << 9);
    /// Audit logging ran.
    pub const LOGGING: Self = Self(1 << 10);
    /// The transaction was destroyed.
    pub const DESTROYED: Self = Self(1 << 11);

    /// Sets `flag` (monotonic; never clears).
    pub fn set(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    /// True when every bit of `flag` is set.
    pub const fn has(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Requested blocking strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Log only; never enforce.
    Advisory,
    /// Enforce at the next phase boundary.
    Phase,
    /// Enforce as soon as control returns to the host.
    Immediate,
}

/// Monotonic block markers; once requested, a mode stays requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    advisory: bool,
    phase: bool,
    immediate: bool,
}

impl BlockFlags {
    /// Requests blocking at `mode`.
    pub fn set(&mut self, mode: BlockMode) {
        match mode {
            BlockMode::Advisory => self.advisory = true,
            BlockMode::Phase => self.phase = true,
            BlockMode::Immediate => self.immediate = true,
        }
    }

    /// Advisory blocking was requested.
    pub const fn advisory(self) -> bool {
        self.advisory
    }

    /// Phase-boundary blocking was requested.
    pub const fn phase(self) -> bool {
        self.phase
    }

    /// Immediate blocking was requested.
    pub const fn immediate(self) -> bool {
        self.immediate
    }

    /// Any enforcing mode (phase or immediate) was requested.
    pub const fn enforcing(self) -> bool {
        self.phase || self.immediate
    }
}

/// Parsed request line, delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// HTTP method.
    pub method: Bytes,
    /// Request target.
    pub uri: Bytes,
    /// Protocol version token.
    pub protocol: Bytes,
}

/// Parsed response status line, delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// Protocol version token.
    pub protocol: Bytes,
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub message: Bytes,
}

/// One client connection; owns the lifetime of its transactions.
#[derive(Debug)]
pub struct Connection {
    /// Host-assigned identifier.
    pub id: u64,
    /// Peer address.
    pub remote_ip: IpAddr,
    /// Peer port.
    pub remote_port: u16,
    /// Local address.
    pub local_ip: IpAddr,
    /// Local port.
    pub local_port: u16,
    /// Connection-lifetime scope; transactions nest inside it.
    pub scope: Scope,
    /// Number of transactions started on this connection.
    pub tx_count: u64,
    /// The host marked the connection as closing.
    pub closing: bool,
    pub(crate) opened: bool,
    pub(crate) closed: bool,
}

impl Connection {
    /// New connection between `remote` and `local`.
    pub fn new(id: u64, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            id,
            remote_ip: remote.ip(),
            remote_port: remote.port(),
            local_ip: local.ip(),
            local_port: local.port(),
            scope: Scope::new("connection"),
            tx_count: 0,
            closing: false,
            opened: false,
            closed: false,
        }
    }
}

/// One HTTP transaction under inspection.
#[derive(Debug)]
pub struct Transaction {
    /// Identifier, unique within the connection.
    pub id: u64,
    /// Owning connection's identifier.
    pub conn_id: u64,
    /// Transaction-lifetime scope.
    pub scope: Scope,
    /// Per-transaction data store.
    pub data: TxData,
    /// Monotonic progress flags.
    pub flags: TxFlags,
    /// Status code for a host-generated error response when blocked.
    pub block_status: u16,
    /// Request line, once delivered.
    pub request_line: Option<RequestLine>,
    /// Request headers, once delivered.
    pub request_headers: HeaderSet,
    /// Response status line, once delivered.
    pub response_line: Option<ResponseLine>,
    /// Response headers, once delivered.
    pub response_headers: HeaderSet,
    /// Capture prefix installed by the `capture` action, if any.
    pub capture_prefix: Option<String>,
    /// Audit events recorded by firing rules.
    pub events: Vec<AuditEvent>,
    pub(crate) ctx: usize,
    pub(crate) block: BlockFlags,
    pub(crate) last_state: Option<State>,
    pub(crate) error_sent: bool,
}

impl Transaction {
    /// Creates a transaction on `conn`, running under context `ctx`.
    pub fn new(conn: &mut Connection, ctx: usize) -> Self {
        conn.tx_count += 1;
        Self {
            id: conn.tx_count,
            conn_id: conn.id,
            scope: Scope::new("transaction"),
            data: TxData::new(),
            flags: TxFlags::default(),
            block_status: DEFAULT_BLOCK_STATUS,
            request_line: None,
            request_headers: HeaderSet::new(),
            response_line: None,
            response_headers: HeaderSet::new(),
            capture_prefix: None,
            events: Vec::new(),
            ctx,
            block: BlockFlags::default(),
            last_state: None,
            error_sent: false,
        }
    }

    /// Index of the configuration context this transaction runs under.
    pub const fn context(&self) -> usize {
        self.ctx
    }

    /// Current block markers.
    pub const fn block_flags(&self) -> BlockFlags {
        self.block
    }

    /// Requests blocking at `mode` (monotonic).
    pub fn request_block(&mut self, mode: BlockMode) {
        self.block.set(mode);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let remote = "198.51.100.7:4321".parse().unwrap_or_else(|_| unreachable!());
        let local = "203.0.113.1:80".parse().unwrap_or_else(|_| unreachable!());
        let mut conn = Connection::new(1, remote, local);
        Self::new(&mut conn, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_flags_are_monotonic() {
        let mut flags = TxFlags::default();
        flags.set(TxFlags::STARTED);
        flags.set(TxFlags::REQUEST_LINE);
        assert!(flags.has(TxFlags::STARTED));
        assert!(flags.has(TxFlags::REQUEST_LINE));
        assert!(!flags.has(TxFlags::LOGGING));
    }

    #[test]
    fn block_flags_accumulate() {
        let mut block = BlockFlags::default();
        assert!(!block.enforcing());
        block.set(BlockMode::Advisory);
        assert!(block.advisory() && !block.enforcing());
        block.set(BlockMode::Phase);
        assert!(block.phase() && block.enforcing());
        block.set(BlockMode::Immediate);
        assert!(block.advisory() && block.phase() && block.immediate());
    }

    #[test]
    fn transactions_count_on_their_connection() {
        let remote = "198.51.100.7:4321".parse().unwrap();
        let local = "203.0.113.1:80".parse().unwrap();
        let mut conn = Connection::new(9, remote, local);
        let a = Transaction::new(&mut conn, 0);
        let b = Transaction::new(&mut conn, 0);
        assert_eq!((a.id, b.id, conn.tx_count), (1, 2, 2));
        assert_eq!(a.conn_id, 9);
        assert_eq!(a.block_status, DEFAULT_BLOCK_STATUS);
    }
}
