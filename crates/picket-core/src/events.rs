// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Structured audit events.
//!
//! Events are accumulated on the transaction by the `event` action and
//! emitted through `tracing` once, during the `Logging` state. Emission is
//! best-effort; the engine never fails a transaction over logging.

use tracing::info;

use crate::phase::Phase;

/// One audit event recorded by a firing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Id of the rule that fired.
    pub rule_id: String,
    /// Human-readable message (the rule's `msg`, or its id).
    pub message: String,
    /// Severity 0..=9.
    pub severity: u8,
    /// Confidence 0..=9.
    pub confidence: u8,
    /// Tags attached to the rule.
    pub tags: Vec<String>,
    /// Phase in which the rule fired.
    pub phase: Phase,
}

impl AuditEvent {
    /// Emits the event to the audit log.
    pub fn emit(&self, tx_id: u64) {
        info!(
            target: "picket::audit",
            tx_id,
            rule_id = %self.rule_id,
            phase = %self.phase,
            severity = self.severity,
            confidence = self.confidence,
            tags = ?self.tags,
            "{}",
            self.message
        );
    }
}
