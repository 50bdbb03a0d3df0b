// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Built-in actions.
//!
//! `severity`, `confidence`, `tag`, `msg`, and `capture` are metadata
//! actions: their parameters bind into the rule at registration and their
//! execute step is a no-op. They still compile through the registry so that
//! malformed parameters fail at configuration time.

use std::sync::Arc;

use tracing::debug;

use crate::action::{Action, ActionCx, CompiledAction};
use crate::data::EXPAND_LIMIT;
use crate::events::AuditEvent;
use crate::field::Field;
use crate::host::{HeaderDirection, HeaderOp};
use crate::registry::Registry;
use crate::status::{EngineError, EngineResult, Outcome};
use crate::tx::{BlockMode, Transaction};

/// Registers every built-in action.
pub fn register_builtins(reg: &mut Registry<dyn Action>) -> EngineResult<()> {
    reg.register("block", Arc::new(Block))?;
    reg.register("setvar", Arc::new(SetVar))?;
    reg.register("event", Arc::new(Event))?;
    reg.register("capture", Arc::new(Capture))?;
    reg.register("severity", Arc::new(Grade { name: "severity" }))?;
    reg.register("confidence", Arc::new(Grade { name: "confidence" }))?;
    reg.register("tag", Arc::new(Tag))?;
    reg.register("msg", Arc::new(Msg))?;
    reg.register("set_header", Arc::new(SetHeader))?;
    Ok(())
}

/// Requests blocking. Parameter: `advisory`, `phase`, or `immediate`,
/// optionally followed by `=<status>` to pick the error status code.
struct Block;

struct BlockInstance {
    mode: BlockMode,
    status: Option<u16>,
}

impl Action for Block {
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        let (mode, status) = match param.split_once('=') {
            Some((mode, status)) => {
                let code = status.trim().parse::<u16>().map_err(|_| {
                    EngineError::BadValue(format!("block: bad status code: {status}"))
                })?;
                (mode, Some(code))
            }
            None => (param, None),
        };
        let mode = match mode.trim() {
            "advisory" => BlockMode::Advisory,
            "" | "phase" => BlockMode::Phase,
            "immediate" => BlockMode::Immediate,
            other => {
                return Err(EngineError::BadValue(format!("block: unknown mode: {other}")));
            }
        };
        Ok(Box::new(BlockInstance { mode, status }))
    }
}

impl CompiledAction for BlockInstance {
    fn execute(&self, _cx: &ActionCx<'_>, tx: &mut Transaction) -> EngineResult {
        tx.request_block(self.mode);
        if let Some(status) = self.status {
            tx.block_status = status;
        }
        Ok(Outcome::Declined)
    }
}

/// Sets a data-store variable. Parameter: `NAME=value`; the value undergoes
/// `%{NAME}` expansion at execution time and is stored as a number when it
/// parses as one.
struct SetVar;

struct SetVarInstance {
    name: String,
    template: Vec<u8>,
}

impl Action for SetVar {
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        let Some((name, value)) = param.split_once('=') else {
            return Err(EngineError::BadValue(format!("setvar: missing '=': {param}")));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::BadValue("setvar: empty name".to_owned()));
        }
        Ok(Box::new(SetVarInstance {
            name: name.to_owned(),
            template: value.as_bytes().to_vec(),
        }))
    }
}

impl CompiledAction for SetVarInstance {
    fn execute(&self, _cx: &ActionCx<'_>, tx: &mut Transaction) -> EngineResult {
        let value = tx.data.expand(&self.template, EXPAND_LIMIT)?;
        let field = std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map_or_else(
                || Field::bytes(self.name.clone(), value.clone()),
                |n| Field::num(self.name.clone(), n),
            );
        tx.data.set(field);
        Ok(Outcome::Ok)
    }
}

/// Records a structured audit event for the firing rule.
struct Event;

struct EventInstance;

impl Action for Event {
    fn compile(&self, _param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        Ok(Box::new(EventInstance))
    }
}

impl CompiledAction for EventInstance {
    fn execute(&self, cx: &ActionCx<'_>, tx: &mut Transaction) -> EngineResult {
        tx.events.push(AuditEvent {
            rule_id: cx.rule_id.to_owned(),
            message: cx
                .meta
                .message
                .clone()
                .unwrap_or_else(|| cx.rule_id.to_owned()),
            severity: cx.meta.severity,
            confidence: cx.meta.confidence,
            tags: cx.meta.tags.clone(),
            phase: cx.phase,
        });
        Ok(Outcome::Ok)
    }
}

/// Metadata action: enables capture for the rule, optionally naming the
/// capture prefix. Bound at registration; execution is a no-op.
struct Capture;

struct MetadataInstance;

impl Action for Capture {
    fn compile(&self, _param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        Ok(Box::new(MetadataInstance))
    }
}

impl CompiledAction for MetadataInstance {
    fn execute(&self, _cx: &ActionCx<'_>, _tx: &mut Transaction) -> EngineResult {
        Ok(Outcome::Ok)
    }
}

/// Metadata action: `severity:n` / `confidence:n`, n in 0..=9.
struct Grade {
    name: &'static str,
}

impl Action for Grade {
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        parse_grade(self.name, param)?;
        Ok(Box::new(MetadataInstance))
    }
}

/// Parses a 0..=9 grade parameter.
pub(crate) fn parse_grade(name: &str, param: &str) -> EngineResult<u8> {
    param
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|n| *n <= 9)
        .ok_or_else(|| EngineError::BadValue(format!("{name}: expected 0..=9, got {param}")))
}

/// Metadata action: attaches a tag to the rule.
struct Tag;

impl Action for Tag {
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        if param.trim().is_empty() {
            return Err(EngineError::BadValue("tag: empty tag".to_owned()));
        }
        Ok(Box::new(MetadataInstance))
    }
}

/// Metadata action: sets the rule's message.
struct Msg;

impl Action for Msg {
    fn compile(&self, _param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        Ok(Box::new(MetadataInstance))
    }
}

/// Edits a header through the host contract. Parameter:
/// `request:Name=value` or `response:Name=value`; the value undergoes
/// expansion at execution time.
///
/// A host that has already committed the direction's headers declines the
/// edit; that is logged, not treated as a block request.
struct SetHeader;

struct SetHeaderInstance {
    direction: HeaderDirection,
    name: String,
    template: Vec<u8>,
}

impl Action for SetHeader {
    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledAction>> {
        let Some((direction, rest)) = param.split_once(':') else {
            return Err(EngineError::BadValue(format!(
                "set_header: missing direction: {param}"
            )));
        };
        let direction = match direction.trim() {
            "request" => HeaderDirection::Request,
            "response" => HeaderDirection::Response,
            other => {
                return Err(EngineError::BadValue(format!(
                    "set_header: unknown direction: {other}"
                )));
            }
        };
        let Some((name, value)) = rest.split_once('=') else {
            return Err(EngineError::BadValue(format!(
                "set_header: missing '=': {param}"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::BadValue("set_header: empty name".to_owned()));
        }
        Ok(Box::new(SetHeaderInstance {
            direction,
            name: name.to_owned(),
            template: value.as_bytes().to_vec(),
        }))
    }
}

impl CompiledAction for SetHeaderInstance {
    fn execute(&self, cx: &ActionCx<'_>, tx: &mut Transaction) -> EngineResult {
        let value = tx.data.expand(&self.template, EXPAND_LIMIT)?;
        match cx
            .host
            .edit_header(tx, self.direction, HeaderOp::Set, &self.name, &value)?
        {
            Outcome::Ok => {}
            Outcome::Declined => {
                debug!(
                    rule_id = cx.rule_id,
                    header = %self.name,
                    "host declined the header edit (already committed)"
                );
            }
        }
        Ok(Outcome::Ok)
    }
}
