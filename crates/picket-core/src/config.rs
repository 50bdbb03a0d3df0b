// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Configuration documents.
//!
//! A rules document is plain JSON deserialized with serde into the draft
//! model; there is no bespoke grammar. `engine_create` on the manager loads
//! one document per engine.

use std::path::Path;

use serde::Deserialize;

use crate::engine::{ActionDraft, Engine, OperatorDraft, RuleDraft, TargetDraft};
use crate::phase::Phase;
use crate::rule::RuleMeta;
use crate::status::{EngineError, EngineResult};

/// Top-level rules document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesDoc {
    /// Child contexts to create before rules load.
    #[serde(default)]
    pub contexts: Vec<ContextSpec>,
    /// Rules, in registration order.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A child configuration context.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSpec {
    /// Context name.
    pub name: String,
    /// Parent context name; defaults to the main context.
    #[serde(default)]
    pub parent: Option<String>,
    /// Enable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One declarative rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Unique rule id within its context.
    pub id: String,
    /// Revision; higher revisions replace lower ones.
    #[serde(default = "default_revision")]
    pub revision: u32,
    /// Phase the rule runs in.
    pub phase: Phase,
    /// Context name; defaults to the main context.
    #[serde(default)]
    pub context: Option<String>,
    /// Chain grouping id.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// The next rule with this chain id continues this one.
    #[serde(default)]
    pub chain_to_next: bool,
    /// This rule continues a chain.
    #[serde(default)]
    pub in_chain: bool,
    /// Evaluate the operator without a target.
    #[serde(default)]
    pub external: bool,
    /// Enable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Message for audit events.
    #[serde(default)]
    pub msg: Option<String>,
    /// Severity 0..=9.
    #[serde(default)]
    pub severity: u8,
    /// Confidence 0..=9.
    #[serde(default)]
    pub confidence: u8,
    /// Tags for audit events.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Targets walked in order.
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    /// The operator.
    pub operator: OperatorSpec,
    /// Actions on a truthy result.
    #[serde(default)]
    pub true_actions: Vec<ActionSpec>,
    /// Actions on a falsy result.
    #[serde(default)]
    pub false_actions: Vec<ActionSpec>,
}

/// A rule target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    /// Field name to fetch from the data store.
    pub name: String,
    /// Transformation names, applied in order.
    #[serde(default)]
    pub tfns: Vec<String>,
}

/// An operator reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorSpec {
    /// Registered operator name.
    pub name: String,
    /// Textual parameter.
    #[serde(default)]
    pub param: String,
    /// Negate the result.
    #[serde(default)]
    pub invert: bool,
    /// Expand the parameter at evaluation time.
    #[serde(default)]
    pub expand: bool,
    /// Write the capture list on truthy results.
    #[serde(default)]
    pub capture: bool,
}

/// An action reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    /// Registered action name.
    pub name: String,
    /// Textual parameter.
    #[serde(default)]
    pub param: String,
}

const fn default_true() -> bool {
    true
}

const fn default_revision() -> u32 {
    1
}

/// Parses a rules document from JSON bytes.
///
/// # Errors
/// `BadValue` when the document does not deserialize.
pub fn parse(bytes: &[u8]) -> EngineResult<RulesDoc> {
    serde_json::from_slice(bytes)
        .map_err(|err| EngineError::BadValue(format!("rules document: {err}")))
}

/// Loads a rules document into a configuring engine.
pub fn load(engine: &mut Engine, doc: &RulesDoc) -> EngineResult<()> {
    for context in &doc.contexts {
        let parent = match &context.parent {
            Some(name) => engine
                .context_by_name(name)
                .ok_or_else(|| EngineError::NotFound(format!("context {name}")))?,
            None => engine.main_context(),
        };
        let idx = engine.context_create(&context.name, parent)?;
        engine.context_set_enabled(idx, context.enabled)?;
    }
    for rule in &doc.rules {
        let ctx = match &rule.context {
            Some(name) => engine
                .context_by_name(name)
                .ok_or_else(|| EngineError::NotFound(format!("context {name}")))?,
            None => engine.main_context(),
        };
        engine.rule_register(ctx, draft_from(rule))?;
    }
    Ok(())
}

/// Reads and loads a rules document from `path`.
pub fn load_file(engine: &mut Engine, path: &Path) -> EngineResult<()> {
    let bytes = std::fs::read(path)
        .map_err(|err| EngineError::Other(format!("{}: {err}", path.display())))?;
    let doc = parse(&bytes)?;
    load(engine, &doc)
}

fn draft_from(spec: &RuleSpec) -> RuleDraft {
    RuleDraft {
        id: spec.id.clone(),
        revision: spec.revision,
        phase: spec.phase,
        chain_id: spec.chain_id.clone(),
        chain_to_next: spec.chain_to_next,
        in_chain: spec.in_chain,
        external: spec.external,
        enabled: spec.enabled,
        meta: RuleMeta {
            severity: spec.severity,
            confidence: spec.confidence,
            tags: spec.tags.clone(),
            message: spec.msg.clone(),
            file: None,
            line: 0,
        },
        targets: spec
            .targets
            .iter()
            .map(|t| TargetDraft {
                name: t.name.clone(),
                tfns: t.tfns.clone(),
            })
            .collect(),
        operator: OperatorDraft {
            name: spec.operator.name.clone(),
            param: spec.operator.param.clone(),
            invert: spec.operator.invert,
            expand: spec.operator.expand,
            capture: spec.operator.capture,
        },
        true_actions: spec
            .true_actions
            .iter()
            .map(|a| ActionDraft {
                name: a.name.clone(),
                param: a.param.clone(),
            })
            .collect(),
        false_actions: spec
            .false_actions
            .iter()
            .map(|a| ActionDraft {
                name: a.name.clone(),
                param: a.param.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "contexts": [{"name": "admin", "enabled": true}],
        "rules": [
            {
                "id": "r1",
                "phase": "request_header",
                "msg": "probe",
                "targets": [{"name": "REQUEST_URI", "tfns": ["lowercase"]}],
                "operator": {"name": "contains", "param": "/admin"},
                "true_actions": [{"name": "event", "param": ""}]
            }
        ]
    }"#;

    #[test]
    fn documents_parse_and_load() {
        let doc = parse(DOC.as_bytes()).unwrap();
        assert_eq!(doc.rules.len(), 1);

        let mut engine = Engine::builder().build().unwrap();
        load(&mut engine, &doc).unwrap();
        assert!(engine.context_by_name("admin").is_some());
        let main = engine.main_context();
        assert!(engine.context(main).rules.by_id("r1").is_some());
    }

    #[test]
    fn documents_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, DOC).unwrap();

        let mut engine = Engine::builder().build().unwrap();
        load_file(&mut engine, &path).unwrap();
        let main = engine.main_context();
        assert_eq!(engine.context(main).rules.len(), 1);

        assert!(matches!(
            load_file(&mut engine, &dir.path().join("missing.json")),
            Err(EngineError::Other(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            parse(br#"{"rules": [], "surprise": 1}"#),
            Err(EngineError::BadValue(_))
        ));
    }

    #[test]
    fn unknown_context_reference_fails() {
        let doc = parse(
            br#"{"rules": [{"id": "x", "phase": "request_header", "context": "ghost",
                 "targets": [{"name": "A"}], "operator": {"name": "exists"}}]}"#,
        )
        .unwrap();
        let mut engine = Engine::builder().build().unwrap();
        assert!(matches!(
            load(&mut engine, &doc),
            Err(EngineError::NotFound(_))
        ));
    }
}
