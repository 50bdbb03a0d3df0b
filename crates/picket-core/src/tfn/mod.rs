// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Transformations: named pure functions from field to field.

pub mod builtin;

use std::sync::Arc;

use crate::field::{Field, FieldValue};
use crate::status::{EngineError, EngineResult};

/// A named pure function over fields.
///
/// Implementations must not mutate their input and must not observe the
/// transaction; the same input always yields the same output. Returning
/// `None` means the transformation produced no value ("null"); the rule
/// engine treats a null output for a non-null input as a rule-level error.
pub trait Transformation: Send + Sync {
    /// Applies the transformation to one (non-list) field.
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>>;
}

/// A transformation resolved from the registry at rule registration.
#[derive(Clone)]
pub struct TfnRef {
    /// Registered name, as written in the rule.
    pub name: String,
    pub(crate) tfn: Arc<dyn Transformation>,
}

impl core::fmt::Debug for TfnRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TfnRef").field("name", &self.name).finish()
    }
}

/// Applies one transformation, recursing into list elements.
///
/// A list input maps element-wise; element order is preserved. An element
/// (or scalar) for which the transformation yields null is a `BadValue`
/// error, surfaced to the caller so the rule can be aborted.
pub fn apply_one(tfn: &TfnRef, input: &Field) -> EngineResult<Field> {
    if let FieldValue::List(items) = &input.value {
        let mapped = items
            .iter()
            .map(|item| apply_one(tfn, item))
            .collect::<EngineResult<Vec<_>>>()?;
        return Ok(Field::list(input.name.clone(), mapped));
    }
    match tfn.tfn.apply(input)? {
        Some(out) => Ok(out),
        None => Err(EngineError::BadValue(format!(
            "transformation {} returned null for non-null input",
            tfn.name
        ))),
    }
}

/// Applies a pipeline left-to-right; each output feeds the next input.
pub fn apply_pipeline(tfns: &[TfnRef], input: Field) -> EngineResult<Field> {
    let mut current = input;
    for tfn in tfns {
        current = apply_one(tfn, &current)?;
    }
    Ok(current)
}
