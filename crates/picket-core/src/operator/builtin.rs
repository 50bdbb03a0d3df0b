// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Built-in operators.

use std::sync::Arc;

use bytes::Bytes;
use regex::bytes::Regex;

use crate::data::EXPAND_LIMIT;
use crate::field::{Field, FieldValue};
use crate::operator::{CompiledOperator, EvalCx, Operator, OperatorCaps, OperatorOutcome};
use crate::registry::Registry;
use crate::status::{EngineError, EngineResult};

/// Registers every built-in operator.
pub fn register_builtins(reg: &mut Registry<dyn Operator>) -> EngineResult<()> {
    reg.register("streq", Arc::new(Streq))?;
    reg.register("contains", Arc::new(Contains))?;
    reg.register("rx", Arc::new(Rx))?;
    reg.register("eq", Arc::new(NumCmp::new("eq", |a, b| a == b)))?;
    reg.register("ne", Arc::new(NumCmp::new("ne", |a, b| a != b)))?;
    reg.register("gt", Arc::new(NumCmp::new("gt", |a, b| a > b)))?;
    reg.register("lt", Arc::new(NumCmp::new("lt", |a, b| a < b)))?;
    reg.register("exists", Arc::new(Exists))?;
    reg.register("false", Arc::new(AlwaysFalse))?;
    Ok(())
}

/// String form of an input field for byte-wise comparison operators.
fn input_bytes(input: &Field) -> Bytes {
    input.render()
}

/// Resolves the comparison parameter, expanding `%{NAME}` tokens when the
/// rule asked for evaluation-time expansion.
fn resolve_param(cx: &EvalCx<'_>, raw: &Bytes) -> EngineResult<Bytes> {
    if cx.expand {
        cx.tx.data.expand(raw, EXPAND_LIMIT)
    } else {
        Ok(raw.clone())
    }
}

/// Byte-exact string equality.
struct Streq;

struct StreqInstance {
    param: Bytes,
}

impl Operator for Streq {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        Ok(Box::new(StreqInstance {
            param: Bytes::from(param.to_owned()),
        }))
    }
}

impl CompiledOperator for StreqInstance {
    fn eval(&self, cx: &EvalCx<'_>, input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        let Some(input) = input else {
            return Ok(OperatorOutcome::falsy());
        };
        let want = resolve_param(cx, &self.param)?;
        if input_bytes(input) == want {
            Ok(OperatorOutcome::truthy())
        } else {
            Ok(OperatorOutcome::falsy())
        }
    }
}

/// Byte substring search.
struct Contains;

struct ContainsInstance {
    param: Bytes,
}

impl Operator for Contains {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        Ok(Box::new(ContainsInstance {
            param: Bytes::from(param.to_owned()),
        }))
    }
}

impl CompiledOperator for ContainsInstance {
    fn eval(&self, cx: &EvalCx<'_>, input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        let Some(input) = input else {
            return Ok(OperatorOutcome::falsy());
        };
        let needle = resolve_param(cx, &self.param)?;
        let hay = input_bytes(input);
        let found = !needle.is_empty()
            && hay
                .windows(needle.len())
                .any(|window| window == needle.as_ref());
        Ok(if found || needle.is_empty() {
            OperatorOutcome::truthy()
        } else {
            OperatorOutcome::falsy()
        })
    }
}

/// Regular-expression match with capture groups.
///
/// On match the capture list holds group 0 (the whole match) followed by
/// the numbered groups; unmatched groups capture empty bytes.
struct Rx;

struct RxInstance {
    re: Regex,
}

impl Operator for Rx {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            capture: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        let re = Regex::new(param)
            .map_err(|err| EngineError::BadValue(format!("rx pattern: {err}")))?;
        Ok(Box::new(RxInstance { re }))
    }
}

impl CompiledOperator for RxInstance {
    fn eval(&self, _cx: &EvalCx<'_>, input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        let Some(input) = input else {
            return Ok(OperatorOutcome::falsy());
        };
        let hay = input_bytes(input);
        let Some(caps) = self.re.captures(&hay) else {
            return Ok(OperatorOutcome::falsy());
        };
        let capture = (0..caps.len())
            .map(|i| {
                caps.get(i)
                    .map(|m| Bytes::copy_from_slice(m.as_bytes()))
                    .unwrap_or_default()
            })
            .collect();
        Ok(OperatorOutcome {
            result: 1,
            capture: Some(capture),
        })
    }
}

/// Numeric comparison against the compiled parameter.
struct NumCmp {
    name: &'static str,
    cmp: fn(i64, i64) -> bool,
}

struct NumCmpInstance {
    name: &'static str,
    cmp: fn(i64, i64) -> bool,
    rhs: i64,
}

impl NumCmp {
    const fn new(name: &'static str, cmp: fn(i64, i64) -> bool) -> Self {
        Self { name, cmp }
    }
}

impl Operator for NumCmp {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        let rhs = param
            .trim()
            .parse()
            .map_err(|_| EngineError::BadValue(format!("{}: not a number: {param}", self.name)))?;
        Ok(Box::new(NumCmpInstance {
            name: self.name,
            cmp: self.cmp,
            rhs,
        }))
    }
}

impl CompiledOperator for NumCmpInstance {
    fn eval(&self, _cx: &EvalCx<'_>, input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        let Some(input) = input else {
            return Ok(OperatorOutcome::falsy());
        };
        let lhs = match &input.value {
            FieldValue::Num(n) => *n,
            FieldValue::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    EngineError::BadValue(format!("{}: input is not numeric", self.name))
                })?,
            _ => {
                return Err(EngineError::BadValue(format!(
                    "{}: input is not numeric",
                    self.name
                )))
            }
        };
        Ok(if (self.cmp)(lhs, self.rhs) {
            OperatorOutcome::truthy()
        } else {
            OperatorOutcome::falsy()
        })
    }
}

/// True when the target field exists.
struct Exists;

struct ExistsInstance;

impl Operator for Exists {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            allow_null: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, _param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        Ok(Box::new(ExistsInstance))
    }
}

impl CompiledOperator for ExistsInstance {
    fn eval(&self, _cx: &EvalCx<'_>, input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        Ok(if input.is_some() {
            OperatorOutcome::truthy()
        } else {
            OperatorOutcome::falsy()
        })
    }
}

/// Always falsy; useful for exercising false-branch actions.
struct AlwaysFalse;

struct AlwaysFalseInstance;

impl Operator for AlwaysFalse {
    fn caps(&self) -> OperatorCaps {
        OperatorCaps {
            phase: true,
            stream: true,
            allow_null: true,
            ..OperatorCaps::default()
        }
    }

    fn compile(&self, _param: &str) -> EngineResult<Box<dyn CompiledOperator>> {
        Ok(Box::new(AlwaysFalseInstance))
    }
}

impl CompiledOperator for AlwaysFalseInstance {
    fn eval(&self, _cx: &EvalCx<'_>, _input: Option<&Field>) -> EngineResult<OperatorOutcome> {
        Ok(OperatorOutcome::falsy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;

    fn eval(op: &dyn Operator, param: &str, input: Option<&Field>) -> OperatorOutcome {
        let tx = Transaction::for_tests();
        let cx = EvalCx { tx: &tx, expand: false };
        op.compile(param).unwrap().eval(&cx, input).unwrap()
    }

    #[test]
    fn streq_is_byte_exact() {
        let f = Field::bytes("X", "hi");
        assert!(eval(&Streq, "hi", Some(&f)).is_truthy());
        assert!(!eval(&Streq, "Hi", Some(&f)).is_truthy());
        assert!(!eval(&Streq, "hi", None).is_truthy());
    }

    #[test]
    fn contains_finds_substrings() {
        let f = Field::bytes("X", "hello world");
        assert!(eval(&Contains, "lo wo", Some(&f)).is_truthy());
        assert!(!eval(&Contains, "xyz", Some(&f)).is_truthy());
    }

    #[test]
    fn rx_captures_whole_match_then_groups() {
        let f = Field::bytes("X", "string 2");
        let out = eval(&Rx, "(string 2)", Some(&f));
        assert!(out.is_truthy());
        let caps = out.capture.unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0], "string 2");
        assert_eq!(caps[1], "string 2");
    }

    #[test]
    fn rx_rejects_bad_patterns_at_compile() {
        assert!(matches!(
            Rx.compile("("),
            Err(EngineError::BadValue(_))
        ));
    }

    #[test]
    fn numeric_comparisons_parse_byte_inputs() {
        let f = Field::bytes("X", " 42 ");
        assert!(eval(&NumCmp::new("eq", |a, b| a == b), "42", Some(&f)).is_truthy());
        assert!(eval(&NumCmp::new("gt", |a, b| a > b), "41", Some(&f)).is_truthy());
        assert!(!eval(&NumCmp::new("lt", |a, b| a < b), "42", Some(&f)).is_truthy());
    }

    #[test]
    fn exists_allows_null() {
        assert!(Exists.caps().allow_null);
        assert!(!eval(&Exists, "", None).is_truthy());
        assert!(eval(&Exists, "", Some(&Field::num("X", 0))).is_truthy());
    }

    #[test]
    fn expansion_resolves_parameter_against_the_store() {
        let mut tx = Transaction::for_tests();
        tx.data.set(Field::bytes("WANT", "hi"));
        let cx = EvalCx { tx: &tx, expand: true };
        let op = Streq.compile("%{WANT}").unwrap();
        let truthy = op.eval(&cx, Some(&Field::bytes("X", "hi"))).unwrap();
        assert!(truthy.is_truthy());
    }
}
