// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Built-in transformations.
//!
//! Byte-oriented transformations pass numeric fields through unchanged;
//! `length` is the exception and measures whatever string form the field
//! renders to.

use std::sync::Arc;

use bytes::Bytes;

use crate::field::{Field, FieldValue};
use crate::registry::Registry;
use crate::status::EngineResult;
use crate::tfn::Transformation;

/// Registers every built-in transformation.
pub fn register_builtins(reg: &mut Registry<dyn Transformation>) -> EngineResult<()> {
    reg.register("lowercase", Arc::new(Lowercase))?;
    reg.register("trim", Arc::new(Trim))?;
    reg.register("trim_left", Arc::new(TrimLeft))?;
    reg.register("trim_right", Arc::new(TrimRight))?;
    reg.register("length", Arc::new(Length))?;
    reg.register("compress_whitespace", Arc::new(CompressWhitespace))?;
    reg.register("remove_whitespace", Arc::new(RemoveWhitespace))?;
    reg.register("hex_encode", Arc::new(HexEncode))?;
    Ok(())
}

fn map_bytes(input: &Field, f: impl FnOnce(&[u8]) -> Vec<u8>) -> Option<Field> {
    match &input.value {
        FieldValue::Bytes(b) => Some(Field::bytes(input.name.clone(), f(b))),
        _ => Some(input.clone()),
    }
}

const fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

/// ASCII-lowercases byte strings.
struct Lowercase;

impl Transformation for Lowercase {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| b.to_ascii_lowercase()))
    }
}

/// Strips leading and trailing whitespace.
struct Trim;

impl Transformation for Trim {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| trim_ends(b, true, true)))
    }
}

/// Strips leading whitespace.
struct TrimLeft;

impl Transformation for TrimLeft {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| trim_ends(b, true, false)))
    }
}

/// Strips trailing whitespace.
struct TrimRight;

impl Transformation for TrimRight {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| trim_ends(b, false, true)))
    }
}

fn trim_ends(bytes: &[u8], left: bool, right: bool) -> Vec<u8> {
    let mut start = 0;
    let mut end = bytes.len();
    if left {
        while start < end && is_ws(bytes[start]) {
            start += 1;
        }
    }
    if right {
        while end > start && is_ws(bytes[end - 1]) {
            end -= 1;
        }
    }
    bytes[start..end].to_vec()
}

/// Replaces the field with the byte length of its string form.
struct Length;

impl Transformation for Length {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        let len = i64::try_from(input.render().len()).unwrap_or(i64::MAX);
        Ok(Some(Field::num(input.name.clone(), len)))
    }
}

/// Collapses each whitespace run into a single space.
struct CompressWhitespace;

impl Transformation for CompressWhitespace {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| {
            let mut out = Vec::with_capacity(b.len());
            let mut in_run = false;
            for &byte in b {
                if is_ws(byte) {
                    if !in_run {
                        out.push(b' ');
                        in_run = true;
                    }
                } else {
                    out.push(byte);
                    in_run = false;
                }
            }
            out
        }))
    }
}

/// Removes all whitespace.
struct RemoveWhitespace;

impl Transformation for RemoveWhitespace {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        Ok(map_bytes(input, |b| {
            b.iter().copied().filter(|&byte| !is_ws(byte)).collect()
        }))
    }
}

/// Hex-encodes byte strings (lowercase digits).
struct HexEncode;

impl Transformation for HexEncode {
    fn apply(&self, input: &Field) -> EngineResult<Option<Field>> {
        match &input.value {
            FieldValue::Bytes(b) => Ok(Some(Field::bytes(
                input.name.clone(),
                Bytes::from(hex::encode(b)),
            ))),
            _ => Ok(Some(input.clone())),
        }
    }
}
