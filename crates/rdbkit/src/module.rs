//! Module-2 record payloads.
//!
//! A module self-identifies through a 64-bit id: the top 54 bits encode a
//! nine-character name over `[A-Z][a-z][0-9]-_` (6 bits per character, most
//! significant first), the low 10 bits the module version. The only module
//! decoded is the JSON module; every other payload is either skipped by
//! obeying the module opcode loop or rejected by name.

use serde_json::Value;

use crate::buffer::Buffer;
use crate::constants::*;
use crate::error::{Result, SnapshotError};
use crate::reader::ValueReader;

const NAME_CHARSET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Reconstructs a module's nine-character name from its id.
pub(crate) fn module_name(id: u64) -> String {
    let mut id = id >> 10;
    let mut name = [0u8; 9];
    for slot in name.iter_mut().rev() {
        *slot = NAME_CHARSET[(id & 0x3F) as usize];
        id >>= 6;
    }

    // The charset is pure ASCII, so this cannot fail.
    String::from_utf8_lossy(&name).into_owned()
}

/// Reads a module-2 record body: the module id, then the module's own
/// payload, terminated by the module EOF opcode.
pub(crate) fn read_module2<B: Buffer>(
    r: &mut ValueReader<B>,
    skip_unsupported: bool,
) -> Result<(String, ModuleMarker)> {
    let (id, _) = r.read_len()?;
    let version = id & 0x3FF;

    if id & !0x3FF == JSON_MODULE_ID {
        let value = read_json(r, version)?;
        read_module_eof(r)?;
        return Ok((value, ModuleMarker::Json));
    }

    if skip_unsupported {
        skip_module(r)?;
        return Ok((String::new(), ModuleMarker::Empty));
    }

    Err(SnapshotError::UnsupportedModule(module_name(id)))
}

/// Consumes an unknown module payload by following the opcode loop until
/// the module EOF. Also used for module-aux envelope sections.
pub(crate) fn skip_module<B: Buffer>(r: &mut ValueReader<B>) -> Result<()> {
    loop {
        let (opcode, _) = r.read_len()?;
        match opcode {
            MODULE_OP_EOF => return Ok(()),
            MODULE_OP_SINT | MODULE_OP_UINT => {
                r.read_len()?;
            }
            MODULE_OP_FLOAT => r.skip(4)?,
            MODULE_OP_DOUBLE => r.skip(8)?,
            MODULE_OP_STRING => {
                r.read_string()?;
            }
            _ => return Err(SnapshotError::Malformed("unexpected module opcode")),
        }
    }
}

fn read_json<B: Buffer>(r: &mut ValueReader<B>, version: u64) -> Result<String> {
    match version {
        JSON_MODULE_V0 => read_v0_root(r),
        // The module version jumped straight from 0 to 3 when it was
        // rewritten; no release ever shipped versions 1 or 2.
        JSON_MODULE_V3 => read_module_string(r),
        _ => Err(SnapshotError::Unsupported("unexpected JSON module version")),
    }
}

fn read_module_eof<B: Buffer>(r: &mut ValueReader<B>) -> Result<()> {
    let (opcode, _) = r.read_len()?;
    if opcode != MODULE_OP_EOF {
        return Err(SnapshotError::Malformed("module not terminated with EOF"));
    }
    Ok(())
}

fn read_module_u64<B: Buffer>(r: &mut ValueReader<B>) -> Result<u64> {
    let (opcode, _) = r.read_len()?;
    if opcode != MODULE_OP_UINT {
        return Err(SnapshotError::Malformed("unexpected module opcode"));
    }
    Ok(r.read_len()?.0)
}

// The writer uses the unsigned opcode even for signed integers.
fn read_module_i64<B: Buffer>(r: &mut ValueReader<B>) -> Result<i64> {
    Ok(read_module_u64(r)? as i64)
}

fn read_module_f64<B: Buffer>(r: &mut ValueReader<B>) -> Result<f64> {
    let (opcode, _) = r.read_len()?;
    if opcode != MODULE_OP_DOUBLE {
        return Err(SnapshotError::Malformed("unexpected module opcode"));
    }
    Ok(f64::from_bits(r.read_u64_le()?))
}

fn read_module_string<B: Buffer>(r: &mut ValueReader<B>) -> Result<String> {
    let (opcode, _) = r.read_len()?;
    if opcode != MODULE_OP_STRING {
        return Err(SnapshotError::Malformed("unexpected module opcode"));
    }

    String::from_utf8(r.read_string()?)
        .map_err(|_| SnapshotError::Malformed("module string is not valid UTF-8"))
}

/// Reads a version-0 JSON tree root and renders it as canonical text.
/// Top-level primitives render bare; containers serialize compactly.
fn read_v0_root<B: Buffer>(r: &mut ValueReader<B>) -> Result<String> {
    let node = read_module_u64(r)?;

    Ok(match node {
        JSON_V0_NODE_NULL => "null".to_string(),
        JSON_V0_NODE_STRING => read_module_string(r)?,
        JSON_V0_NODE_NUMBER => read_module_f64(r)?.to_string(),
        JSON_V0_NODE_INTEGER => read_module_i64(r)?.to_string(),
        JSON_V0_NODE_BOOLEAN => {
            if read_v0_bool(r)? {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        JSON_V0_NODE_DICT => serde_json::to_string(&read_v0_dict(r)?)
            .map_err(|_| SnapshotError::Malformed("unable to render JSON module content"))?,
        JSON_V0_NODE_ARRAY => serde_json::to_string(&read_v0_array(r)?)
            .map_err(|_| SnapshotError::Malformed("unable to render JSON module content"))?,
        _ => return Err(SnapshotError::Malformed("unexpected JSON node type")),
    })
}

fn read_v0_value<B: Buffer>(r: &mut ValueReader<B>) -> Result<Value> {
    let node = read_module_u64(r)?;

    Ok(match node {
        JSON_V0_NODE_NULL => Value::Null,
        JSON_V0_NODE_STRING => Value::String(read_module_string(r)?),
        JSON_V0_NODE_NUMBER => {
            // JSON cannot carry non-finite numbers; they degrade to null.
            serde_json::Number::from_f64(read_module_f64(r)?)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        JSON_V0_NODE_INTEGER => Value::Number(read_module_i64(r)?.into()),
        JSON_V0_NODE_BOOLEAN => Value::Bool(read_v0_bool(r)?),
        JSON_V0_NODE_DICT => Value::Object(read_v0_dict(r)?),
        JSON_V0_NODE_ARRAY => Value::Array(read_v0_array(r)?),
        _ => return Err(SnapshotError::Malformed("unexpected JSON node type")),
    })
}

// Booleans travel as the strings "1" and "0".
fn read_v0_bool<B: Buffer>(r: &mut ValueReader<B>) -> Result<bool> {
    Ok(read_module_string(r)? == "1")
}

fn read_v0_dict<B: Buffer>(r: &mut ValueReader<B>) -> Result<serde_json::Map<String, Value>> {
    let length = read_module_u64(r)?;

    let mut dict = serde_json::Map::new();
    for _ in 0..length {
        let inner = read_module_u64(r)?;
        if inner != JSON_V0_NODE_KEYVAL {
            return Err(SnapshotError::Malformed("unexpected JSON inner node type"));
        }

        let key = read_module_string(r)?;
        let value = read_v0_value(r)?;
        dict.insert(key, value);
    }

    Ok(dict)
}

fn read_v0_array<B: Buffer>(r: &mut ValueReader<B>) -> Result<Vec<Value>> {
    let length = read_module_u64(r)?;

    let mut array = Vec::new();
    for _ in 0..length {
        array.push(read_v0_value(r)?);
    }

    Ok(array)
}
