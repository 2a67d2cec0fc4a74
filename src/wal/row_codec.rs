use std::collections::HashMap;

use crate::core::{DatabaseError, DbResult, Value};

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> DbResult<u32> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| DatabaseError::WalCorrupt("truncated u32".to_string()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> DbResult<&'a [u8]> {
    let slice = bytes
        .get(*pos..*pos + len)
        .ok_or_else(|| DatabaseError::WalCorrupt("truncated payload".to_string()))?;
    *pos += len;
    Ok(slice)
}

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_EMBEDDING: u8 = 5;

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            push_u32(buf, s.len() as u32);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Value::Embedding(v) => {
            buf.push(TAG_EMBEDDING);
            push_u32(buf, v.len() as u32);
            for f in v {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
    }
}

fn decode_value(bytes: &[u8], pos: &mut usize) -> DbResult<Value> {
    let tag = *bytes
        .get(*pos)
        .ok_or_else(|| DatabaseError::WalCorrupt("truncated value tag".to_string()))?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_INT => {
            let raw = read_bytes(bytes, pos, 8)?;
            Ok(Value::Int(i64::from_le_bytes(raw.try_into().unwrap())))
        }
        TAG_FLOAT => {
            let raw = read_bytes(bytes, pos, 8)?;
            Ok(Value::Float(f64::from_le_bytes(raw.try_into().unwrap())))
        }
        TAG_TEXT => {
            let len = read_u32(bytes, pos)? as usize;
            let raw = read_bytes(bytes, pos, len)?;
            Ok(Value::Text(
                String::from_utf8(raw.to_vec())
                    .map_err(|e| DatabaseError::WalCorrupt(e.to_string()))?,
            ))
        }
        TAG_BOOL => {
            let raw = read_bytes(bytes, pos, 1)?;
            Ok(Value::Bool(raw[0] != 0))
        }
        TAG_EMBEDDING => {
            let dim = read_u32(bytes, pos)? as usize;
            let mut v = Vec::with_capacity(dim);
            for _ in 0..dim {
                let raw = read_bytes(bytes, pos, 4)?;
                v.push(f32::from_le_bytes(raw.try_into().unwrap()));
            }
            Ok(Value::Embedding(v))
        }
        other => Err(DatabaseError::WalCorrupt(format!("unknown value tag {other}"))),
    }
}

/// `[col_count u32 LE]` then, per column, `[name_len u32][name bytes][type
/// tag u8][value bytes]`. Used both by WAL records and by
/// per-table persistence snapshots.
pub fn encode_row(row: &HashMap<String, Value>) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, row.len() as u32);
    let mut columns: Vec<&String> = row.keys().collect();
    columns.sort();
    for name in columns {
        push_u32(&mut buf, name.len() as u32);
        buf.extend_from_slice(name.as_bytes());
        encode_value(&mut buf, &row[name]);
    }
    buf
}

pub fn decode_row(bytes: &[u8]) -> DbResult<HashMap<String, Value>> {
    let mut pos = 0usize;
    let count = read_u32(bytes, &mut pos)? as usize;
    let mut row = HashMap::with_capacity(count);
    for _ in 0..count {
        let name_len = read_u32(bytes, &mut pos)? as usize;
        let name_bytes = read_bytes(bytes, &mut pos, name_len)?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| DatabaseError::WalCorrupt(e.to_string()))?;
        let value = decode_value(bytes, &mut pos)?;
        row.insert(name, value);
    }
    Ok(row)
}

/// `[old_len u64 LE][old_bytes][new_bytes]`, where `old_bytes`/`new_bytes`
/// are each a full `encode_row` payload for the pre- and post-image of an
/// UPDATE. Carrying the full new row (not just the changed columns) lets
/// replay install it as the row's complete data in one step.
pub fn encode_update_payload(old_row: &HashMap<String, Value>, new_row: &HashMap<String, Value>) -> Vec<u8> {
    let old_bytes = encode_row(old_row);
    let new_bytes = encode_row(new_row);
    let mut buf = Vec::with_capacity(8 + old_bytes.len() + new_bytes.len());
    buf.extend_from_slice(&(old_bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(&old_bytes);
    buf.extend_from_slice(&new_bytes);
    buf
}

pub fn decode_update_payload(
    bytes: &[u8],
) -> DbResult<(HashMap<String, Value>, HashMap<String, Value>)> {
    let mut pos = 0usize;
    let len_bytes = read_bytes(bytes, &mut pos, 8)?;
    let old_len = u64::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    let old_bytes = read_bytes(bytes, &mut pos, old_len)?;
    let old_row = decode_row(old_bytes)?;
    let new_row = decode_row(&bytes[pos..])?;
    Ok((old_row, new_row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_roundtrips_through_all_value_kinds() {
        let mut row = HashMap::new();
        row.insert("a".to_string(), Value::Int(-7));
        row.insert("b".to_string(), Value::Float(1.5));
        row.insert("c".to_string(), Value::Text("hi".to_string()));
        row.insert("d".to_string(), Value::Bool(true));
        row.insert("e".to_string(), Value::Null);
        row.insert("f".to_string(), Value::Embedding(vec![1.0, 2.0, 3.0]));

        let encoded = encode_row(&row);
        let decoded = decode_row(&encoded).unwrap();
        assert_eq!(row, decoded);
    }

    #[test]
    fn update_payload_roundtrips_old_and_new() {
        let mut old_row = HashMap::new();
        old_row.insert("n".to_string(), Value::Int(10));
        let mut new_row = HashMap::new();
        new_row.insert("n".to_string(), Value::Int(20));

        let payload = encode_update_payload(&old_row, &new_row);
        let (decoded_old, decoded_new) = decode_update_payload(&payload).unwrap();
        assert_eq!(decoded_old, old_row);
        assert_eq!(decoded_new, new_row);
    }
}
