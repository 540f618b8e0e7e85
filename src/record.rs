use crate::err::{Error, Result};
use crate::util;
use crate::value::{DataType, Value};
use log::warn;
use serde::{Deserialize, Serialize};

/// Bytes reserved at the front of every record for the row id:
/// one length byte then up to RID_FIELD-1 ASCII bytes, zero padded.
pub const RID_FIELD: usize = 24;

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub typ: DataType,
}

impl Column {
    pub fn new(name: &str, typ: DataType) -> Column {
        Column {
            name: name.to_string(),
            typ,
        }
    }
}

/// Ordered list of columns for one table. Written once into the file
/// header and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(table: &str, columns: Vec<Column>) -> Schema {
        Schema {
            table: table.to_string(),
            columns,
        }
    }

    /// Encoded size of one record: rid field plus every column.
    pub fn record_size(&self) -> usize {
        RID_FIELD + self.columns.iter().map(|c| c.typ.size()).sum::<usize>()
    }

    /// Find a column and its byte offset within a record.
    pub fn col(&self, name: &str) -> Option<(usize, &Column)> {
        let mut off = RID_FIELD;
        for c in &self.columns {
            if c.name == name {
                return Some((off, c));
            }
            off += c.typ.size();
        }
        None
    }

    /// Column lookup that reports the table name on failure.
    pub fn col_required(&self, name: &str) -> Result<&Column> {
        self.col(name)
            .map(|(_, c)| c)
            .ok_or_else(|| Error::SchemaMismatch(format!("no column {} in {}", name, self.table)))
    }
}

/// A row: stable identifier plus column name -> value in schema order.
/// The identifier survives updates; joined rows concatenate identifiers
/// with `;`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    pub rid: String,
    pub cols: Vec<(String, Value)>,
}

impl Row {
    pub fn new(rid: &str) -> Row {
        Row {
            rid: rid.to_string(),
            cols: Vec::new(),
        }
    }

    /// Look a column up by name. Exact match first, then a qualified /
    /// unqualified fallback in either direction, so that `age` finds
    /// `employees.age` and vice versa.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some((_, v)) = self.cols.iter().find(|(k, _)| k == name) {
            return Some(v);
        }
        if let Some(last) = name.rsplit('.').next() {
            if last != name {
                return self.cols.iter().find(|(k, _)| k == last).map(|(_, v)| v);
            }
        }
        self.cols
            .iter()
            .find(|(k, _)| k.rsplit('.').next() == Some(name))
            .map(|(_, v)| v)
    }

    /// Set or append a column value.
    pub fn set(&mut self, name: &str, val: Value) {
        if let Some((_, v)) = self.cols.iter_mut().find(|(k, _)| k == name) {
            *v = val;
        } else {
            self.cols.push((name.to_string(), val));
        }
    }

    /// New row with every key prefixed `table.`.
    pub fn qualified(&self, table: &str) -> Row {
        Row {
            rid: self.rid.clone(),
            cols: self
                .cols
                .iter()
                .map(|(k, v)| (format!("{}.{}", table, k), v.clone()))
                .collect(),
        }
    }

    /// New row with any `table.` prefix stripped from the keys.
    pub fn unqualified(&self) -> Row {
        Row {
            rid: self.rid.clone(),
            cols: self
                .cols
                .iter()
                .map(|(k, v)| {
                    let k = k.rsplit('.').next().unwrap_or(k.as_str());
                    (k.to_string(), v.clone())
                })
                .collect(),
        }
    }
}

/// Encode a row against a schema: rid field, then each column in schema
/// order ( 4-byte LE int, 4-byte LE float, or fixed zero-padded ASCII ).
pub fn encode_row(schema: &Schema, row: &Row) -> Result<Vec<u8>> {
    let mut data = vec![0u8; schema.record_size()];
    let rid = row.rid.as_bytes();
    if rid.len() >= RID_FIELD {
        return Err(Error::Invariant(format!(
            "row id {} exceeds {} bytes",
            row.rid,
            RID_FIELD - 1
        )));
    }
    data[0] = rid.len() as u8;
    data[1..1 + rid.len()].copy_from_slice(rid);
    let mut off = RID_FIELD;
    for c in &schema.columns {
        let val = row.get(&c.name).ok_or_else(|| {
            Error::SchemaMismatch(format!("row missing column {} of {}", c.name, schema.table))
        })?;
        match (val, c.typ) {
            (Value::Int(x), DataType::Int) => util::seti32(&mut data, off, *x),
            (Value::Float(x), DataType::Float) => util::setf32(&mut data, off, *x),
            (Value::Str(s), DataType::Str(len)) => {
                if s.len() > len {
                    warn!(
                        "truncating value for {}.{} from {} to {} bytes",
                        schema.table,
                        c.name,
                        s.len(),
                        len
                    );
                }
                util::set_padded(&mut data, off, s, len);
            }
            _ => {
                return Err(Error::SchemaMismatch(format!(
                    "column {} of {} expects {:?}, got {}",
                    c.name, schema.table, c.typ, val
                )))
            }
        }
        off += c.typ.size();
    }
    Ok(data)
}

/// Decode a record. Inverse of [`encode_row`]; strings are right-trimmed
/// of NUL bytes.
pub fn decode_row(schema: &Schema, data: &[u8]) -> Result<Row> {
    if data.len() != schema.record_size() {
        return Err(Error::SchemaMismatch(format!(
            "record is {} bytes, schema {} wants {}",
            data.len(),
            schema.table,
            schema.record_size()
        )));
    }
    let rid_len = data[0] as usize;
    if rid_len >= RID_FIELD {
        return Err(Error::PageCorrupt(format!(
            "row id length {} out of range",
            rid_len
        )));
    }
    let rid = std::str::from_utf8(&data[1..1 + rid_len])
        .map_err(|_| Error::PageCorrupt("row id is not ASCII".to_string()))?;
    let mut row = Row::new(rid);
    let mut off = RID_FIELD;
    for c in &schema.columns {
        let val = match c.typ {
            DataType::Int => Value::Int(util::geti32(data, off)),
            DataType::Float => Value::Float(util::getf32(data, off)),
            DataType::Str(len) => Value::Str(util::get_padded(data, off, len)),
        };
        row.cols.push((c.name.clone(), val));
        off += c.typ.size();
    }
    Ok(row)
}
