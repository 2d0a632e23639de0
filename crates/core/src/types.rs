//! Shared identifier types and key encoding.
//!
//! Ids are plain `u64` aliases; the names exist so signatures document
//! which counter a value came from. The `keys` module defines the byte
//! layout of engine keys in the KV adapter and the order-preserving value
//! encoding used by secondary indexes.

/// Transaction id, allocated monotonically by the transaction manager.
pub type TxnId = u64;

/// Logical timestamp from the commit oracle.
pub type Ts = u64;

/// Log sequence number within the WAL.
pub type Lsn = u64;

/// Per-table row id.
pub type RowId = u64;

/// Replica node id.
pub type NodeId = u64;

/// Sentinel for "no end timestamp": the version is still live.
pub const TS_INFINITY: Ts = u64::MAX;

/// Key construction for the KV adapter.
///
/// Layout (all segments '/'-separated, values binary):
/// - table rows:    `t/<table>/<row_id: u64 BE>`
/// - table schema:  `s/<table>`
/// - index entries: `i/<table>/<column>/<encoded value>/<row_id: u64 BE>`
///
/// Row ids are big-endian so byte order equals numeric order and prefix
/// scans return rows in insertion order.
pub mod keys {
    use super::RowId;
    use crate::value::Value;

    /// Prefix under which all rows of `table` live.
    pub fn table_prefix(table: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(table.len() + 3);
        k.extend_from_slice(b"t/");
        k.extend_from_slice(table.as_bytes());
        k.push(b'/');
        k
    }

    /// Key of one row.
    pub fn row_key(table: &str, row_id: RowId) -> Vec<u8> {
        let mut k = table_prefix(table);
        k.extend_from_slice(&row_id.to_be_bytes());
        k
    }

    /// Extract the row id from a row key produced by `row_key`.
    pub fn row_id_of(key: &[u8]) -> Option<RowId> {
        if key.len() < 8 {
            return None;
        }
        let tail: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
        Some(RowId::from_be_bytes(tail))
    }

    /// Key under which a table's schema document is stored.
    pub fn schema_key(table: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(table.len() + 2);
        k.extend_from_slice(b"s/");
        k.extend_from_slice(table.as_bytes());
        k
    }

    /// Prefix for all schema documents.
    pub fn schema_prefix() -> Vec<u8> {
        b"s/".to_vec()
    }

    /// Prefix under which all entries of one index live.
    pub fn index_prefix(table: &str, column: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(table.len() + column.len() + 4);
        k.extend_from_slice(b"i/");
        k.extend_from_slice(table.as_bytes());
        k.push(b'/');
        k.extend_from_slice(column.as_bytes());
        k.push(b'/');
        k
    }

    /// Key of one index entry.
    pub fn index_key(table: &str, column: &str, value: &Value, row_id: RowId) -> Vec<u8> {
        let mut k = index_prefix(table, column);
        k.extend_from_slice(&encode_value(value));
        k.push(b'/');
        k.extend_from_slice(&row_id.to_be_bytes());
        k
    }

    /// Prefix matching all index entries for one value.
    pub fn index_value_prefix(table: &str, column: &str, value: &Value) -> Vec<u8> {
        let mut k = index_prefix(table, column);
        k.extend_from_slice(&encode_value(value));
        k.push(b'/');
        k
    }

    /// Order-preserving byte encoding of a value.
    ///
    /// Byte comparison of two encodings of same-tag values matches
    /// `Value::total_cmp`. Tag bytes keep `Null` smallest.
    pub fn encode_value(value: &Value) -> Vec<u8> {
        match value {
            Value::Null => vec![0x00],
            Value::Boolean(b) => vec![0x01, u8::from(*b)],
            Value::Integer(i) => {
                // Flip the sign bit so negative numbers sort first.
                let biased = (*i as u64) ^ (1u64 << 63);
                let mut out = vec![0x02];
                out.extend_from_slice(&biased.to_be_bytes());
                out
            }
            Value::Float(f) => {
                // IEEE total-order trick: positive floats flip the sign
                // bit, negative floats flip every bit.
                let bits = f.to_bits();
                let ordered = if bits >> 63 == 0 {
                    bits ^ (1u64 << 63)
                } else {
                    !bits
                };
                let mut out = vec![0x03];
                out.extend_from_slice(&ordered.to_be_bytes());
                out
            }
            Value::Text(bytes) => {
                let mut out = vec![0x04];
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::keys::*;
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_row_keys_sort_by_row_id() {
        let a = row_key("users", 1);
        let b = row_key("users", 2);
        let c = row_key("users", 256);
        assert!(a < b && b < c);
        assert_eq!(row_id_of(&c), Some(256));
    }

    #[test]
    fn test_row_keys_share_table_prefix() {
        let k = row_key("users", 9);
        assert!(k.starts_with(&table_prefix("users")));
        assert!(!k.starts_with(&table_prefix("orders")));
    }

    #[test]
    fn test_integer_encoding_orders_negatives_first() {
        let neg = encode_value(&Value::Integer(-10));
        let zero = encode_value(&Value::Integer(0));
        let pos = encode_value(&Value::Integer(10));
        assert!(neg < zero && zero < pos);
    }

    #[test]
    fn test_float_encoding_is_ordered() {
        let vals = [-1.5f64, -0.0, 0.0, 2.25, 1e300];
        let encoded: Vec<_> = vals
            .iter()
            .map(|f| encode_value(&Value::Float(*f)))
            .collect();
        for w in encoded.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn test_text_encoding_is_byte_order() {
        assert!(encode_value(&Value::text("a")) < encode_value(&Value::text("b")));
    }

    #[test]
    fn test_null_encoding_sorts_first() {
        assert!(encode_value(&Value::Null) < encode_value(&Value::Integer(i64::MIN)));
    }

    #[test]
    fn test_ts_infinity_is_max() {
        assert_eq!(TS_INFINITY, u64::MAX);
    }
}
