//! Columnar buffers.
//!
//! A `Column` is the unit of data exchanged with operator kernels: a typed
//! data buffer, an optional validity bitmap, and a row count.
//!
//! Buffer invariants:
//! - fixed-width types: `data.len() == row_count * element_size`
//! - `Utf8`: `offsets.len() == row_count + 1`, `data` holds the
//!   concatenated byte strings
//! - when a bitmap is present it has `ceil(row_count / 8)` bytes; bit `i`
//!   cleared means row `i` is `Null`

use crate::error::{Error, Result};
use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};

/// A typed column of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as projected
    pub name: String,
    /// Element type
    pub dtype: DataType,
    /// Packed element bytes (little-endian for fixed widths)
    pub data: Vec<u8>,
    /// Offsets into `data`, present only for `Utf8`
    pub offsets: Option<Vec<u32>>,
    /// Validity bitmap; absent means no row is `Null`
    pub nulls: Option<Vec<u8>>,
    /// Logical row count
    pub row_count: usize,
}

impl Column {
    /// Create an empty column of the given type.
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Column {
            name: name.into(),
            dtype,
            data: Vec::new(),
            offsets: if dtype == DataType::Utf8 {
                Some(vec![0])
            } else {
                None
            },
            nulls: None,
            row_count: 0,
        }
    }

    /// Build a column from values, inferring nulls.
    pub fn from_values(
        name: impl Into<String>,
        dtype: DataType,
        values: &[Value],
    ) -> Result<Self> {
        let mut col = Column::new(name, dtype);
        for v in values {
            col.push(v)?;
        }
        Ok(col)
    }

    /// Append one value. `Null` appends a zeroed slot and clears the
    /// validity bit.
    pub fn push(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            self.push_null_slot();
            self.set_valid(self.row_count, false);
            self.row_count += 1;
            return Ok(());
        }
        match (self.dtype, value) {
            (DataType::Bool, Value::Boolean(b)) => self.data.push(u8::from(*b)),
            (DataType::Int8, Value::Integer(i)) => self.data.push(*i as u8),
            (DataType::UInt8, Value::Integer(i)) => self.data.push(*i as u8),
            (DataType::Int16, Value::Integer(i)) => {
                self.data.extend_from_slice(&(*i as i16).to_le_bytes())
            }
            (DataType::UInt16, Value::Integer(i)) => {
                self.data.extend_from_slice(&(*i as u16).to_le_bytes())
            }
            (DataType::Int32, Value::Integer(i)) | (DataType::Date32, Value::Integer(i)) => {
                self.data.extend_from_slice(&(*i as i32).to_le_bytes())
            }
            (DataType::UInt32, Value::Integer(i)) => {
                self.data.extend_from_slice(&(*i as u32).to_le_bytes())
            }
            (DataType::Int64, Value::Integer(i))
            | (DataType::TimestampMicros, Value::Integer(i)) => {
                self.data.extend_from_slice(&i.to_le_bytes())
            }
            (DataType::UInt64, Value::Integer(i)) => {
                self.data.extend_from_slice(&(*i as u64).to_le_bytes())
            }
            (DataType::Float32, Value::Float(f)) => {
                self.data.extend_from_slice(&(*f as f32).to_le_bytes())
            }
            (DataType::Float64, Value::Float(f)) => self.data.extend_from_slice(&f.to_le_bytes()),
            (DataType::Utf8, Value::Text(bytes)) => {
                self.data.extend_from_slice(bytes);
                let offsets = self.offsets.as_mut().expect("utf8 column has offsets");
                offsets.push(self.data.len() as u32);
            }
            (dtype, value) => {
                return Err(Error::TypeMismatch(format!(
                    "cannot store {value:?} in {dtype:?} column"
                )))
            }
        }
        if let Some(bitmap) = &mut self.nulls {
            // Bitmap already exists; extend it for the new row.
            let byte = self.row_count / 8;
            if byte >= bitmap.len() {
                bitmap.push(0);
            }
            bitmap[byte] |= 1 << (self.row_count % 8);
        }
        self.row_count += 1;
        Ok(())
    }

    fn push_null_slot(&mut self) {
        match self.dtype.element_size() {
            Some(width) => self.data.extend(std::iter::repeat(0u8).take(width)),
            None => {
                let offsets = self.offsets.as_mut().expect("utf8 column has offsets");
                let end = *offsets.last().unwrap_or(&0);
                offsets.push(end);
            }
        }
    }

    fn set_valid(&mut self, row: usize, valid: bool) {
        let bitmap = self.nulls.get_or_insert_with(|| {
            // Lazily materialize a bitmap with all prior rows valid.
            let mut b = vec![0xFFu8; row / 8 + 1];
            let tail_bits = row % 8;
            if let Some(last) = b.last_mut() {
                *last = if tail_bits == 0 { 0 } else { (1u8 << tail_bits) - 1 };
            }
            b
        });
        let byte = row / 8;
        while byte >= bitmap.len() {
            bitmap.push(0);
        }
        if valid {
            bitmap[byte] |= 1 << (row % 8);
        } else {
            bitmap[byte] &= !(1 << (row % 8));
        }
    }

    /// True if row `i` is `Null`.
    pub fn is_null(&self, i: usize) -> bool {
        match &self.nulls {
            Some(bitmap) => bitmap[i / 8] & (1 << (i % 8)) == 0,
            None => false,
        }
    }

    /// Decode the value at row `i`.
    ///
    /// # Panics
    /// Panics if `i >= row_count`; callers index within bounds.
    pub fn value(&self, i: usize) -> Value {
        assert!(i < self.row_count, "row {i} out of bounds");
        if self.is_null(i) {
            return Value::Null;
        }
        let fixed = |width: usize| &self.data[i * width..(i + 1) * width];
        match self.dtype {
            DataType::Bool => Value::Boolean(self.data[i] != 0),
            DataType::Int8 => Value::Integer(self.data[i] as i8 as i64),
            DataType::UInt8 => Value::Integer(self.data[i] as i64),
            DataType::Int16 => {
                Value::Integer(i16::from_le_bytes(fixed(2).try_into().unwrap()) as i64)
            }
            DataType::UInt16 => {
                Value::Integer(u16::from_le_bytes(fixed(2).try_into().unwrap()) as i64)
            }
            DataType::Int32 | DataType::Date32 => {
                Value::Integer(i32::from_le_bytes(fixed(4).try_into().unwrap()) as i64)
            }
            DataType::UInt32 => {
                Value::Integer(u32::from_le_bytes(fixed(4).try_into().unwrap()) as i64)
            }
            DataType::Int64 | DataType::TimestampMicros => {
                Value::Integer(i64::from_le_bytes(fixed(8).try_into().unwrap()))
            }
            DataType::UInt64 => {
                Value::Integer(u64::from_le_bytes(fixed(8).try_into().unwrap()) as i64)
            }
            DataType::Float32 => {
                Value::Float(f32::from_le_bytes(fixed(4).try_into().unwrap()) as f64)
            }
            DataType::Float64 => Value::Float(f64::from_le_bytes(fixed(8).try_into().unwrap())),
            DataType::Utf8 => {
                let offsets = self.offsets.as_ref().expect("utf8 column has offsets");
                let start = offsets[i] as usize;
                let end = offsets[i + 1] as usize;
                Value::Text(self.data[start..end].to_vec())
            }
        }
    }

    /// Iterate decoded values in row order.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.row_count).map(move |i| self.value(i))
    }

    /// Check the buffer-sizing invariants.
    pub fn validate(&self) -> Result<()> {
        match self.dtype.element_size() {
            Some(width) => {
                if self.data.len() != self.row_count * width {
                    return Err(Error::StorageCorruption(format!(
                        "column {}: data buffer {} bytes, expected {}",
                        self.name,
                        self.data.len(),
                        self.row_count * width
                    )));
                }
            }
            None => {
                let offsets = self.offsets.as_ref().ok_or_else(|| {
                    Error::StorageCorruption(format!("column {}: utf8 without offsets", self.name))
                })?;
                if offsets.len() != self.row_count + 1 {
                    return Err(Error::StorageCorruption(format!(
                        "column {}: {} offsets for {} rows",
                        self.name,
                        offsets.len(),
                        self.row_count
                    )));
                }
            }
        }
        if let Some(bitmap) = &self.nulls {
            let expected = self.row_count.div_ceil(8);
            if bitmap.len() < expected {
                return Err(Error::StorageCorruption(format!(
                    "column {}: bitmap {} bytes, need {}",
                    self.name,
                    bitmap.len(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Count of null rows.
    pub fn null_count(&self) -> usize {
        (0..self.row_count).filter(|&i| self.is_null(i)).count()
    }
}
