//! SQL type descriptors shared by the chunk store and the result-set layer.

use crate::{Result, StrataError};

/// Logical SQL types understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SqlType {
    Null = 0,
    SmallInt = 1,
    Int = 2,
    BigInt = 3,
    Float = 4,
    Double = 5,
    Decimal = 6,
    Text = 7,
    Date = 8,
}

impl SqlType {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SqlType::Null),
            1 => Ok(SqlType::SmallInt),
            2 => Ok(SqlType::Int),
            3 => Ok(SqlType::BigInt),
            4 => Ok(SqlType::Float),
            5 => Ok(SqlType::Double),
            6 => Ok(SqlType::Decimal),
            7 => Ok(SqlType::Text),
            8 => Ok(SqlType::Date),
            _ => Err(StrataError::CorruptChunk(format!("unknown SQL type tag {value}"))),
        }
    }
}

/// Column compression scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EncodingType {
    None = 0,
    Dict = 1,
    DateInDays = 2,
}

impl EncodingType {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(EncodingType::None),
            1 => Ok(EncodingType::Dict),
            2 => Ok(EncodingType::DateInDays),
            _ => Err(StrataError::CorruptChunk(format!("unknown encoding tag {value}"))),
        }
    }
}

/// Full type descriptor for one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlTypeInfo {
    pub ty: SqlType,
    pub subtype: SqlType,
    pub dimension: i32,
    pub scale: i32,
    pub notnull: bool,
    pub compression: EncodingType,
    pub comp_param: i32,
    pub size: i32,
}

impl SqlTypeInfo {
    pub fn new(ty: SqlType, notnull: bool) -> Self {
        let size = match ty {
            SqlType::Null => 0,
            SqlType::SmallInt => 2,
            SqlType::Int | SqlType::Float => 4,
            SqlType::BigInt | SqlType::Double | SqlType::Decimal | SqlType::Date => 8,
            SqlType::Text => 4,
        };
        Self {
            ty,
            subtype: SqlType::Null,
            dimension: 0,
            scale: 0,
            notnull,
            compression: EncodingType::None,
            comp_param: 0,
            size,
        }
    }

    /// A date column stored as a signed day count of `stored_size` bytes
    pub fn date_in_days(notnull: bool, stored_size: i32) -> Self {
        let mut ti = Self::new(SqlType::Date, notnull);
        ti.compression = EncodingType::DateInDays;
        ti.size = stored_size;
        ti
    }

    /// A dictionary-encoded string column referencing dictionary `comp_param`
    pub fn dict_string(notnull: bool, comp_param: i32) -> Self {
        let mut ti = Self::new(SqlType::Text, notnull);
        ti.compression = EncodingType::Dict;
        ti.comp_param = comp_param;
        ti
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.ty, SqlType::SmallInt | SqlType::Int | SqlType::BigInt)
    }

    pub fn is_fp(&self) -> bool {
        matches!(self.ty, SqlType::Float | SqlType::Double)
    }

    pub fn is_decimal(&self) -> bool {
        self.ty == SqlType::Decimal
    }

    pub fn is_string(&self) -> bool {
        self.ty == SqlType::Text
    }

    pub fn is_dict_encoded_string(&self) -> bool {
        self.ty == SqlType::Text && self.compression == EncodingType::Dict
    }

    pub fn is_date_in_days(&self) -> bool {
        self.ty == SqlType::Date && self.compression == EncodingType::DateInDays
    }

    /// Fill the metadata-page type block, field order fixed by the page format
    pub fn fill_type_data(&self, out: &mut [i32]) {
        out[0] = self.ty as i32;
        out[1] = self.subtype as i32;
        out[2] = self.dimension;
        out[3] = self.scale;
        out[4] = self.notnull as i32;
        out[5] = self.compression as i32;
        out[6] = self.comp_param;
        out[7] = self.size;
    }

    /// Inverse of [`fill_type_data`](Self::fill_type_data)
    pub fn from_type_data(data: &[i32]) -> Result<Self> {
        Ok(Self {
            ty: SqlType::from_i32(data[0])?,
            subtype: SqlType::from_i32(data[1])?,
            dimension: data[2],
            scale: data[3],
            notnull: data[4] != 0,
            compression: EncodingType::from_i32(data[5])?,
            comp_param: data[6],
            size: data[7],
        })
    }
}

impl Default for SqlTypeInfo {
    fn default() -> Self {
        Self::new(SqlType::Null, false)
    }
}

/// Chunk statistic value, typed by the column it describes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Datum {
    Int(i64),
    Double(f64),
}

impl Datum {
    pub fn as_int(&self) -> i64 {
        match self {
            Datum::Int(v) => *v,
            Datum::Double(v) => *v as i64,
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Datum::Int(v) => *v as f64,
            Datum::Double(v) => *v,
        }
    }
}

/// Null sentinel for 64-bit integer values
pub const NULL_BIGINT: i64 = i64::MIN;

/// Null sentinel for integer-backed columns of the given type
pub fn inline_int_null_val(ti: &SqlTypeInfo) -> i64 {
    match ti.ty {
        SqlType::SmallInt => i16::MIN as i64,
        SqlType::Int | SqlType::Text => i32::MIN as i64,
        _ => i64::MIN,
    }
}

/// Null sentinel for floating-point columns of the given type
pub fn inline_fp_null_val(ti: &SqlTypeInfo) -> f64 {
    match ti.ty {
        SqlType::Float => f32::MIN as f64,
        _ => f64::MIN,
    }
}
