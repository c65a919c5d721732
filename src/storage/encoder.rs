//! Chunk encoders: value transcoding plus per-chunk statistics
//!
//! An encoder sits between the loader and a chunk buffer. It transforms
//! logical values into their stored form, keeps the chunk's min/max/null
//! statistics current, and serializes those statistics onto the chunk's
//! metadata page.

use crate::storage::file_buffer::FileBuffer;
use crate::types::{Datum, SqlTypeInfo, NULL_BIGINT};
use crate::{Result, StrataError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::marker::PhantomData;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Floor an epoch-seconds value onto the day grid
pub fn epoch_days_from_seconds(seconds: i64) -> i64 {
    seconds.div_euclid(SECONDS_PER_DAY)
}

/// Midnight of the given epoch day, in seconds
pub fn epoch_seconds_from_days(days: i64) -> i64 {
    days * SECONDS_PER_DAY
}

/// Min/max/null statistics of one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkStats {
    pub min: Datum,
    pub max: Datum,
    pub has_nulls: bool,
}

/// Everything a catalog needs to know about one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub sql_type: SqlTypeInfo,
    pub num_bytes: u64,
    pub num_elements: u64,
    pub stats: ChunkStats,
}

impl ChunkMetadata {
    pub fn new(sql_type: SqlTypeInfo) -> Self {
        Self {
            sql_type,
            num_bytes: 0,
            num_elements: 0,
            stats: ChunkStats {
                min: Datum::Int(0),
                max: Datum::Int(0),
                has_nulls: false,
            },
        }
    }
}

/// Per-chunk value transcoder and statistics accumulator
pub trait Encoder: Send + Sync {
    /// Transcode `num_elems` values out of `src` into the buffer.
    ///
    /// With `offset == -1` the encoded bytes are appended and, unless
    /// `replicating`, `src` is advanced past the consumed input. With
    /// `offset >= 0` the bytes overwrite the chunk starting at that element
    /// index and the element count becomes `offset + num_elems`.
    fn append_data(
        &mut self,
        buffer: &mut FileBuffer,
        src: &mut &[u8],
        num_elems: usize,
        replicating: bool,
        offset: i64,
    ) -> Result<ChunkMetadata>;

    /// Fill `metadata` with the element count and statistics
    fn get_metadata(&self, metadata: &mut ChunkMetadata);

    fn num_elems(&self) -> u64;

    fn set_num_elems(&mut self, num_elems: u64);

    fn chunk_stats(&self) -> ChunkStats;

    /// Fold a single value into the statistics without writing bytes
    fn update_stats(&mut self, val: i64, is_null: bool);

    /// Fold a single floating-point value into the statistics
    fn update_stats_fp(&mut self, val: f64, is_null: bool);

    /// Fold a raw slice of unencoded values into the statistics,
    /// validating each as if it were stored
    fn update_stats_slice(&mut self, src: &[u8], num_elems: usize) -> Result<()>;

    /// Widen this chunk's range by another chunk's statistics
    fn reduce_stats(&mut self, other: &ChunkStats);

    /// Take element count and statistics from another encoder
    fn copy_metadata(&mut self, num_elems: u64, stats: &ChunkStats);

    /// Overwrite the statistics if they differ; returns whether anything changed
    fn reset_chunk_stats(&mut self, stats: &ChunkStats) -> bool;

    /// Serialize statistics onto the metadata stream:
    /// `num_elems: u64`, `data_min`, `data_max`, `has_nulls: u8`
    fn write_metadata(&self, out: &mut dyn Write) -> Result<()>;

    /// Inverse of [`write_metadata`](Self::write_metadata)
    fn read_metadata(&mut self, input: &mut dyn Read) -> Result<()>;
}

/// Build the encoder mandated by a column type, if it has one
pub fn create(sql_type: &SqlTypeInfo) -> Option<Box<dyn Encoder>> {
    if sql_type.is_date_in_days() {
        return match sql_type.size {
            2 => Some(Box::new(DateDaysEncoder::<i16>::new(*sql_type))),
            _ => Some(Box::new(DateDaysEncoder::<i32>::new(*sql_type))),
        };
    }
    None
}

/// Stored-side integer of a date-in-days column
pub trait DayStorage: Copy + Send + Sync + 'static {
    const WIDTH: usize;
    /// The stored-domain minimum, reserved as the null sentinel
    const NULL_DAYS: i64;
    /// Smallest non-null day count; keeps the sentinel unreachable
    const MIN_DAYS: i64;
    const MAX_DAYS: i64;
    fn push_le(days: i64, out: &mut Vec<u8>);
}

impl DayStorage for i32 {
    const WIDTH: usize = 4;
    const NULL_DAYS: i64 = i32::MIN as i64;
    const MIN_DAYS: i64 = i32::MIN as i64 + 1;
    const MAX_DAYS: i64 = i32::MAX as i64;

    fn push_le(days: i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&(days as i32).to_le_bytes());
    }
}

impl DayStorage for i16 {
    const WIDTH: usize = 2;
    const NULL_DAYS: i64 = i16::MIN as i64;
    const MIN_DAYS: i64 = i16::MIN as i64 + 1;
    const MAX_DAYS: i64 = i16::MAX as i64;

    fn push_le(days: i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&(days as i16).to_le_bytes());
    }
}

/// Transcodes epoch seconds (`i64`) to a signed day count of width `V`,
/// flooring toward negative infinity. Statistics are taken from the
/// round-tripped seconds so the recorded range matches what a reader of the
/// stored days will see.
pub struct DateDaysEncoder<V> {
    sql_type: SqlTypeInfo,
    num_elems: u64,
    data_min: i64,
    data_max: i64,
    has_nulls: bool,
    _stored: PhantomData<V>,
}

impl<V: DayStorage> DateDaysEncoder<V> {
    pub fn new(sql_type: SqlTypeInfo) -> Self {
        Self {
            sql_type,
            num_elems: 0,
            data_min: i64::MAX,
            data_max: i64::MIN,
            has_nulls: false,
            _stored: PhantomData,
        }
    }

    fn encode_and_update_stats(&mut self, seconds: i64) -> Result<i64> {
        if seconds == NULL_BIGINT {
            self.has_nulls = true;
            return Ok(V::NULL_DAYS);
        }
        let days = epoch_days_from_seconds(seconds);
        if !(V::MIN_DAYS..=V::MAX_DAYS).contains(&days) {
            return Err(StrataError::DateOverflow(seconds));
        }
        let round_tripped = epoch_seconds_from_days(days);
        self.data_min = self.data_min.min(round_tripped);
        self.data_max = self.data_max.max(round_tripped);
        Ok(days)
    }
}

impl<V: DayStorage> Encoder for DateDaysEncoder<V> {
    fn append_data(
        &mut self,
        buffer: &mut FileBuffer,
        src: &mut &[u8],
        num_elems: usize,
        replicating: bool,
        offset: i64,
    ) -> Result<ChunkMetadata> {
        let input_bytes = num_elems * std::mem::size_of::<i64>();
        let needed = if replicating { std::mem::size_of::<i64>().min(input_bytes) } else { input_bytes };
        if src.len() < needed {
            return Err(StrataError::ShortIo { expected: needed, actual: src.len() });
        }

        let mut encoded = Vec::with_capacity(num_elems * V::WIDTH);
        let mut raw = [0u8; 8];
        for i in 0..num_elems {
            let ri = if replicating { 0 } else { i };
            raw.copy_from_slice(&src[ri * 8..ri * 8 + 8]);
            let days = self.encode_and_update_stats(i64::from_le_bytes(raw))?;
            V::push_le(days, &mut encoded);
        }

        if offset == -1 {
            self.num_elems += num_elems as u64;
            buffer.append(&encoded)?;
            if !replicating {
                let consumed = *src;
                *src = &consumed[input_bytes..];
            }
        } else {
            debug_assert!(!replicating);
            self.num_elems = offset as u64 + num_elems as u64;
            buffer.write(&encoded, offset as usize * V::WIDTH)?;
        }

        let mut metadata = ChunkMetadata::new(self.sql_type);
        self.get_metadata(&mut metadata);
        metadata.num_bytes = buffer.size() as u64;
        Ok(metadata)
    }

    fn get_metadata(&self, metadata: &mut ChunkMetadata) {
        metadata.num_elements = self.num_elems;
        metadata.stats = self.chunk_stats();
    }

    fn num_elems(&self) -> u64 {
        self.num_elems
    }

    fn set_num_elems(&mut self, num_elems: u64) {
        self.num_elems = num_elems;
    }

    fn chunk_stats(&self) -> ChunkStats {
        ChunkStats {
            min: Datum::Int(self.data_min),
            max: Datum::Int(self.data_max),
            has_nulls: self.has_nulls,
        }
    }

    fn update_stats(&mut self, val: i64, is_null: bool) {
        if is_null {
            self.has_nulls = true;
        } else {
            self.data_min = self.data_min.min(val);
            self.data_max = self.data_max.max(val);
        }
    }

    fn update_stats_fp(&mut self, val: f64, is_null: bool) {
        self.update_stats(val as i64, is_null);
    }

    fn update_stats_slice(&mut self, src: &[u8], num_elems: usize) -> Result<()> {
        if src.len() < num_elems * 8 {
            return Err(StrataError::ShortIo { expected: num_elems * 8, actual: src.len() });
        }
        let mut raw = [0u8; 8];
        for i in 0..num_elems {
            raw.copy_from_slice(&src[i * 8..i * 8 + 8]);
            self.encode_and_update_stats(i64::from_le_bytes(raw))?;
        }
        Ok(())
    }

    fn reduce_stats(&mut self, other: &ChunkStats) {
        if other.has_nulls {
            self.has_nulls = true;
        }
        self.data_min = self.data_min.min(other.min.as_int());
        self.data_max = self.data_max.max(other.max.as_int());
    }

    fn copy_metadata(&mut self, num_elems: u64, stats: &ChunkStats) {
        self.num_elems = num_elems;
        self.data_min = stats.min.as_int();
        self.data_max = stats.max.as_int();
        self.has_nulls = stats.has_nulls;
    }

    fn reset_chunk_stats(&mut self, stats: &ChunkStats) -> bool {
        let new_min = stats.min.as_int();
        let new_max = stats.max.as_int();
        if self.data_min == new_min && self.data_max == new_max && self.has_nulls == stats.has_nulls
        {
            return false;
        }
        self.data_min = new_min;
        self.data_max = new_max;
        self.has_nulls = stats.has_nulls;
        true
    }

    fn write_metadata(&self, out: &mut dyn Write) -> Result<()> {
        out.write_u64::<LittleEndian>(self.num_elems)?;
        out.write_i64::<LittleEndian>(self.data_min)?;
        out.write_i64::<LittleEndian>(self.data_max)?;
        out.write_u8(self.has_nulls as u8)?;
        Ok(())
    }

    fn read_metadata(&mut self, input: &mut dyn Read) -> Result<()> {
        self.num_elems = input.read_u64::<LittleEndian>()?;
        self.data_min = input.read_i64::<LittleEndian>()?;
        self.data_max = input.read_i64::<LittleEndian>()?;
        self.has_nulls = input.read_u8()? != 0;
        Ok(())
    }
}
