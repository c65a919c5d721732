//! Physical layout description of a query result set
//!
//! A result set is `entry_count` logical entries, each holding the group key
//! columns followed by one slot per aggregation output (`AVG` takes two
//! consecutive slots: sum then count). Row-major lays entries out back to
//! back; column-major lays each key column and each slot column out as a
//! contiguous run. All addressing above the byte level goes through the
//! offset calculators here.

use crate::types::SqlTypeInfo;

/// Sentinel marking an unoccupied 8-byte key slot
pub const EMPTY_KEY_64: i64 = i64::MIN;
/// Pattern written into untouched value slots at initialization, kept
/// recognizable for debugging
pub const INIT_SENTINEL: i64 = 0xdead_beef;

/// How group keys map onto entry indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByHashType {
    /// Single key column over a known value range; key maps to the entry
    /// index collision-free
    OneColKnownRange,
    /// Multiple key columns whose combined range is still perfect
    MultiColPerfectHash,
    /// Open-addressed baseline hash table
    MultiCol,
}

impl GroupByHashType {
    pub fn is_perfect(&self) -> bool {
        !matches!(self, GroupByHashType::MultiCol)
    }
}

/// Aggregation operator of one target slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Min,
    Max,
    Sum,
    Count,
    Avg,
}

/// Declared and padded byte widths of one target slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColWidths {
    pub actual: i8,
    pub compact: i8,
}

impl ColWidths {
    pub fn same(width: i8) -> Self {
        Self { actual: width, compact: width }
    }
}

/// One output column of a query
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub is_agg: bool,
    pub agg_kind: AggKind,
    pub sql_type: SqlTypeInfo,
    pub agg_arg_type: SqlTypeInfo,
    pub skip_null_val: bool,
    pub is_distinct: bool,
}

impl TargetInfo {
    pub fn aggregate(agg_kind: AggKind, sql_type: SqlTypeInfo, agg_arg_type: SqlTypeInfo) -> Self {
        Self {
            is_agg: true,
            agg_kind,
            sql_type,
            agg_arg_type,
            skip_null_val: true,
            is_distinct: false,
        }
    }

    /// A plain projected column (no aggregation applied)
    pub fn projected(sql_type: SqlTypeInfo) -> Self {
        Self {
            is_agg: false,
            agg_kind: AggKind::Min,
            sql_type,
            agg_arg_type: SqlTypeInfo::default(),
            skip_null_val: true,
            is_distinct: false,
        }
    }

    /// Number of storage slots this target occupies
    pub fn num_slots(&self) -> usize {
        if self.is_agg && self.agg_kind == AggKind::Avg {
            2
        } else {
            1
        }
    }
}

/// Step over the slots of `target` starting at `slot_idx`
pub fn advance_slot(slot_idx: usize, target: &TargetInfo) -> usize {
    slot_idx + target.num_slots()
}

/// Total slot count of a target list, with `AVG` expanded
pub fn slot_count(target_infos: &[TargetInfo]) -> usize {
    target_infos.iter().map(TargetInfo::num_slots).sum()
}

/// One ORDER BY element; `tle_no` is the 1-based target index
#[derive(Debug, Clone, Copy)]
pub struct OrderEntry {
    pub tle_no: i32,
    pub is_desc: bool,
    pub nulls_first: bool,
}

impl OrderEntry {
    pub fn new(tle_no: i32, is_desc: bool, nulls_first: bool) -> Self {
        Self { tle_no, is_desc, nulls_first }
    }
}

/// Describes the physical layout of a result set buffer
#[derive(Debug, Clone)]
pub struct QueryMemoryDescriptor {
    pub hash_type: GroupByHashType,
    /// Key columns are implicit when set; an entry is occupied iff any of
    /// its target slots is non-zero
    pub keyless_hash: bool,
    pub idx_target_as_key: i32,
    pub min_val: i64,
    pub max_val: i64,
    pub entry_count: usize,
    pub group_col_widths: Vec<i8>,
    pub agg_col_widths: Vec<ColWidths>,
    pub key_column_pad_bytes: Vec<usize>,
    pub output_columnar: bool,
    pub has_nulls: bool,
}

impl QueryMemoryDescriptor {
    pub fn key_count(&self) -> usize {
        self.group_col_widths.len()
    }

    pub fn slot_count(&self) -> usize {
        self.agg_col_widths.len()
    }

    pub fn key_width(&self, key_idx: usize) -> usize {
        self.group_col_widths[key_idx] as usize
    }

    /// Byte width of a slot in the active layout: padded (`actual`) widths
    /// row-major, packed (`compact`) widths column-major
    pub fn slot_width(&self, slot_idx: usize) -> usize {
        let widths = self.agg_col_widths[slot_idx];
        if self.output_columnar {
            widths.compact as usize
        } else {
            widths.actual as usize
        }
    }

    /// Bytes taken by the key columns of one row-major entry
    pub fn key_bytes_rowwise(&self) -> usize {
        self.group_col_widths.iter().map(|w| *w as usize).sum()
    }

    /// Stride between consecutive row-major entries
    pub fn entry_stride(&self) -> usize {
        self.key_bytes_rowwise()
            + self.agg_col_widths.iter().map(|w| w.actual as usize).sum::<usize>()
    }

    /// Bytes taken by all key columns in the column-major layout
    fn key_section_bytes_colwise(&self) -> usize {
        (0..self.key_count())
            .map(|k| self.entry_count * self.key_width(k) + self.key_pad(k))
            .sum()
    }

    fn key_pad(&self, key_idx: usize) -> usize {
        self.key_column_pad_bytes.get(key_idx).copied().unwrap_or(0)
    }

    /// Total byte size of a buffer with this layout
    pub fn buffer_size(&self) -> usize {
        if self.output_columnar {
            self.key_section_bytes_colwise()
                + self
                    .agg_col_widths
                    .iter()
                    .map(|w| self.entry_count * w.compact as usize)
                    .sum::<usize>()
        } else {
            self.entry_count * self.entry_stride()
        }
    }

    /// Byte offset of key component `key_idx` of entry `entry`
    pub fn key_offset(&self, entry: usize, key_idx: usize) -> usize {
        debug_assert!(entry < self.entry_count);
        if self.output_columnar {
            let base: usize = (0..key_idx)
                .map(|k| self.entry_count * self.key_width(k) + self.key_pad(k))
                .sum();
            base + entry * self.key_width(key_idx)
        } else {
            let within: usize = self.group_col_widths[..key_idx]
                .iter()
                .map(|w| *w as usize)
                .sum();
            entry * self.entry_stride() + within
        }
    }

    /// Byte offset of target slot `slot_idx` of entry `entry`
    pub fn slot_offset(&self, entry: usize, slot_idx: usize) -> usize {
        debug_assert!(entry < self.entry_count);
        if self.output_columnar {
            let base: usize = self.key_section_bytes_colwise()
                + self.agg_col_widths[..slot_idx]
                    .iter()
                    .map(|w| self.entry_count * w.compact as usize)
                    .sum::<usize>();
            base + entry * self.slot_width(slot_idx)
        } else {
            let within: usize = self.agg_col_widths[..slot_idx]
                .iter()
                .map(|w| w.actual as usize)
                .sum();
            entry * self.entry_stride() + self.key_bytes_rowwise() + within
        }
    }
}
