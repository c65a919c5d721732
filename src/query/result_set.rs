//! Result-set storage, typed row iteration and sorting

use crate::query::descriptor::{
    advance_slot, AggKind, OrderEntry, QueryMemoryDescriptor, TargetInfo, EMPTY_KEY_64,
    INIT_SENTINEL,
};
use crate::query::dictionary::StringDictionary;
use crate::types::{inline_fp_null_val, inline_int_null_val};
use std::cmp::Ordering;
use std::sync::Arc;

/// Fixed seeds so writers and reducers agree on the baseline probe order
const PROBE_HASHER: ahash::RandomState = ahash::RandomState::with_seeds(
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

fn key_hash(key: &[i64]) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = PROBE_HASHER.build_hasher();
    for component in key {
        hasher.write_i64(*component);
    }
    hasher.finish()
}

fn sign_extend(raw: u64, width: usize) -> i64 {
    let shift = 64 - width * 8;
    ((raw << shift) as i64) >> shift
}

/// One materialized output value
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    Int(i64),
    Double(f64),
    Str(Option<String>),
}

impl TargetValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TargetValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            TargetValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TargetValue::Str(v) => v.as_deref(),
            _ => None,
        }
    }
}

/// A raw result buffer interpreted through its layout descriptor.
///
/// Key and slot accessors address entries by ordinal index; the baseline
/// probe ([`find_or_insert`](Self::find_or_insert)) is shared by query
/// writers and the reducer so both visit entries in the same order.
pub struct ResultSetStorage {
    buff: Vec<u8>,
    query_mem_desc: QueryMemoryDescriptor,
    target_infos: Vec<TargetInfo>,
}

impl ResultSetStorage {
    pub fn new(target_infos: Vec<TargetInfo>, query_mem_desc: QueryMemoryDescriptor) -> Self {
        let buff = vec![0u8; query_mem_desc.buffer_size()];
        Self { buff, query_mem_desc, target_infos }
    }

    /// Set every key slot to the empty sentinel and every value slot to the
    /// initialization pattern (zero in keyless mode, where emptiness means
    /// all target slots zero)
    pub fn initialize(&mut self) {
        let keyless = self.query_mem_desc.keyless_hash;
        debug_assert!(self.query_mem_desc.group_col_widths.iter().all(|w| *w == 8));
        for entry in 0..self.query_mem_desc.entry_count {
            for key_idx in 0..self.query_mem_desc.key_count() {
                self.write_key(entry, key_idx, EMPTY_KEY_64);
            }
            for slot in 0..self.query_mem_desc.slot_count() {
                self.write_slot(entry, slot, if keyless { 0 } else { INIT_SENTINEL });
            }
        }
    }

    pub fn query_mem_desc(&self) -> &QueryMemoryDescriptor {
        &self.query_mem_desc
    }

    pub fn target_infos(&self) -> &[TargetInfo] {
        &self.target_infos
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buff
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buff
    }

    fn read_raw(&self, offset: usize, width: usize) -> u64 {
        let mut value = 0u64;
        for (i, byte) in self.buff[offset..offset + width].iter().enumerate() {
            value |= (*byte as u64) << (8 * i);
        }
        value
    }

    fn write_raw(&mut self, offset: usize, width: usize, value: u64) {
        for (i, byte) in self.buff[offset..offset + width].iter_mut().enumerate() {
            *byte = (value >> (8 * i)) as u8;
        }
    }

    pub fn read_key(&self, entry: usize, key_idx: usize) -> i64 {
        let width = self.query_mem_desc.key_width(key_idx);
        sign_extend(self.read_raw(self.query_mem_desc.key_offset(entry, key_idx), width), width)
    }

    pub fn write_key(&mut self, entry: usize, key_idx: usize, value: i64) {
        let width = self.query_mem_desc.key_width(key_idx);
        self.write_raw(self.query_mem_desc.key_offset(entry, key_idx), width, value as u64);
    }

    /// Slot value sign-extended to i64
    pub fn read_slot(&self, entry: usize, slot_idx: usize) -> i64 {
        let width = self.query_mem_desc.slot_width(slot_idx);
        sign_extend(self.read_raw(self.query_mem_desc.slot_offset(entry, slot_idx), width), width)
    }

    /// Slot bits without sign extension
    pub fn read_slot_raw(&self, entry: usize, slot_idx: usize) -> u64 {
        let width = self.query_mem_desc.slot_width(slot_idx);
        self.read_raw(self.query_mem_desc.slot_offset(entry, slot_idx), width)
    }

    pub fn write_slot(&mut self, entry: usize, slot_idx: usize, value: i64) {
        let width = self.query_mem_desc.slot_width(slot_idx);
        self.write_raw(self.query_mem_desc.slot_offset(entry, slot_idx), width, value as u64);
    }

    /// Slot bits decoded as a float of the slot's width
    pub fn read_slot_f64(&self, entry: usize, slot_idx: usize) -> f64 {
        let width = self.query_mem_desc.slot_width(slot_idx);
        let raw = self.read_raw(self.query_mem_desc.slot_offset(entry, slot_idx), width);
        if width == 4 {
            f32::from_bits(raw as u32) as f64
        } else {
            f64::from_bits(raw)
        }
    }

    pub fn write_slot_f64(&mut self, entry: usize, slot_idx: usize, value: f64) {
        let width = self.query_mem_desc.slot_width(slot_idx);
        let raw = if width == 4 {
            (value as f32).to_bits() as u64
        } else {
            value.to_bits()
        };
        self.write_raw(self.query_mem_desc.slot_offset(entry, slot_idx), width, raw);
    }

    /// Whether entry `entry` holds no group. Keyed layouts mark emptiness
    /// with the key sentinel; keyless layouts by every slot being zero.
    pub fn is_empty_entry(&self, entry: usize) -> bool {
        if self.query_mem_desc.keyless_hash {
            (0..self.query_mem_desc.slot_count()).all(|slot| self.read_slot_raw(entry, slot) == 0)
        } else {
            self.read_key(entry, 0) == EMPTY_KEY_64
        }
    }

    /// Linear probe from `hash(key)`, claiming the first empty entry.
    /// Returns the entry index and whether it was newly claimed, or `None`
    /// when the table is full.
    pub fn find_or_insert(&mut self, key: &[i64]) -> Option<(usize, bool)> {
        debug_assert_eq!(key.len(), self.query_mem_desc.key_count());
        let entry_count = self.query_mem_desc.entry_count;
        let mut entry = (key_hash(key) % entry_count as u64) as usize;
        for _ in 0..entry_count {
            if self.read_key(entry, 0) == EMPTY_KEY_64 {
                for (key_idx, component) in key.iter().enumerate() {
                    self.write_key(entry, key_idx, *component);
                }
                return Some((entry, true));
            }
            if key.iter().enumerate().all(|(k, component)| self.read_key(entry, k) == *component)
            {
                return Some((entry, false));
            }
            entry = (entry + 1) % entry_count;
        }
        None
    }

    /// Copy one entry (keys and slots) from another equally-shaped storage
    pub fn copy_entry_from(&mut self, dst_entry: usize, src: &ResultSetStorage, src_entry: usize) {
        for key_idx in 0..self.query_mem_desc.key_count() {
            self.write_key(dst_entry, key_idx, src.read_key(src_entry, key_idx));
        }
        self.copy_slots_from(dst_entry, src, src_entry);
    }

    /// Copy the value slots of one entry, preserving raw bits
    pub fn copy_slots_from(&mut self, dst_entry: usize, src: &ResultSetStorage, src_entry: usize) {
        for slot in 0..self.query_mem_desc.slot_count() {
            self.copy_slot_from(dst_entry, src, src_entry, slot);
        }
    }

    /// Copy one value slot, preserving raw bits
    pub fn copy_slot_from(
        &mut self,
        dst_entry: usize,
        src: &ResultSetStorage,
        src_entry: usize,
        slot: usize,
    ) {
        let width = self.query_mem_desc.slot_width(slot);
        let offset = self.query_mem_desc.slot_offset(dst_entry, slot);
        self.write_raw(offset, width, src.read_slot_raw(src_entry, slot));
    }
}

enum SortValue {
    Int(i64),
    Double(f64),
}

impl SortValue {
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            SortValue::Int(v) => *v as f64,
            SortValue::Double(v) => *v,
        }
    }
}

/// Iterator over the logical rows of a result buffer, with typed value
/// extraction and sorting by a target column
pub struct ResultSet {
    target_infos: Vec<TargetInfo>,
    query_mem_desc: QueryMemoryDescriptor,
    storage: Option<ResultSetStorage>,
    string_dict: Option<Arc<StringDictionary>>,
    permutation: Vec<usize>,
    crt_row_idx: usize,
}

impl ResultSet {
    pub fn new(
        target_infos: Vec<TargetInfo>,
        query_mem_desc: QueryMemoryDescriptor,
        string_dict: Option<Arc<StringDictionary>>,
    ) -> Self {
        Self {
            target_infos,
            query_mem_desc,
            storage: None,
            string_dict,
            permutation: Vec::new(),
            crt_row_idx: 0,
        }
    }

    /// Allocate and sentinel-initialize this result set's storage
    pub fn allocate_storage(&mut self) -> &mut ResultSetStorage {
        let mut storage =
            ResultSetStorage::new(self.target_infos.clone(), self.query_mem_desc.clone());
        storage.initialize();
        self.storage.insert(storage)
    }

    pub fn storage(&self) -> Option<&ResultSetStorage> {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> Option<&mut ResultSetStorage> {
        self.storage.as_mut()
    }

    pub fn target_infos(&self) -> &[TargetInfo] {
        &self.target_infos
    }

    pub fn query_mem_desc(&self) -> &QueryMemoryDescriptor {
        &self.query_mem_desc
    }

    pub fn string_dict(&self) -> Option<Arc<StringDictionary>> {
        self.string_dict.clone()
    }

    /// Restart iteration from the first row
    pub fn rewind(&mut self) {
        self.crt_row_idx = 0;
    }

    /// Number of occupied entries (after a top-n sort, the retained count)
    pub fn row_count(&self) -> usize {
        if !self.permutation.is_empty() {
            return self.permutation.len();
        }
        match &self.storage {
            Some(storage) => (0..self.query_mem_desc.entry_count)
                .filter(|&entry| !storage.is_empty_entry(entry))
                .count(),
            None => 0,
        }
    }

    /// Advance to the next occupied entry and materialize its row.
    /// Dictionary-encoded strings resolve through the injected dictionary
    /// when `translate_strings` is set; decimals divide out their scale when
    /// `decimal_to_double` is set.
    pub fn get_next_row(
        &mut self,
        translate_strings: bool,
        decimal_to_double: bool,
    ) -> Option<Vec<TargetValue>> {
        self.storage.as_ref()?;
        loop {
            let entry = if self.permutation.is_empty() {
                if self.crt_row_idx >= self.query_mem_desc.entry_count {
                    return None;
                }
                let entry = self.crt_row_idx;
                self.crt_row_idx += 1;
                if self.storage.as_ref().map_or(true, |s| s.is_empty_entry(entry)) {
                    continue;
                }
                entry
            } else {
                if self.crt_row_idx >= self.permutation.len() {
                    return None;
                }
                let entry = self.permutation[self.crt_row_idx];
                self.crt_row_idx += 1;
                entry
            };
            return self.materialize_row(entry, translate_strings, decimal_to_double);
        }
    }

    fn materialize_row(
        &self,
        entry: usize,
        translate_strings: bool,
        decimal_to_double: bool,
    ) -> Option<Vec<TargetValue>> {
        let storage = self.storage.as_ref()?;
        let mut row = Vec::with_capacity(self.target_infos.len());
        let mut slot = 0;
        for target in &self.target_infos {
            row.push(self.target_value(storage, entry, slot, target, translate_strings, decimal_to_double));
            slot = advance_slot(slot, target);
        }
        Some(row)
    }

    fn target_value(
        &self,
        storage: &ResultSetStorage,
        entry: usize,
        slot: usize,
        target: &TargetInfo,
        translate_strings: bool,
        decimal_to_double: bool,
    ) -> TargetValue {
        if target.is_agg && target.agg_kind == AggKind::Avg {
            let sum = if target.sql_type.is_fp() || target.agg_arg_type.is_fp() {
                storage.read_slot_f64(entry, slot)
            } else {
                storage.read_slot(entry, slot) as f64
            };
            let count = storage.read_slot(entry, slot + 1);
            return TargetValue::Double(if count == 0 { f64::NAN } else { sum / count as f64 });
        }
        if target.sql_type.is_fp() {
            return TargetValue::Double(storage.read_slot_f64(entry, slot));
        }
        if target.sql_type.is_dict_encoded_string() {
            let id = storage.read_slot(entry, slot) as i32;
            if translate_strings {
                return TargetValue::Str(
                    self.string_dict.as_ref().and_then(|dict| dict.string(id)),
                );
            }
            return TargetValue::Int(id as i64);
        }
        let value = storage.read_slot(entry, slot);
        if target.sql_type.is_decimal() && decimal_to_double {
            return TargetValue::Double(value as f64 / 10f64.powi(target.sql_type.scale));
        }
        TargetValue::Int(value)
    }

    /// Stable sort of the occupied entries by the referenced target
    /// columns; `top_n > 0` keeps only the first `top_n` rows
    pub fn sort(&mut self, order_entries: &[OrderEntry], top_n: usize) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        let mut slot_starts = Vec::with_capacity(self.target_infos.len());
        let mut slot = 0;
        for target in &self.target_infos {
            slot_starts.push(slot);
            slot = advance_slot(slot, target);
        }

        let mut permutation: Vec<usize> = (0..self.query_mem_desc.entry_count)
            .filter(|&entry| !storage.is_empty_entry(entry))
            .collect();
        permutation.sort_by(|&a, &b| {
            for order_entry in order_entries {
                let target_idx = (order_entry.tle_no - 1) as usize;
                let lhs = self.sort_value(storage, a, slot_starts[target_idx], target_idx);
                let rhs = self.sort_value(storage, b, slot_starts[target_idx], target_idx);
                let ord = match (lhs, rhs) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => {
                        if order_entry.nulls_first {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    }
                    (Some(_), None) => {
                        if order_entry.nulls_first {
                            Ordering::Greater
                        } else {
                            Ordering::Less
                        }
                    }
                    (Some(lhs), Some(rhs)) => {
                        let ord = lhs.compare(&rhs);
                        if order_entry.is_desc {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if top_n > 0 && top_n < permutation.len() {
            permutation.truncate(top_n);
        }
        self.permutation = permutation;
        self.crt_row_idx = 0;
    }

    /// Comparable value of one target, `None` meaning SQL null
    fn sort_value(
        &self,
        storage: &ResultSetStorage,
        entry: usize,
        slot: usize,
        target_idx: usize,
    ) -> Option<SortValue> {
        let target = &self.target_infos[target_idx];
        if target.is_agg && target.agg_kind == AggKind::Avg {
            let count = storage.read_slot(entry, slot + 1);
            if count == 0 {
                return None;
            }
            let sum = if target.sql_type.is_fp() || target.agg_arg_type.is_fp() {
                storage.read_slot_f64(entry, slot)
            } else {
                storage.read_slot(entry, slot) as f64
            };
            return Some(SortValue::Double(sum / count as f64));
        }
        if target.sql_type.is_fp() {
            let value = storage.read_slot_f64(entry, slot);
            if value == inline_fp_null_val(&target.sql_type) {
                return None;
            }
            return Some(SortValue::Double(value));
        }
        let value = storage.read_slot(entry, slot);
        if value == inline_int_null_val(&target.sql_type) {
            return None;
        }
        Some(SortValue::Int(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::{ColWidths, GroupByHashType};
    use crate::types::{SqlType, SqlTypeInfo};

    fn int_ti() -> SqlTypeInfo {
        SqlTypeInfo::new(SqlType::Int, false)
    }

    fn double_ti() -> SqlTypeInfo {
        SqlTypeInfo::new(SqlType::Double, false)
    }

    fn test_targets() -> Vec<TargetInfo> {
        vec![
            TargetInfo::projected(int_ti()),
            TargetInfo::aggregate(AggKind::Avg, int_ti(), int_ti()),
            TargetInfo::aggregate(AggKind::Sum, int_ti(), int_ti()),
            TargetInfo::projected(double_ti()),
            TargetInfo::projected(SqlTypeInfo::dict_string(false, 1)),
        ]
    }

    fn perfect_desc(targets: &[TargetInfo], width: i8, output_columnar: bool) -> QueryMemoryDescriptor {
        let mut agg_col_widths = Vec::new();
        for target in targets {
            for _ in 0..target.num_slots() {
                let slot_width = (target.sql_type.size as i8).max(width);
                agg_col_widths.push(ColWidths::same(slot_width));
            }
        }
        QueryMemoryDescriptor {
            hash_type: GroupByHashType::OneColKnownRange,
            keyless_hash: false,
            idx_target_as_key: -1,
            min_val: 0,
            max_val: 9,
            entry_count: 10,
            group_col_widths: vec![8],
            agg_col_widths,
            key_column_pad_bytes: Vec::new(),
            output_columnar,
            has_nulls: false,
        }
    }

    /// Write entry values the way a query kernel would: the group's value
    /// into every slot, count 1 into AVG count slots
    fn fill_entry(storage: &mut ResultSetStorage, entry: usize, value: i64) {
        storage.write_key(entry, 0, value);
        let targets = storage.target_infos().to_vec();
        let mut slot = 0;
        for target in &targets {
            if target.sql_type.is_fp() {
                storage.write_slot_f64(entry, slot, value as f64);
            } else if target.sql_type.is_dict_encoded_string() {
                storage.write_slot(entry, slot, -(value + 2));
            } else {
                storage.write_slot(entry, slot, value);
            }
            if target.is_agg && target.agg_kind == AggKind::Avg {
                storage.write_slot(entry, slot + 1, 1);
            }
            slot = advance_slot(slot, target);
        }
    }

    fn check_iteration(mut rs: ResultSet, dict: &StringDictionary) {
        let mut expected = 0i64;
        while let Some(row) = rs.get_next_row(true, false) {
            assert_eq!(row.len(), 5);
            assert_eq!(row[0], TargetValue::Int(expected));
            assert_eq!(row[1], TargetValue::Double(expected as f64));
            assert_eq!(row[2], TargetValue::Int(expected));
            assert_eq!(row[3], TargetValue::Double(expected as f64));
            assert_eq!(row[4].as_str(), Some(expected.to_string().as_str()));
            let _ = dict;
            expected += 2;
        }
        assert_eq!(expected, 10);
    }

    fn iterate_layout(width: i8, output_columnar: bool) {
        let targets = test_targets();
        let desc = perfect_desc(&targets, width, output_columnar);
        let dict = Arc::new(StringDictionary::new());
        for i in 0..5 {
            dict.get_or_add_transient(&(2 * i).to_string());
        }
        let mut rs = ResultSet::new(targets, desc, Some(Arc::clone(&dict)));
        let storage = rs.allocate_storage();
        for i in 0..5 {
            fill_entry(storage, 2 * i, 2 * i as i64);
        }
        assert_eq!(rs.row_count(), 5);
        check_iteration(rs, &dict);
    }

    #[test]
    fn test_iterate_rowwise() {
        iterate_layout(8, false);
    }

    #[test]
    fn test_iterate_rowwise_32() {
        iterate_layout(4, false);
    }

    #[test]
    fn test_iterate_colwise() {
        iterate_layout(8, true);
    }

    #[test]
    fn test_iterate_colwise_32() {
        iterate_layout(4, true);
    }

    #[test]
    fn test_keyless_empty_detection() {
        let targets = vec![TargetInfo::aggregate(AggKind::Count, int_ti(), int_ti())];
        let mut desc = perfect_desc(&targets, 8, false);
        desc.keyless_hash = true;
        desc.idx_target_as_key = 0;
        let mut rs = ResultSet::new(targets, desc, None);
        let storage = rs.allocate_storage();
        storage.write_slot(3, 0, 7);
        storage.write_slot(8, 0, 9);

        assert_eq!(rs.row_count(), 2);
        assert_eq!(rs.get_next_row(false, false), Some(vec![TargetValue::Int(7)]));
        assert_eq!(rs.get_next_row(false, false), Some(vec![TargetValue::Int(9)]));
        assert_eq!(rs.get_next_row(false, false), None);
    }

    #[test]
    fn test_baseline_probe_shares_entries() {
        let targets = vec![TargetInfo::aggregate(AggKind::Sum, int_ti(), int_ti())];
        let mut desc = perfect_desc(&targets, 8, false);
        desc.hash_type = GroupByHashType::MultiCol;
        desc.group_col_widths = vec![8, 8];
        let mut storage = ResultSetStorage::new(targets, desc);
        storage.initialize();

        let (entry, inserted) = storage.find_or_insert(&[5, 6]).unwrap();
        assert!(inserted);
        let (again, inserted_again) = storage.find_or_insert(&[5, 6]).unwrap();
        assert!(!inserted_again);
        assert_eq!(entry, again);
        assert_eq!(storage.read_key(entry, 0), 5);
        assert_eq!(storage.read_key(entry, 1), 6);

        // distinct keys land in distinct entries until the table fills up
        let mut seen = vec![entry];
        for key in 0..9 {
            let (e, inserted) = storage.find_or_insert(&[key, key]).unwrap();
            assert!(inserted);
            assert!(!seen.contains(&e));
            seen.push(e);
        }
        assert!(storage.find_or_insert(&[100, 100]).is_none());
    }

    #[test]
    fn test_avg_zero_count_is_nan() {
        let targets = vec![TargetInfo::aggregate(AggKind::Avg, int_ti(), int_ti())];
        let desc = perfect_desc(&targets, 8, false);
        let mut rs = ResultSet::new(targets, desc, None);
        let storage = rs.allocate_storage();
        storage.write_key(0, 0, 1);
        storage.write_slot(0, 0, 42);
        storage.write_slot(0, 1, 0);

        let row = rs.get_next_row(false, false).unwrap();
        assert!(row[0].as_double().unwrap().is_nan());
    }

    #[test]
    fn test_sort_desc_and_top_n() {
        let targets = test_targets();
        let desc = perfect_desc(&targets, 8, false);
        let mut rs = ResultSet::new(targets, desc, None);
        let storage = rs.allocate_storage();
        for (entry, value) in [(0, 4i64), (3, 10), (5, 2), (9, 8)] {
            fill_entry(storage, entry, value);
        }

        rs.sort(&[OrderEntry::new(1, true, false)], 0);
        let mut seen = Vec::new();
        while let Some(row) = rs.get_next_row(false, false) {
            seen.push(row[0].as_int().unwrap());
        }
        assert_eq!(seen, vec![10, 8, 4, 2]);

        rs.sort(&[OrderEntry::new(1, false, false)], 2);
        assert_eq!(rs.row_count(), 2);
        let mut seen = Vec::new();
        while let Some(row) = rs.get_next_row(false, false) {
            seen.push(row[0].as_int().unwrap());
        }
        assert_eq!(seen, vec![2, 4]);
    }

    #[test]
    fn test_decimal_to_double() {
        let mut decimal_ti = SqlTypeInfo::new(SqlType::Decimal, false);
        decimal_ti.scale = 2;
        let targets = vec![TargetInfo::projected(decimal_ti)];
        let desc = perfect_desc(&targets, 8, false);
        let mut rs = ResultSet::new(targets, desc, None);
        let storage = rs.allocate_storage();
        storage.write_key(0, 0, 1);
        storage.write_slot(0, 0, 12345);

        let row = rs.get_next_row(false, true).unwrap();
        assert_eq!(row[0], TargetValue::Double(123.45));
        rs.rewind();
        let row = rs.get_next_row(false, false).unwrap();
        assert_eq!(row[0], TargetValue::Int(12345));
    }

    #[test]
    fn test_sign_extension_of_narrow_slots() {
        let targets = vec![TargetInfo::projected(int_ti())];
        let desc = perfect_desc(&targets, 4, false);
        let mut storage = ResultSetStorage::new(targets, desc);
        storage.initialize();
        storage.write_slot(0, 0, -7);
        assert_eq!(storage.read_slot(0, 0), -7);
    }
}
