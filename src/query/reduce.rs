//! Pairwise reduction of equally-shaped result sets
//!
//! Partial aggregation results produced by independent query kernels are
//! folded into one result set. Perfect-hash shapes merge entry-by-entry
//! into the first input (source index equals destination index); baseline
//! shapes probe a fresh destination table with the same open-addressing
//! scheme the writers used. A destination entry that is still empty takes
//! the occupied source entry verbatim, which is the aggregation identity
//! combined with the source for every supported kind.

use crate::query::descriptor::{advance_slot, AggKind, GroupByHashType, TargetInfo};
use crate::query::result_set::{ResultSet, ResultSetStorage};
use crate::types::{inline_fp_null_val, inline_int_null_val};
use crate::{Result, StrataError};

/// Folds result sets produced by parallel kernels into one
#[derive(Default)]
pub struct ResultSetManager;

impl ResultSetManager {
    pub fn new() -> Self {
        Self
    }

    /// Reduce `result_sets` pairwise into a single result set.
    ///
    /// All inputs must share one layout descriptor and target list.
    pub fn reduce(&mut self, result_sets: Vec<ResultSet>) -> Result<ResultSet> {
        let mut inputs = result_sets.into_iter();
        let Some(first) = inputs.next() else {
            return Err(StrataError::CorruptChunk(
                "reduce requires at least one result set".into(),
            ));
        };

        match first.query_mem_desc().hash_type {
            GroupByHashType::OneColKnownRange | GroupByHashType::MultiColPerfectHash => {
                let mut acc = first;
                if acc.storage().is_none() {
                    acc.allocate_storage();
                }
                for result_set in inputs {
                    check_shape(&acc, &result_set)?;
                    reduce_perfect_hash(&mut acc, &result_set)?;
                }
                acc.rewind();
                Ok(acc)
            }
            GroupByHashType::MultiCol => {
                let mut acc = ResultSet::new(
                    first.target_infos().to_vec(),
                    first.query_mem_desc().clone(),
                    first.string_dict(),
                );
                acc.allocate_storage();
                reduce_baseline(&mut acc, &first)?;
                for result_set in inputs {
                    check_shape(&acc, &result_set)?;
                    reduce_baseline(&mut acc, &result_set)?;
                }
                Ok(acc)
            }
        }
    }
}

fn check_shape(a: &ResultSet, b: &ResultSet) -> Result<()> {
    let (da, db) = (a.query_mem_desc(), b.query_mem_desc());
    if da.hash_type != db.hash_type
        || da.entry_count != db.entry_count
        || da.output_columnar != db.output_columnar
        || a.target_infos().len() != b.target_infos().len()
    {
        return Err(StrataError::CorruptChunk("result set shapes differ".into()));
    }
    Ok(())
}

/// Perfect hash: the destination entry of a group is the source entry index
fn reduce_perfect_hash(dst_rs: &mut ResultSet, src_rs: &ResultSet) -> Result<()> {
    let Some(src) = src_rs.storage() else {
        return Ok(());
    };
    let targets = src_rs.target_infos().to_vec();
    let dst = dst_rs
        .storage_mut()
        .ok_or_else(|| StrataError::CorruptChunk("reduction destination has no storage".into()))?;
    for entry in 0..src.query_mem_desc().entry_count {
        if src.is_empty_entry(entry) {
            continue;
        }
        if dst.is_empty_entry(entry) {
            dst.copy_entry_from(entry, src, entry);
            continue;
        }
        combine_entry(dst, entry, src, entry, &targets);
    }
    Ok(())
}

/// Baseline hash: probe the destination with the writer's scheme and insert
/// missing groups
fn reduce_baseline(dst_rs: &mut ResultSet, src_rs: &ResultSet) -> Result<()> {
    let Some(src) = src_rs.storage() else {
        return Ok(());
    };
    let targets = src_rs.target_infos().to_vec();
    let key_count = src.query_mem_desc().key_count();
    let dst = dst_rs
        .storage_mut()
        .ok_or_else(|| StrataError::CorruptChunk("reduction destination has no storage".into()))?;
    for entry in 0..src.query_mem_desc().entry_count {
        if src.is_empty_entry(entry) {
            continue;
        }
        let key: Vec<i64> = (0..key_count).map(|k| src.read_key(entry, k)).collect();
        let (dst_entry, inserted) =
            dst.find_or_insert(&key).ok_or(StrataError::StorageExhausted)?;
        if inserted {
            dst.copy_slots_from(dst_entry, src, entry);
        } else {
            combine_entry(dst, dst_entry, src, entry, &targets);
        }
    }
    Ok(())
}

/// Combine every target of one occupied source entry into an occupied
/// destination entry
fn combine_entry(
    dst: &mut ResultSetStorage,
    dst_entry: usize,
    src: &ResultSetStorage,
    src_entry: usize,
    targets: &[TargetInfo],
) {
    let mut slot = 0;
    for target in targets {
        combine_slot(dst, dst_entry, src, src_entry, slot, target);
        slot = advance_slot(slot, target);
    }
}

fn combine_slot(
    dst: &mut ResultSetStorage,
    dst_entry: usize,
    src: &ResultSetStorage,
    src_entry: usize,
    slot: usize,
    target: &TargetInfo,
) {
    let fp = target.sql_type.is_fp();
    if !target.is_agg {
        // a projected column carries the same group value on both sides
        dst.copy_slot_from(dst_entry, src, src_entry, slot);
        return;
    }
    if target.skip_null_val && source_is_null(src, src_entry, slot, target, fp) {
        return;
    }
    match target.agg_kind {
        AggKind::Min => {
            if fp {
                let merged = dst.read_slot_f64(dst_entry, slot).min(src.read_slot_f64(src_entry, slot));
                dst.write_slot_f64(dst_entry, slot, merged);
            } else {
                let merged = dst.read_slot(dst_entry, slot).min(src.read_slot(src_entry, slot));
                dst.write_slot(dst_entry, slot, merged);
            }
        }
        AggKind::Max => {
            if fp {
                let merged = dst.read_slot_f64(dst_entry, slot).max(src.read_slot_f64(src_entry, slot));
                dst.write_slot_f64(dst_entry, slot, merged);
            } else {
                let merged = dst.read_slot(dst_entry, slot).max(src.read_slot(src_entry, slot));
                dst.write_slot(dst_entry, slot, merged);
            }
        }
        AggKind::Sum | AggKind::Count => {
            add_slot(dst, dst_entry, src, src_entry, slot, fp);
        }
        AggKind::Avg => {
            // running sum and running count combine independently
            let sum_fp = fp || target.agg_arg_type.is_fp();
            add_slot(dst, dst_entry, src, src_entry, slot, sum_fp);
            add_slot(dst, dst_entry, src, src_entry, slot + 1, false);
        }
    }
}

fn add_slot(
    dst: &mut ResultSetStorage,
    dst_entry: usize,
    src: &ResultSetStorage,
    src_entry: usize,
    slot: usize,
    fp: bool,
) {
    if fp {
        let merged = dst.read_slot_f64(dst_entry, slot) + src.read_slot_f64(src_entry, slot);
        dst.write_slot_f64(dst_entry, slot, merged);
    } else {
        let merged = dst
            .read_slot(dst_entry, slot)
            .wrapping_add(src.read_slot(src_entry, slot));
        dst.write_slot(dst_entry, slot, merged);
    }
}

fn source_is_null(
    src: &ResultSetStorage,
    entry: usize,
    slot: usize,
    target: &TargetInfo,
    fp: bool,
) -> bool {
    if fp {
        src.read_slot_f64(entry, slot) == inline_fp_null_val(&target.sql_type)
    } else {
        src.read_slot(entry, slot) == inline_int_null_val(&target.sql_type)
    }
}
