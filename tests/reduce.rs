//! Reduction scenarios checked against an independently computed reference,
//! across both hash shapes, both layouts and a grid of overlap mixes.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use stratabase::query::{
    AggKind, ColWidths, GroupByHashType, OrderEntry, QueryMemoryDescriptor, ResultSet,
    ResultSetManager, ResultSetStorage, TargetInfo, TargetValue,
};
use stratabase::types::{SqlType, SqlTypeInfo};

fn int_ti() -> SqlTypeInfo {
    SqlTypeInfo::new(SqlType::Int, false)
}

/// MIN, MAX, SUM, COUNT, AVG over an integer argument; AVG expands to a
/// sum slot and a count slot, six slots in total
fn agg_targets() -> Vec<TargetInfo> {
    [AggKind::Min, AggKind::Max, AggKind::Sum, AggKind::Count, AggKind::Avg]
        .into_iter()
        .map(|kind| TargetInfo::aggregate(kind, int_ti(), int_ti()))
        .collect()
}

fn descriptor(
    hash_type: GroupByHashType,
    entry_count: usize,
    output_columnar: bool,
    num_slots: usize,
) -> QueryMemoryDescriptor {
    let group_col_widths = if hash_type == GroupByHashType::MultiCol {
        vec![8, 8]
    } else {
        vec![8]
    };
    QueryMemoryDescriptor {
        hash_type,
        keyless_hash: false,
        idx_target_as_key: -1,
        min_val: 0,
        max_val: entry_count as i64 - 1,
        entry_count,
        group_col_widths,
        agg_col_widths: vec![ColWidths::same(8); num_slots],
        key_column_pad_bytes: Vec::new(),
        output_columnar,
        has_nulls: false,
    }
}

/// Reference model: two group maps plus per-group values, merged by the
/// aggregation rules independently of the storage layout
struct Emulator {
    entry_count: usize,
    groups1: Vec<bool>,
    groups2: Vec<bool>,
    values1: Vec<i64>,
    values2: Vec<i64>,
}

fn pick_groups(entry_count: usize, percent: usize, rng: &mut StdRng) -> Vec<bool> {
    let mut indices: Vec<usize> = (0..entry_count).collect();
    indices.shuffle(rng);
    let mut groups = vec![false; entry_count];
    for &index in indices.iter().take(entry_count * percent / 100) {
        groups[index] = true;
    }
    groups
}

impl Emulator {
    fn generate(entry_count: usize, percent1: usize, percent2: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let groups1 = pick_groups(entry_count, percent1, &mut rng);
        let groups2 = pick_groups(entry_count, percent2, &mut rng);
        Self::with_groups(entry_count, groups1, groups2)
    }

    fn with_groups(entry_count: usize, groups1: Vec<bool>, groups2: Vec<bool>) -> Self {
        // distinct non-zero values, offset so overlapping groups exercise
        // asymmetric MIN/MAX
        let values1 = (0..entry_count).map(|i| 2 * (i as i64 + 1)).collect();
        let values2 = (0..entry_count).map(|i| 2 * (i as i64 + 1) + 10).collect();
        Self { entry_count, groups1, groups2, values1, values2 }
    }

    /// `[min, max, sum, count, 2 * avg]` per occupied group, in group order
    fn reference_rows(&self) -> Vec<[i64; 5]> {
        (0..self.entry_count)
            .filter_map(|i| {
                let (v1, v2) = (self.values1[i], self.values2[i]);
                match (self.groups1[i], self.groups2[i]) {
                    (true, true) => {
                        Some([v1.min(v2), v1.max(v2), v1 + v2, v1 + v2, v1 + v2])
                    }
                    (true, false) => Some([v1, v1, v1, v1, 2 * v1]),
                    (false, true) => Some([v2, v2, v2, v2, 2 * v2]),
                    (false, false) => None,
                }
            })
            .collect()
    }
}

/// The group's value into every aggregate slot, count 1 into the AVG count
fn write_agg_slots(storage: &mut ResultSetStorage, entry: usize, value: i64) {
    for slot in 0..4 {
        storage.write_slot(entry, slot, value);
    }
    storage.write_slot(entry, 4, value);
    storage.write_slot(entry, 5, 1);
}

fn fill_perfect(storage: &mut ResultSetStorage, groups: &[bool], values: &[i64]) {
    for (entry, &occupied) in groups.iter().enumerate() {
        if occupied {
            storage.write_key(entry, 0, 2 * entry as i64);
            write_agg_slots(storage, entry, values[entry]);
        }
    }
}

fn fill_keyless(storage: &mut ResultSetStorage, groups: &[bool], values: &[i64]) {
    for (entry, &occupied) in groups.iter().enumerate() {
        if occupied {
            write_agg_slots(storage, entry, values[entry]);
        }
    }
}

fn baseline_key(group: usize) -> [i64; 2] {
    [100 + group as i64, 200 + group as i64]
}

fn fill_baseline(storage: &mut ResultSetStorage, groups: &[bool], values: &[i64]) {
    for (group, &occupied) in groups.iter().enumerate() {
        if !occupied {
            continue;
        }
        let (entry, inserted) = storage.find_or_insert(&baseline_key(group)).unwrap();
        assert!(inserted);
        write_agg_slots(storage, entry, values[group]);
    }
}

fn row_tuple(row: &[TargetValue]) -> [i64; 5] {
    let avg = row[4].as_double().unwrap();
    [
        row[0].as_int().unwrap(),
        row[1].as_int().unwrap(),
        row[2].as_int().unwrap(),
        row[3].as_int().unwrap(),
        (avg * 2.0).round() as i64,
    ]
}

fn collect_tuples(reduced: &mut ResultSet) -> Vec<[i64; 5]> {
    let mut rows = Vec::new();
    while let Some(row) = reduced.get_next_row(false, false) {
        rows.push(row_tuple(&row));
    }
    rows
}

fn run_perfect_case(output_columnar: bool, percent1: usize, percent2: usize, seed: u64) {
    let entry_count = 20;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, output_columnar, 6);
    let emulator = Emulator::generate(entry_count, percent1, percent2, seed);

    let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
    fill_perfect(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
    let mut rs2 = ResultSet::new(targets, desc, None);
    fill_perfect(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);

    let mut reduced = ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap();
    let expected = emulator.reference_rows();
    assert_eq!(reduced.row_count(), expected.len());

    // a perfect hash iterates in entry order, matching the reference order
    let actual = collect_tuples(&mut reduced);
    assert_eq!(actual, expected, "columnar={output_columnar} {percent1}/{percent2}");
}

fn run_baseline_case(output_columnar: bool, percent1: usize, percent2: usize, seed: u64) {
    let entry_count = 20;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::MultiCol, entry_count, output_columnar, 6);
    let emulator = Emulator::generate(entry_count, percent1, percent2, seed);

    let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
    fill_baseline(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
    let mut rs2 = ResultSet::new(targets, desc, None);
    fill_baseline(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);

    let mut reduced = ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap();
    let mut expected = emulator.reference_rows();
    assert_eq!(reduced.row_count(), expected.len());

    // baseline entries land in probe order; compare as sorted row sets
    let mut actual = collect_tuples(&mut reduced);
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected, "columnar={output_columnar} {percent1}/{percent2}");
}

const OVERLAP_GRID: [(usize, usize); 8] =
    [(25, 25), (25, 75), (50, 50), (75, 25), (95, 5), (25, 100), (100, 25), (100, 100)];

const BASELINE_GRID: [(usize, usize); 5] = [(10, 20), (25, 75), (50, 50), (75, 25), (100, 100)];

#[test]
fn perfect_hash_rowwise_overlap_grid() {
    for (case, &(p1, p2)) in OVERLAP_GRID.iter().enumerate() {
        run_perfect_case(false, p1, p2, 1_000 + case as u64);
    }
}

#[test]
fn perfect_hash_colwise_overlap_grid() {
    for (case, &(p1, p2)) in OVERLAP_GRID.iter().enumerate() {
        run_perfect_case(true, p1, p2, 2_000 + case as u64);
    }
}

#[test]
fn baseline_hash_rowwise_overlap_grid() {
    for (case, &(p1, p2)) in BASELINE_GRID.iter().enumerate() {
        run_baseline_case(false, p1, p2, 3_000 + case as u64);
    }
}

#[test]
fn baseline_hash_colwise_overlap_grid() {
    for (case, &(p1, p2)) in BASELINE_GRID.iter().enumerate() {
        run_baseline_case(true, p1, p2, 4_000 + case as u64);
    }
}

#[test]
fn keyless_perfect_hash_reduce() {
    let entry_count = 10;
    let targets = agg_targets();
    let mut desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, false, 6);
    desc.keyless_hash = true;
    desc.idx_target_as_key = 0;

    let groups1: Vec<bool> = (0..entry_count).map(|i| i % 2 == 0).collect();
    let groups2: Vec<bool> = (0..entry_count).map(|i| i < 3).collect();
    let emulator = Emulator::with_groups(entry_count, groups1, groups2);

    let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
    fill_keyless(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
    let mut rs2 = ResultSet::new(targets, desc, None);
    fill_keyless(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);

    let mut reduced = ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap();
    assert_eq!(collect_tuples(&mut reduced), emulator.reference_rows());
}

#[test]
fn full_overlap_hundred_entries() {
    // every entry occupied in both inputs: key 2i, every slot i, AVG {i, 1}
    let entry_count = 100;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, false, 6);

    let make = || {
        let mut rs = ResultSet::new(targets.clone(), desc.clone(), None);
        let storage = rs.allocate_storage();
        for entry in 0..entry_count {
            storage.write_key(entry, 0, 2 * entry as i64);
            write_agg_slots(storage, entry, entry as i64);
        }
        rs
    };

    let mut reduced = ResultSetManager::new().reduce(vec![make(), make()]).unwrap();
    assert_eq!(reduced.row_count(), entry_count);
    let mut entry = 0i64;
    while let Some(row) = reduced.get_next_row(false, false) {
        assert_eq!(row[0], TargetValue::Int(entry));
        assert_eq!(row[1], TargetValue::Int(entry));
        assert_eq!(row[2], TargetValue::Int(2 * entry));
        assert_eq!(row[3], TargetValue::Int(2 * entry));
        assert_eq!(row[4], TargetValue::Double(entry as f64));
        entry += 1;
    }
    assert_eq!(entry, entry_count as i64);
}

#[test]
fn disjoint_halves_interleave() {
    // odd and even entries from different inputs, values 10 and 20
    let entry_count = 100;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, false, 6);

    let make = |parity: usize, value: i64| {
        let mut rs = ResultSet::new(targets.clone(), desc.clone(), None);
        let storage = rs.allocate_storage();
        for entry in (parity..entry_count).step_by(2) {
            storage.write_key(entry, 0, entry as i64);
            write_agg_slots(storage, entry, value);
        }
        rs
    };

    let mut reduced = ResultSetManager::new()
        .reduce(vec![make(0, 10), make(1, 20)])
        .unwrap();
    assert_eq!(reduced.row_count(), entry_count);
    let mut mins = Vec::new();
    while let Some(row) = reduced.get_next_row(false, false) {
        mins.push(row[0].as_int().unwrap());
    }
    let expected: Vec<i64> = (0..entry_count).map(|i| if i % 2 == 0 { 10 } else { 20 }).collect();
    assert_eq!(mins, expected);
}

#[test]
fn baseline_colwise_partial_overlap() {
    // 5 keys at value 7, 15 keys at value 3, sharing exactly 2 keys
    let entry_count = 20;
    let targets = vec![TargetInfo::aggregate(AggKind::Sum, int_ti(), int_ti())];
    let desc = descriptor(GroupByHashType::MultiCol, entry_count, true, 1);

    let fill = |rs: &mut ResultSet, keys: std::ops::Range<usize>, value: i64| {
        let storage = rs.allocate_storage();
        for group in keys {
            let (entry, inserted) = storage.find_or_insert(&baseline_key(group)).unwrap();
            assert!(inserted);
            storage.write_slot(entry, 0, value);
        }
    };

    let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
    fill(&mut rs1, 0..5, 7);
    let mut rs2 = ResultSet::new(targets, desc, None);
    fill(&mut rs2, 3..18, 3);

    let mut reduced = ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap();
    assert_eq!(reduced.row_count(), 5 + 15 - 2);

    let mut sums = Vec::new();
    while let Some(row) = reduced.get_next_row(false, false) {
        sums.push(row[0].as_int().unwrap());
    }
    sums.sort_unstable();
    let mut expected = vec![3i64; 13];
    expected.extend([7i64; 3]);
    expected.extend([10i64; 2]);
    expected.sort_unstable();
    assert_eq!(sums, expected);
}

#[test]
fn reduce_is_commutative() {
    for columnar in [false, true] {
        let entry_count = 20;
        let targets = agg_targets();
        let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, columnar, 6);
        let emulator = Emulator::generate(entry_count, 50, 50, 77);

        let forward = {
            let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
            fill_perfect(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
            let mut rs2 = ResultSet::new(targets.clone(), desc.clone(), None);
            fill_perfect(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);
            collect_tuples(&mut ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap())
        };
        let backward = {
            let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
            fill_perfect(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
            let mut rs2 = ResultSet::new(targets.clone(), desc.clone(), None);
            fill_perfect(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);
            collect_tuples(&mut ResultSetManager::new().reduce(vec![rs2, rs1]).unwrap())
        };
        assert_eq!(forward, backward);
    }
}

#[test]
fn reduce_is_associative() {
    let entry_count = 12;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, false, 6);

    let groups: [Vec<bool>; 3] = [
        (0..entry_count).map(|i| i % 2 == 0).collect(),
        (0..entry_count).map(|i| i % 3 == 0).collect(),
        (0..entry_count).map(|i| i >= 6).collect(),
    ];
    let values: [Vec<i64>; 3] = [
        (0..entry_count).map(|i| 3 * (i as i64 + 1)).collect(),
        (0..entry_count).map(|i| 5 * (i as i64 + 1)).collect(),
        (0..entry_count).map(|i| 7 * (i as i64 + 1)).collect(),
    ];
    let make = |which: usize| {
        let mut rs = ResultSet::new(targets.clone(), desc.clone(), None);
        fill_perfect(rs.allocate_storage(), &groups[which], &values[which]);
        rs
    };

    let mut manager = ResultSetManager::new();
    let left = {
        let ab = manager.reduce(vec![make(0), make(1)]).unwrap();
        collect_tuples(&mut manager.reduce(vec![ab, make(2)]).unwrap())
    };
    let right = {
        let bc = manager.reduce(vec![make(1), make(2)]).unwrap();
        collect_tuples(&mut manager.reduce(vec![make(0), bc]).unwrap())
    };
    let all_at_once = collect_tuples(&mut manager.reduce(vec![make(0), make(1), make(2)]).unwrap());
    assert_eq!(left, right);
    assert_eq!(left, all_at_once);
}

#[test]
fn reduced_set_sorts_by_target_column() {
    let entry_count = 20;
    let targets = agg_targets();
    let desc = descriptor(GroupByHashType::OneColKnownRange, entry_count, false, 6);
    let emulator = Emulator::generate(entry_count, 75, 25, 11);

    let mut rs1 = ResultSet::new(targets.clone(), desc.clone(), None);
    fill_perfect(rs1.allocate_storage(), &emulator.groups1, &emulator.values1);
    let mut rs2 = ResultSet::new(targets, desc, None);
    fill_perfect(rs2.allocate_storage(), &emulator.groups2, &emulator.values2);

    let mut reduced = ResultSetManager::new().reduce(vec![rs1, rs2]).unwrap();
    reduced.sort(&[OrderEntry::new(1, false, false)], 0);

    let rows = collect_tuples(&mut reduced);
    let mut sorted = rows.clone();
    sorted.sort_by_key(|row| row[0]);
    assert_eq!(rows, sorted);
    assert_eq!(rows.len(), emulator.reference_rows().len());
}
