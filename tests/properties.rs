//! Property tests for the map/reduce pipeline.
//!
//! Measures are drawn from values with short binary expansions, so every
//! sum is exact and reports can be compared with `==` regardless of the
//! order in which partials are merged.

use proptest::prelude::*;
use q1lite::{
    aggregate_shard, map_shard, partition_of, reduce, reduce_by_partition, tree_reduce,
    GroupKey, NumPartitions, PartialTable, PartitionedRows, Record,
};

const DISCOUNTS: [f64; 4] = [0.0, 0.125, 0.25, 0.5];
const TAXES: [f64; 4] = [0.0, 0.125, 0.25, 0.5];

fn arb_record() -> impl Strategy<Value = Record> {
    (
        prop::sample::select(vec!['A', 'N', 'R']),
        prop::sample::select(vec!['F', 'O']),
        1u32..=50,
        1u32..=100_000,
        0usize..4,
        0usize..4,
    )
        .prop_map(|(r, l, qty, price, d, t)| {
            Record::new(
                r,
                l,
                f64::from(qty),
                f64::from(price) / 4.0,
                DISCOUNTS[d],
                TAXES[t],
            )
        })
}

/// Records plus a sorted list of cut points splitting them into shards.
fn arb_sharded() -> impl Strategy<Value = (Vec<Record>, Vec<usize>)> {
    prop::collection::vec(arb_record(), 0..200).prop_flat_map(|records| {
        let len = records.len();
        let cuts = prop::collection::vec(0..=len, 0..8).prop_map(|mut cuts| {
            cuts.sort_unstable();
            cuts
        });
        (Just(records), cuts)
    })
}

fn shards<'a>(records: &'a [Record], cuts: &[usize]) -> Vec<&'a [Record]> {
    let mut out = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        out.push(&records[start..cut]);
        start = cut;
    }
    out.push(&records[start..]);
    out
}

fn partials(records: &[Record], cuts: &[usize]) -> Vec<PartialTable> {
    shards(records, cuts)
        .into_iter()
        .map(|s| aggregate_shard(s))
        .collect()
}

proptest! {
    #[test]
    fn sharding_does_not_change_the_report((records, cuts) in arb_sharded()) {
        let whole = reduce([aggregate_shard(&records)]).unwrap();
        let sharded = reduce(partials(&records, &cuts)).unwrap();
        prop_assert_eq!(&whole, &sharded);
    }

    #[test]
    fn merge_order_does_not_matter((records, cuts) in arb_sharded()) {
        let mut tables = partials(&records, &cuts);
        let forward = reduce(tables.clone()).unwrap();
        tables.reverse();
        prop_assert_eq!(&forward, &reduce(tables.clone()).unwrap());
        prop_assert_eq!(&forward, &tree_reduce(tables).unwrap());
    }

    #[test]
    fn partition_scoped_reduce_agrees(
        (records, cuts) in arb_sharded(),
        n in 1usize..12,
    ) {
        let n = NumPartitions::new(n).unwrap();
        let flat = reduce(partials(&records, &cuts)).unwrap();
        let scoped = reduce_by_partition(
            shards(&records, &cuts).into_iter().map(|s| map_shard(s, n).partitions),
        )
        .unwrap();
        prop_assert_eq!(flat, scoped);
    }

    #[test]
    fn counts_are_conserved((records, cuts) in arb_sharded()) {
        let report = reduce(partials(&records, &cuts)).unwrap();
        let total: u64 = report.rows().iter().map(|r| r.count).sum();
        prop_assert_eq!(total, records.len() as u64);
        for row in report.rows() {
            let expected = records.iter().filter(|r| r.key() == row.key).count() as u64;
            prop_assert_eq!(row.count, expected);
        }
    }

    #[test]
    fn averages_come_from_global_totals((records, cuts) in arb_sharded()) {
        let report = reduce(partials(&records, &cuts)).unwrap();
        for row in report.rows() {
            let group = records.iter().filter(|r| r.key() == row.key).collect::<Vec<_>>();
            let qty: f64 = group.iter().map(|r| r.quantity).sum();
            let disc: f64 = group.iter().map(|r| r.discount).sum();
            prop_assert_eq!(row.avg_qty, qty / group.len() as f64);
            prop_assert_eq!(row.avg_discount, disc / group.len() as f64);
        }
    }

    #[test]
    fn partition_assignment_is_deterministic(
        r in prop::char::range('A', 'Z'),
        l in prop::char::range('A', 'Z'),
        n in 1usize..1000,
    ) {
        let key = GroupKey::new(r, l);
        let n = NumPartitions::new(n).unwrap();
        let p = partition_of(&key, n);
        prop_assert!(p < n.get());
        prop_assert_eq!(p, partition_of(&GroupKey::new(r, l), n));
    }

    #[test]
    fn offsets_are_idempotent(
        records in prop::collection::vec(arb_record(), 0..100),
        n in 1usize..12,
    ) {
        let n = NumPartitions::new(n).unwrap();
        let parts = map_shard(&records, n).partitions;
        let again = PartitionedRows::from_sorted(parts.rows().to_vec(), n).unwrap();
        prop_assert_eq!(parts.offsets(), again.offsets());
        prop_assert_eq!(parts.offsets().len(), n.get() as usize);

        // every row lies in the range of its own partition
        for p in n.ids() {
            for row in &parts.rows()[parts.range(p)] {
                prop_assert_eq!(row.partition, p);
            }
        }
    }
}
