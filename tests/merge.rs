mod common;

use linecov::aggregator::CoverageAggregator;
use linecov::gcov;
use linecov::merge::{merge, Inconsistency};
use linecov::model::SourceLocation;

#[test]
fn fold_then_merge_with_persisted_prior() {
    let prior = gcov::read("file:test.sl\nlcount:2,3\nlcount:9,1\nfile:gone.sl\nlcount:1,4\n").unwrap();

    let agg = CoverageAggregator::new();
    for _ in 0..20 {
        agg.record_entry(&SourceLocation::new("test.sl", 9));
    }
    let never = [SourceLocation::new("test.sl", 2), SourceLocation::new("test.sl", 11)];
    let current = agg.fold(&never, |_| 12).coverage;

    let merged = merge(current, &prior);

    assert!(merged.is_consistent());
    let lines = merged.coverage.get("test.sl").unwrap();
    assert_eq!(lines.len(), 12);
    assert_eq!(lines[1], Some(3));
    assert_eq!(lines[8], Some(20));
    assert_eq!(lines[10], Some(0));
    assert_eq!(merged.coverage.get("gone.sl").unwrap(), &vec![Some(4)]);
}

#[test]
fn self_merge_survives_the_persisted_format() {
    let x = common::coverage(&[
        ("a.sl", vec![None, Some(0), Some(7)]),
        ("b.sl", vec![Some(3), None, Some(1)]),
    ]);

    let merged = merge(x.clone(), &x);
    let read_back = gcov::read(&gcov::write(&merged.coverage)).unwrap();

    assert_eq!(read_back, x);
}

#[test]
fn merge_order_matters_when_statement_hood_disagrees() {
    let a = common::coverage(&[("f", vec![Some(2), None])]);
    let b = common::coverage(&[("f", vec![None, Some(5)])]);

    let ab = merge(a.clone(), &b);
    let ba = merge(b, &a);

    // Both directions keep every known count.
    assert_eq!(ab.coverage.get("f").unwrap(), &vec![Some(2), Some(5)]);
    assert_eq!(ba.coverage.get("f").unwrap(), &vec![Some(2), Some(5)]);
    // ...but each reports the other side's statement as vanished.
    assert_eq!(
        ab.inconsistencies,
        vec![Inconsistency::StatementVanished { file: "f".to_string(), line: 2 }]
    );
    assert_eq!(
        ba.inconsistencies,
        vec![Inconsistency::StatementVanished { file: "f".to_string(), line: 1 }]
    );
}
