use crate::{Label, LabelTable, LayoutError};

#[test]
fn create_is_sequential() {
    let mut table = LabelTable::new();
    assert!(table.is_empty());

    let a = table.create();
    let b = table.create();

    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(table.len(), 2);
    assert_eq!(b.to_string(), "L1");
}

#[test]
fn bind_once() {
    let mut table = LabelTable::new();
    let l = table.create();

    assert!(!table.is_bound(l));
    table.bind(l, 16).unwrap();
    assert_eq!(table.value(l), Ok(16));

    let err = table.bind(l, 32).unwrap_err();
    assert_eq!(
        err,
        LayoutError::DuplicateBinding {
            label: l,
            first: 16,
            second: 32,
        }
    );
    insta::assert_snapshot!(err, @"label L0 bound twice (at 16 and 32)");
    assert_eq!(table.value(l), Ok(16));
}

#[test]
fn unbound_value() {
    let mut table = LabelTable::new();
    let l = table.create();

    let err = table.value(l).unwrap_err();

    insta::assert_snapshot!(err, @"label L0 is referenced but never bound");
}

#[test]
fn foreign_label() {
    let mut other = LabelTable::new();
    other.create();
    let foreign: Label = other.create();

    let mut table = LabelTable::new();
    table.create();

    assert!(!table.contains(foreign));
    assert_eq!(
        table.bind(foreign, 0),
        Err(LayoutError::UnresolvedReference { label: foreign })
    );
    assert!(table.referrers(foreign).is_empty());
}

#[test]
fn iter_bound_skips_unbound() {
    let mut table = LabelTable::new();
    let a = table.create();
    let _b = table.create();
    let c = table.create();
    table.bind(c, 9).unwrap();
    table.bind(a, 3).unwrap();

    let bound: Vec<_> = table.iter_bound().collect();

    assert_eq!(bound, vec![(a, 3), (c, 9)]);
}

#[test]
fn referrers_deduplicate_per_item() {
    let mut table = LabelTable::new();
    let l = table.create();
    table.add_ref(l, 2);
    table.add_ref(l, 2);
    table.add_ref(l, 5);

    assert_eq!(table.referrers(l), &[2, 5]);
}
