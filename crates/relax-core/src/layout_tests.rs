//! Tests for branch-relaxation layout.

use crate::test_utils::Toy;
use crate::{LayoutConfig, LayoutEngine, LayoutError, SourcePos, Stream};

fn engine() -> LayoutEngine {
    LayoutEngine::new(LayoutConfig::new().record_history(true))
}

fn assert_monotonic(history: &[Vec<u32>]) {
    for pair in history.windows(2) {
        for (idx, (before, after)) in pair[0].iter().zip(&pair[1]).enumerate() {
            assert!(after >= before, "item {idx} shrank from {before} to {after}");
        }
    }
}

#[test]
fn empty_stream() {
    let stream: Stream<Toy> = Stream::new();
    let (layout, bytes) = engine().assemble(&stream).unwrap();

    assert_eq!(layout.size(), 0);
    assert_eq!(layout.passes(), 2);
    assert!(bytes.is_empty());
}

#[test]
fn forward_branch_stays_short() {
    let mut s = Stream::new();
    let target = s.label();
    s.push(Toy::Branch(target));
    s.push(Toy::Fixed(10));
    s.place(target);

    let (layout, bytes) = engine().assemble(&s).unwrap();

    assert_eq!(layout.lengths(), &[2, 10, 0]);
    assert_eq!(layout.label(target), Ok(12));
    assert_eq!(&bytes[..2], &[0xB0, 10]);
    assert_eq!(bytes.len(), 12);
}

#[test]
fn forward_branch_relaxes_to_long_form() {
    let mut s = Stream::new();
    let target = s.label();
    s.push(Toy::Branch(target));
    s.push(Toy::Fixed(200));
    s.place(target);

    let (layout, bytes) = engine().assemble(&s).unwrap();

    assert_eq!(layout.length(0), 5);
    assert_eq!(layout.label(target), Ok(205));
    assert_eq!(&bytes[..5], &[0xB1, 200, 0, 0, 0]);
}

#[test]
fn backward_branch() {
    let mut s = Stream::new();
    let top = s.label();
    s.place(top);
    s.push(Toy::Fixed(100));
    s.push(Toy::Branch(top));

    let (layout, bytes) = engine().assemble(&s).unwrap();

    assert_eq!(layout.length(2), 2);
    assert_eq!(&bytes[100..], &[0xB0, (-102i8) as u8]);
}

#[test]
fn backward_branch_at_boundary() {
    // rel8 reaches back exactly 128 bytes from the end of the branch
    let mut s = Stream::new();
    let top = s.label();
    s.place(top);
    s.push(Toy::Fixed(126));
    s.push(Toy::Branch(top));
    let layout = engine().run(&s).unwrap();
    assert_eq!(layout.length(2), 2);

    let mut s = Stream::new();
    let top = s.label();
    s.place(top);
    s.push(Toy::Fixed(127));
    s.push(Toy::Branch(top));
    let layout = engine().run(&s).unwrap();
    assert_eq!(layout.length(2), 5);
}

#[test]
fn cascading_growth() {
    // The second branch grows first, pushing the first one out of rel8 range.
    let mut s = Stream::new();
    let a = s.label();
    let b = s.label();
    s.push(Toy::Branch(a));
    s.push(Toy::Fixed(124));
    s.push(Toy::Branch(b));
    s.place(a);
    s.push(Toy::Fixed(130));
    s.place(b);

    let (layout, bytes) = engine().assemble(&s).unwrap();

    assert_eq!(layout.length(0), 5);
    assert_eq!(layout.length(2), 5);
    assert_eq!(layout.label(a), Ok(134));
    assert_eq!(layout.label(b), Ok(264));
    assert_eq!(&bytes[..5], &[0xB1, 129, 0, 0, 0]);
    assert!(layout.passes() >= 3);
    assert_monotonic(layout.history());
}

#[test]
fn forward_jump_over_fifty_instructions() {
    let mut s = Stream::new();
    let done = s.label();
    s.push(Toy::Branch(done));
    for _ in 0..50 {
        s.push(Toy::Fixed(3));
    }
    s.place(done);

    let (layout, bytes) = engine().assemble(&s).unwrap();

    // 150 bytes in between: the optimistic rel8 guess cannot hold
    assert_eq!(layout.length(0), 5);
    assert_eq!(layout.label(done), Ok(155));
    assert_eq!(&bytes[..5], &[0xB1, 150, 0, 0, 0]);
}

#[test]
fn emitted_lengths_match_measured() {
    let mut s = Stream::new();
    let labels: Vec<_> = (0..6).map(|_| s.label()).collect();
    for (i, &l) in labels.iter().enumerate() {
        s.push(Toy::Branch(labels[(i + 3) % labels.len()]));
        s.push(Toy::Fixed(40 * i as u32 + 1));
        s.push(Toy::Align(4));
        s.place(l);
    }

    let layout = engine().run(&s).unwrap();
    let bytes = engine().emit(&s, &layout).unwrap();

    assert_eq!(bytes.len() as u32, layout.size());
    let total: u32 = layout.lengths().iter().sum();
    assert_eq!(total, layout.size());
    for (idx, _) in s.segments() {
        let next = layout
            .offsets()
            .get(idx + 1)
            .copied()
            .unwrap_or(layout.size());
        assert_eq!(next - layout.offset(idx), layout.length(idx));
    }
    assert_monotonic(layout.history());
}

#[test]
fn rerun_is_idempotent() {
    let mut s = Stream::new();
    let a = s.label();
    let b = s.label();
    s.push(Toy::Branch(b));
    s.place(a);
    s.push(Toy::Fixed(90));
    s.push(Toy::Align(8));
    s.push(Toy::Fixed(90));
    s.push(Toy::Branch(a));
    s.place(b);

    let engine = engine();
    let first = engine.run(&s).unwrap();
    let second = engine.rerun(&s, &first).unwrap();

    assert_eq!(first.offsets(), second.offsets());
    assert_eq!(first.lengths(), second.lengths());
    assert_eq!(first.label(a), second.label(a));
    assert_eq!(first.label(b), second.label(b));
    assert_eq!(second.passes(), 2);
}

#[test]
fn alignment_never_shrinks() {
    let mut s = Stream::new();
    let target = s.label();
    s.push(Toy::Branch(target));
    s.push(Toy::Fixed(1));
    s.push(Toy::Align(4));
    s.push(Toy::Fixed(200));
    s.place(target);

    let layout = engine().run(&s).unwrap();

    assert_eq!(layout.length(0), 5);
    assert_eq!(layout.offset(3) % 4, 0);
    assert_monotonic(layout.history());
}

#[test]
fn overflow_reports_position() {
    let mut s = Stream::new();
    let target = s.label();
    s.set_pos(SourcePos::new(7, 40, 52));
    s.push(Toy::Near(target));
    s.set_pos(SourcePos::line(8));
    s.push(Toy::Fixed(300));
    s.place(target);

    let err = engine().run(&s).unwrap_err();

    assert_eq!(
        err,
        LayoutError::EncodingOverflow {
            encoding: "rel8",
            value: 300,
            pos: SourcePos::new(7, 40, 52),
        }
    );
    insta::assert_snapshot!(err, @"rel8 operand 300 at line 7 exceeds the widest encoding");
}

#[test]
fn divergence_when_pass_limit_too_low() {
    let mut s = Stream::new();
    let target = s.label();
    s.push(Toy::Branch(target));
    s.place(target);

    let engine = LayoutEngine::new(LayoutConfig::new().max_passes(1));
    let err = engine.run(&s).unwrap_err();

    assert_eq!(err, LayoutError::LayoutDivergence { passes: 1 });
}

#[test]
fn label_placed_twice() {
    let mut s = Stream::new();
    let l = s.label();
    s.place(l);
    s.push(Toy::Fixed(3));
    s.place(l);

    let err = engine().run(&s).unwrap_err();

    assert_eq!(
        err,
        LayoutError::DuplicateBinding {
            label: l,
            first: 0,
            second: 3,
        }
    );
}

#[test]
fn label_never_placed() {
    let mut s = Stream::new();
    let l = s.label();
    s.push(Toy::Branch(l));

    let err = engine().run(&s).unwrap_err();

    assert_eq!(err, LayoutError::UnresolvedReference { label: l });
}

#[test]
fn label_from_another_stream() {
    let mut other: Stream<Toy> = Stream::new();
    let _ = other.label();
    let foreign = other.label();

    let mut s = Stream::new();
    s.push(Toy::Branch(foreign));

    let err = engine().run(&s).unwrap_err();

    assert_eq!(err, LayoutError::UnresolvedReference { label: foreign });
}

#[test]
fn unreferenced_unplaced_label_is_fine() {
    let mut s = Stream::new();
    let unused = s.label();
    s.push(Toy::Fixed(4));

    let layout = engine().run(&s).unwrap();

    assert_eq!(layout.size(), 4);
    assert_eq!(
        layout.label(unused),
        Err(LayoutError::UnresolvedReference { label: unused })
    );
}

#[test]
fn pre_bound_label() {
    let mut s = Stream::new();
    let far = s.label();
    s.labels_mut().bind(far, 1000).unwrap();
    s.push(Toy::Branch(far));

    let (layout, bytes) = engine().assemble(&s).unwrap();

    assert_eq!(layout.length(0), 5);
    assert_eq!(bytes, vec![0xB1, 0xE3, 0x03, 0, 0]);
}

#[test]
fn placing_pre_bound_label_fails() {
    let mut s: Stream<Toy> = Stream::new();
    let l = s.label();
    s.labels_mut().bind(l, 8).unwrap();
    s.place(l);

    let err = engine().run(&s).unwrap_err();

    assert_eq!(
        err,
        LayoutError::DuplicateBinding {
            label: l,
            first: 8,
            second: 0,
        }
    );
}
