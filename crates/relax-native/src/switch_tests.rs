use relax_core::{Label, LayoutConfig, LayoutEngine, SwitchBuilder};

use crate::lower::{CodeUnit, LoweringTarget, Operand, X64Lowering};
use crate::registers::Reg;

/// Lower a switch on `ecx` whose case `i` jumps to target `i % 3`; target 3
/// is the default. Each target is a single `ret`.
fn lower_switch(values: &[i32], config: LayoutConfig) -> (CodeUnit, Vec<u32>) {
    let mut x = X64Lowering::new(LayoutEngine::new(config));
    let targets: Vec<Label> = (0..4).map(|_| x.new_label()).collect();
    let mut cases = SwitchBuilder::new(targets[3]);
    for (i, &v) in values.iter().enumerate() {
        cases.add(v, targets[i % 3]);
    }
    x.switch(Operand::Reg(Reg::Rcx), cases).unwrap();
    for &t in &targets {
        x.place(t);
        x.ret();
    }
    let unit = x.finish().unwrap();
    let offsets = targets.iter().map(|&t| unit.label(t).unwrap()).collect();
    (unit, offsets)
}

fn expected(values: &[i32], offsets: &[u32], value: i32) -> u32 {
    match values.iter().position(|&v| v == value) {
        Some(i) => offsets[i % 3],
        None => offsets[3],
    }
}

fn i32_at(code: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

/// Execute the dispatch sequence until control reaches one of `stops`.
///
/// Understands exactly the instructions the switch lowering emits.
fn run(code: &[u8], stops: &[u32], input: i32) -> u32 {
    let mut pc = 0usize;
    let mut r10 = 0i64;
    let mut r11 = 0i32;
    let mut flags = (0i32, 0i32);

    let taken = |cc: u8, (a, b): (i32, i32)| match cc {
        0x4 => a == b,
        0x7 => (a as u32) > (b as u32),
        0xc => a < b,
        other => panic!("unexpected condition {other:#x}"),
    };

    for _ in 0..1000 {
        if stops.contains(&(pc as u32)) {
            return pc as u32;
        }
        match code[pc..] {
            [0x41, 0x89, 0xCB, ..] => {
                r11 = input;
                pc += 3;
            }
            [0x41, 0x83, 0xEB, ib, ..] => {
                r11 = r11.wrapping_sub(ib as i8 as i32);
                pc += 4;
            }
            [0x41, 0x81, 0xEB, ..] => {
                r11 = r11.wrapping_sub(i32_at(code, pc + 3));
                pc += 7;
            }
            [0x41, 0x83, 0xFB, ib, ..] => {
                flags = (r11, ib as i8 as i32);
                pc += 4;
            }
            [0x41, 0x81, 0xFB, ..] => {
                flags = (r11, i32_at(code, pc + 3));
                pc += 7;
            }
            [op @ 0x70..=0x7F, rel, ..] => {
                pc += 2;
                if taken(op - 0x70, flags) {
                    pc = (pc as i64 + rel as i8 as i64) as usize;
                }
            }
            [0x0F, op @ 0x80..=0x8F, ..] => {
                let rel = i32_at(code, pc + 2);
                pc += 6;
                if taken(op - 0x80, flags) {
                    pc = (pc as i64 + rel as i64) as usize;
                }
            }
            [0xEB, rel, ..] => pc = (pc as i64 + 2 + rel as i8 as i64) as usize,
            [0xE9, ..] => pc = (pc as i64 + 5 + i32_at(code, pc + 1) as i64) as usize,
            [0x4C, 0x8D, 0x15, ..] => {
                r10 = pc as i64 + 7 + i32_at(code, pc + 3) as i64;
                pc += 7;
            }
            [0x4F, 0x63, 0x1C, 0x9A, ..] => {
                r11 = i32_at(code, (r10 + r11 as u32 as i64 * 4) as usize);
                pc += 4;
            }
            [0x4D, 0x01, 0xD3, ..] => {
                r11 = (r11 as i64 + r10) as i32;
                pc += 3;
            }
            [0x41, 0xFF, 0xE3, ..] => pc = r11 as u32 as usize,
            _ => panic!("unexpected bytes at {pc}: {:02x?}", &code[pc..pc + 4]),
        }
    }
    panic!("dispatch did not terminate");
}

fn check_routing(values: &[i32], probes: &[i32]) {
    let (unit, offsets) = lower_switch(values, LayoutConfig::default());
    for &value in probes.iter().chain(values) {
        assert_eq!(
            run(&unit.code, &offsets, value),
            expected(values, &offsets, value),
            "value {value}"
        );
    }
}

#[test]
fn dense_table_bytes() {
    let (unit, offsets) = lower_switch(&[0, 1, 2, 3, 4], LayoutConfig::default());

    assert_eq!(offsets, [48, 49, 50, 51]);
    assert_eq!(
        unit.code[..28],
        [
            0x41, 0x89, 0xCB, // mov r11d, ecx
            0x41, 0x83, 0xFB, 0x04, // cmp r11d, 4
            0x77, 0x2A, // ja default
            0x4C, 0x8D, 0x15, 0x0C, 0x00, 0x00, 0x00, // lea r10, [rip+table]
            0x4F, 0x63, 0x1C, 0x9A, // movsxd r11, [r10+r11*4]
            0x4D, 0x01, 0xD3, // add r11, r10
            0x41, 0xFF, 0xE3, // jmp r11
            0xCC, 0xCC,
        ]
    );
    let entries: Vec<i32> = (0..5).map(|i| i32_at(&unit.code, 28 + 4 * i)).collect();
    assert_eq!(entries, [20, 21, 22, 20, 21]);
}

#[test]
fn dense_routes_including_default() {
    check_routing(&[0, 1, 2, 3, 4], &[-1, 5, 100, i32::MIN, i32::MAX]);
}

#[test]
fn dense_with_bias_and_holes() {
    check_routing(&[10, 11, 12, 14], &[9, 13, 15, -10, i32::MIN]);
}

#[test]
fn dense_with_large_bias() {
    let values: Vec<i32> = (0..6).map(|i| 100_000 + i).collect();
    check_routing(&values, &[99_999, 100_006, 0]);
}

#[test]
fn large_dense_table_uses_long_default_branch() {
    let values: Vec<i32> = (0..200).collect();
    let (unit, offsets) = lower_switch(&values, LayoutConfig::default());

    // cmp r11d, 199 takes an imm32; ja default crosses the 800-byte table
    assert_eq!(&unit.code[3..6], &[0x41, 0x81, 0xFB]);
    assert_eq!(&unit.code[10..12], &[0x0F, 0x87]);
    for value in [-1, 0, 57, 199, 200] {
        assert_eq!(
            run(&unit.code, &offsets, value),
            expected(&values, &offsets, value)
        );
    }
}

#[test]
fn sparse_binary_search_routes() {
    check_routing(&[0, 1, 2, 3, 100], &[-1, 4, 50, 99, 101, i32::MAX]);
}

#[test]
fn sparse_wide_values() {
    check_routing(
        &[i32::MIN, -1000, -5, 0, 7, 300, 5000, 1 << 20, i32::MAX],
        &[-6, 1, 299, 301, 4999, (1 << 20) + 1, i32::MAX - 1],
    );
}

#[test]
fn short_sparse_list_is_linear() {
    let (unit, _) = lower_switch(&[1, 1000], LayoutConfig::default());

    // mov; cmp 1; je; cmp 1000; je; jmp
    assert_eq!(&unit.code[3..7], &[0x41, 0x83, 0xFB, 0x01]);
    assert_eq!(unit.code[7], 0x74);
    assert_eq!(&unit.code[9..12], &[0x41, 0x81, 0xFB]);
    assert_eq!(unit.code[16], 0x74);
    assert_eq!(unit.code[18], 0xEB);
    check_routing(&[1, 1000], &[0, 2, 999, 1001]);
}

#[test]
fn empty_switch_jumps_to_default() {
    let (unit, offsets) = lower_switch(&[], LayoutConfig::default());

    assert_eq!(run(&unit.code, &offsets, 42), offsets[3]);
}

#[test]
fn density_decides_native_form() {
    let values = [0, 9];
    let (sparse, _) = lower_switch(&values, LayoutConfig::new().switch_density(4));
    let (dense, offsets) = lower_switch(&values, LayoutConfig::new().switch_density(5));

    assert!(!sparse.code.windows(3).any(|w| w == [0x4C, 0x8D, 0x15]));
    assert!(dense.code.windows(3).any(|w| w == [0x4C, 0x8D, 0x15]));
    for value in [0, 5, 9, 10] {
        assert_eq!(
            run(&dense.code, &offsets, value),
            expected(&values, &offsets, value)
        );
    }
}
