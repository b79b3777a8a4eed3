//! A64 translator and optimizer behaviour at the IR level.

mod common;

use armjit::frontend::a64::{translate, LocationDescriptor, TranslationOptions};
use armjit::ir::{Block, Opcode, Terminal, Value};
use armjit::opt;

fn translate_words(pc: u64, words: &[u32]) -> Block {
    let mut fetch = |vaddr: u64| {
        let index = vaddr.checked_sub(pc)? / 4;
        words.get(index as usize).copied()
    };
    translate(
        LocationDescriptor::new(pc, 0, false),
        &mut fetch,
        TranslationOptions::default(),
    )
}

/// The full pass pipeline in its production order, minus the callbacks.
fn optimize(block: &mut Block) {
    opt::polyfill_pass(block, opt::PolyfillOptions::default());
    opt::naming_pass(block);
    opt::a64_get_set_elimination(block);
    opt::dead_code_elimination(block);
    opt::constant_propagation(block);
    opt::dead_code_elimination(block);
    opt::identity_removal(block);
    opt::verification_pass(block);
}

fn opcodes(block: &Block) -> Vec<Opcode> {
    block.iter().map(|inst| block.opcode(inst)).collect()
}

#[test]
fn mov_add_ret_folds_to_a_single_store() {
    // MOV X0, #5; ADD X0, X0, #7; RET
    let mut block = translate_words(0x1000, &[0xd28000a0, 0x91001c00, 0xd65f03c0]);
    assert_eq!(block.cycle_count(), 3);
    assert_eq!(*block.terminal(), Terminal::PopRSBHint);

    optimize(&mut block);

    let ops = opcodes(&block);
    assert_eq!(
        ops,
        vec![Opcode::A64SetX, Opcode::A64GetX, Opcode::A64SetPC]
    );
    // The two immediate stores collapsed into one folded constant.
    let store = block.first().unwrap();
    assert_eq!(block.arg(store, 1), Value::U64(12));
}

#[test]
fn conditional_branch_produces_an_if_terminal() {
    // CMP X0, #0; B.EQ +8
    let block = translate_words(0x2000, &[0xf100001f, 0x54000040]);
    match block.terminal() {
        Terminal::If { cond, then_, else_ } => {
            assert_eq!(*cond, armjit::ir::Cond::EQ);
            let Terminal::LinkBlock { next } = **then_ else {
                panic!("taken edge should link");
            };
            assert_eq!(next.value() & 0xffff_ffff_ffff_ff, 0x200c);
            let Terminal::LinkBlock { next } = **else_ else {
                panic!("fallthrough edge should link");
            };
            assert_eq!(next.value() & 0xffff_ffff_ffff_ff, 0x2008);
        }
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[test]
fn cbz_uses_the_check_bit() {
    // CBZ X2, +16
    let block = translate_words(0x3000, &[0xb4000082]);
    assert!(opcodes(&block).contains(&Opcode::SetCheckBit));
    assert!(matches!(block.terminal(), Terminal::CheckBit { .. }));
}

#[test]
fn svc_checks_halt_then_hints_the_rsb() {
    // SVC #42
    let mut block = translate_words(0x4000, &[0xd4000541]);
    optimize(&mut block);
    assert!(opcodes(&block).contains(&Opcode::A64CallSupervisor));
    match block.terminal() {
        Terminal::CheckHalt { else_ } => assert_eq!(**else_, Terminal::PopRSBHint),
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[test]
fn flag_setting_adds_keep_their_nzcv_pseudo() {
    // ADDS X0, X1, #1
    let mut block = translate_words(0x5000, &[0xb1000420]);
    optimize(&mut block);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::GetNZCVFromOp));
    assert!(ops.contains(&Opcode::A64SetNZCV));
    assert!(ops.contains(&Opcode::Add64));
}

#[test]
fn single_stepping_limits_blocks_to_one_instruction() {
    let mut fetch = |vaddr: u64| {
        let _ = vaddr;
        Some(0xd28000a0u32) // MOV X0, #5 forever
    };
    let block = translate(
        LocationDescriptor::new(0x6000, 0, true),
        &mut fetch,
        TranslationOptions::default(),
    );
    assert_eq!(block.cycle_count(), 1);
    assert!(matches!(block.terminal(), Terminal::LinkBlock { .. }));
}

#[test]
fn unallocated_words_raise_exceptions() {
    let block = translate_words(0x7000, &[0x00000000]);
    assert!(opcodes(&block).contains(&Opcode::A64ExceptionRaised));
    assert!(matches!(block.terminal(), Terminal::CheckHalt { .. }));
}

#[test]
fn blocks_split_at_the_length_cap() {
    // A long run of NOP-like register moves: ORR X0, XZR, X1.
    let words = vec![0xaa0103e0u32; 100];
    let block = translate_words(0x8000, &words);
    assert!(block.cycle_count() <= 32);
    assert!(matches!(block.terminal(), Terminal::LinkBlock { .. }));
}

#[test]
fn pipeline_output_always_verifies() {
    let programs: &[&[u32]] = &[
        // Bitfield and extract forms.
        &[0xd3607c20, 0x93407c41, 0x93c11041, 0xd65f03c0],
        // Loads and stores.
        &[0xb9400020, 0xb9000422, 0xf8408423, 0xd65f03c0],
        // Conditional select and compare.
        &[0x9a821020, 0xfa420820, 0xd65f03c0],
        // Multiplies and divides.
        &[0x9b027c20, 0x9ac20820, 0x9ac20c20, 0xd65f03c0],
        // Exclusive pair.
        &[0xc85f7c20, 0xc8027c20, 0xd65f03c0],
        // System registers.
        &[0xd53b4200, 0xd51b4200, 0xd53be040, 0xd65f03c0],
    ];
    for program in programs {
        let mut block = translate_words(0x9000, program);
        optimize(&mut block);
    }
}
