//! A32 translator behaviour at the IR level.

mod common;

use armjit::frontend::a32::{translate, ITState, LocationDescriptor, TranslationOptions};
use armjit::ir::{Block, Cond, Opcode, Terminal};
use armjit::opt;

fn location(pc: u32) -> LocationDescriptor {
    LocationDescriptor::new(pc, false, false, ITState::default(), 0, false)
}

fn translate_words(pc: u32, words: &[u32]) -> Block {
    let mut fetch = |vaddr: u32| {
        let index = vaddr.checked_sub(pc)? / 4;
        words.get(index as usize).copied()
    };
    translate(location(pc), &mut fetch, TranslationOptions::default())
}

fn optimize(block: &mut Block) {
    opt::polyfill_pass(block, opt::PolyfillOptions::default());
    opt::naming_pass(block);
    opt::a32_get_set_elimination(block, opt::A32GetSetOptions::default());
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
fn unconditional_run_stays_in_one_block() {
    // MOV r0, #5; ADD r0, r0, #7; BX lr
    let mut block = translate_words(0x1000, &[0xe3a00005, 0xe2800007, 0xe12fff1e]);
    assert_eq!(block.cond(), Cond::AL);
    assert_eq!(block.cycle_count(), 3);
    assert_eq!(*block.terminal(), Terminal::PopRSBHint);

    optimize(&mut block);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::A32BXWritePC));
    // The immediate chain folded.
    let store = block.first().unwrap();
    assert_eq!(block.opcode(store), Opcode::A32SetRegister);
    assert_eq!(block.arg(store, 1), armjit::ir::Value::U32(12));
}

#[test]
fn conditional_instructions_open_a_guarded_block() {
    // MOV r0, #1; MOVEQ r1, #1
    let block = translate_words(0x2000, &[0xe3a00001, 0x03a01001]);
    // The AL instruction ends its block before the conditional run starts.
    assert_eq!(block.cond(), Cond::AL);
    assert!(matches!(block.terminal(), Terminal::LinkBlock { .. }));

    // Translating from the conditional instruction guards the block.
    let block = translate_words(0x2004, &[0x03a01001, 0x03a02002, 0x13a03003]);
    assert_eq!(block.cond(), Cond::EQ);
    let fail = block.cond_failed_location().expect("guarded block");
    assert_eq!(fail.value() as u32, 0x2008);
    assert_eq!(block.cond_failed_cycle_count(), 1);
    // The NE instruction is not part of the EQ run.
    assert_eq!(block.cycle_count(), 2);
    opt::verification_pass(&block);
}

#[test]
fn flag_setting_data_processing_routes_the_shifter_carry() {
    // MOVS r0, r1, LSR #1
    let mut block = translate_words(0x3000, &[0xe1b000a1]);
    optimize(&mut block);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::LogicalShiftRight32));
    assert!(ops.contains(&Opcode::GetCarryFromOp));
    assert!(ops.contains(&Opcode::A32SetCpsrNZC));
}

#[test]
fn compare_writes_full_nzcv() {
    // CMP r0, #3
    let mut block = translate_words(0x4000, &[0xe3500003]);
    optimize(&mut block);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::Sub32));
    assert!(ops.contains(&Opcode::GetNZCVFromOp));
    assert!(ops.contains(&Opcode::A32SetCpsrNZCV));
}

#[test]
fn load_store_multiple_unrolls() {
    // PUSH {r0, r1, lr} = STMDB sp!, {r0, r1, lr}
    let mut block = translate_words(0x5000, &[0xe92d4003]);
    optimize(&mut block);
    let stores = opcodes(&block)
        .iter()
        .filter(|op| **op == Opcode::A32WriteMemory32)
        .count();
    assert_eq!(stores, 3);
}

#[test]
fn ldm_with_pc_returns_through_the_rsb() {
    // POP {r0, pc} = LDMIA sp!, {r0, pc}
    let block = translate_words(0x6000, &[0xe8bd8001]);
    assert_eq!(*block.terminal(), Terminal::PopRSBHint);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::A32BXWritePC));
}

#[test]
fn thumb_locations_are_not_decoded() {
    let descriptor = LocationDescriptor::new(0x7000, true, false, ITState::default(), 0, false);
    let mut fetch = |_: u32| Some(0u32);
    let block = translate(descriptor, &mut fetch, TranslationOptions::default());
    assert!(opcodes(&block).contains(&Opcode::A32ExceptionRaised));
}

#[test]
fn barriers_sit_in_the_unconditional_space() {
    // DMB ish; ISB
    let block = translate_words(0x8000, &[0xf57ff05b, 0xf57ff06f]);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::DataMemoryBarrier));
    assert!(ops.contains(&Opcode::InstructionSynchronizationBarrier));
    assert_eq!(*block.terminal(), Terminal::ReturnToDispatch);
}

#[test]
fn exclusive_pair_shapes() {
    // LDREX r0, [r1]; STREX r2, r0, [r1]
    let mut block = translate_words(0x9000, &[0xe1910f9f, 0xe1812f90]);
    optimize(&mut block);
    let ops = opcodes(&block);
    assert!(ops.contains(&Opcode::A32ExclusiveReadMemory32));
    assert!(ops.contains(&Opcode::A32ExclusiveWriteMemory32));
}
