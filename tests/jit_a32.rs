//! End-to-end A32 execution through the x86-64 backend.

#![cfg(all(target_arch = "x86_64", unix))]

mod common;

use armjit::a32::Jit;
use armjit::{A32Config, HaltReason};
use common::{SharedEnv, TestEnv};

const BX_LR: u32 = 0xe12fff1e;

fn make_jit(env: &SharedEnv) -> Jit {
    let _ = env_logger::builder().is_test(true).try_init();
    Jit::new(A32Config::default(), Box::new(env.clone())).unwrap()
}

fn make_env(ticks: u64) -> SharedEnv {
    let mut env = TestEnv::new();
    env.ticks_remaining = ticks;
    SharedEnv::new(env)
}

#[test]
fn immediate_move_and_add() {
    // MOV r0, #5; ADD r0, r0, #7; BX lr
    let env = make_env(3);
    env.with(|env| env.load_program(0x1000, &[0xe3a00005, 0xe2800007, BX_LR]));

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x1000;
    jit.regs_mut()[14] = 0x2000;

    let reason = jit.run();
    assert_eq!(reason, HaltReason::empty());
    assert_eq!(jit.regs()[0], 12);
    assert_eq!(jit.regs()[15], 0x2000);
}

#[test]
fn conditional_execution_follows_the_flags() {
    // CMP r0, #0; MOVEQ r1, #1; MOVNE r1, #2; BX lr
    let env = make_env(4);
    env.with(|env| {
        env.load_program(
            0x2000,
            &[0xe3500000, 0x03a01001, 0x13a01002, BX_LR],
        )
    });

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x2000;
    jit.regs_mut()[14] = 0x9000;
    jit.regs_mut()[0] = 0;
    jit.run();
    assert_eq!(jit.regs()[1], 1);

    env.with(|env| env.ticks_remaining = 4);
    jit.regs_mut()[15] = 0x2000;
    jit.regs_mut()[0] = 5;
    jit.run();
    assert_eq!(jit.regs()[1], 2);
}

#[test]
fn barrel_shifter_carry_feeds_adc() {
    // MOVS r0, r1, LSR #1 (carry = bit 0); ADC r2, r2, #0; BX lr
    let env = make_env(3);
    env.with(|env| env.load_program(0x3000, &[0xe1b000a1, 0xe2a22000, BX_LR]));

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x3000;
    jit.regs_mut()[14] = 0x9000;
    jit.regs_mut()[1] = 0b101;
    jit.regs_mut()[2] = 10;

    jit.run();
    assert_eq!(jit.regs()[0], 0b10);
    assert_eq!(jit.regs()[2], 11, "the shifted-out bit becomes ADC carry");
}

#[test]
fn memory_accesses_reach_the_callbacks() {
    // LDR r0, [r1]; ADD r0, r0, #1; STR r0, [r1, #4]; BX lr
    let env = make_env(4);
    env.with(|env| {
        env.load_program(0x4000, &[0xe5910000, 0xe2800001, 0xe5810004, BX_LR]);
        env.write_word(0x8000, 99);
    });

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x4000;
    jit.regs_mut()[14] = 0x9000;
    jit.regs_mut()[1] = 0x8000;

    jit.run();
    assert_eq!(jit.regs()[0], 100);
    assert_eq!(env.with(|env| env.read_mem(0x8004, 4)), 100);
}

#[test]
fn push_pop_roundtrip() {
    // MOV r0, #17; PUSH {r0, r1}; MOV r0, #0; POP {r2, r3}; BX lr
    let env = make_env(5);
    env.with(|env| {
        env.load_program(
            0x5000,
            &[0xe3a00011, 0xe92d0003, 0xe3a00000, 0xe8bd000c, BX_LR],
        )
    });

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x5000;
    jit.regs_mut()[14] = 0x9000;
    jit.regs_mut()[13] = 0x7000;
    jit.regs_mut()[1] = 34;

    jit.run();
    assert_eq!(jit.regs()[2], 17);
    assert_eq!(jit.regs()[3], 34);
    assert_eq!(jit.regs()[13], 0x7000, "push and pop balance the stack");
}

#[test]
fn svc_reports_to_the_embedder() {
    // SVC #7
    let env = make_env(4);
    env.with(|env| env.load_program(0x6000, &[0xef000007]));

    let mut jit = make_jit(&env);
    env.with(|env| env.halt_on_svc = Some(jit.halt_handle()));
    jit.regs_mut()[15] = 0x6000;

    let reason = jit.run();
    assert!(reason.contains(HaltReason::USER_DEFINED_2));
    assert_eq!(env.with(|env| env.svc_calls.clone()), vec![7]);
    assert_eq!(jit.regs()[15], 0x6004);
}

#[test]
fn long_multiply_widens() {
    // UMULL r0, r1, r2, r3; BX lr
    let env = make_env(2);
    env.with(|env| env.load_program(0x7000, &[0xe0810392, BX_LR]));

    let mut jit = make_jit(&env);
    jit.regs_mut()[15] = 0x7000;
    jit.regs_mut()[14] = 0x9000;
    jit.regs_mut()[2] = 0x8000_0001;
    jit.regs_mut()[3] = 0x10;

    jit.run();
    let product = (u64::from(jit.regs()[1]) << 32) | u64::from(jit.regs()[0]);
    assert_eq!(product, 0x8000_0001u64 * 0x10);
}
