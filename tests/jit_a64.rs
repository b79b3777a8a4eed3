//! End-to-end A64 execution through the x86-64 backend.

#![cfg(all(target_arch = "x86_64", unix))]

mod common;

use armjit::a64::Jit;
use armjit::monitor::ExclusiveMonitor;
use armjit::{A64Config, HaltReason};
use common::{SharedEnv, TestEnv};
use std::sync::Arc;

const MOV_X0_5: u32 = 0xd28000a0;
const ADD_X0_X0_7: u32 = 0x91001c00;
const RET: u32 = 0xd65f03c0;
const B_SELF: u32 = 0x14000000;

fn make_jit(env: &SharedEnv) -> Jit {
    let _ = env_logger::builder().is_test(true).try_init();
    Jit::new(A64Config::default(), Box::new(env.clone())).unwrap()
}

fn make_env(ticks: u64) -> SharedEnv {
    let mut env = TestEnv::new();
    env.ticks_remaining = ticks;
    SharedEnv::new(env)
}

#[test]
fn immediate_move_and_add() {
    // MOV X0, #5; ADD X0, X0, #7; RET with X30 = 0x2000.
    let env = make_env(3);
    env.with(|env| env.load_program(0x1000, &[MOV_X0_5, ADD_X0_X0_7, RET]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[30] = 0x2000;

    let reason = jit.run();
    assert_eq!(reason, HaltReason::empty());
    assert_eq!(jit.regs()[0], 12);
    assert_eq!(jit.pc(), 0x2000);
    assert_eq!(env.with(|env| env.ticks_added), 3);
}

#[test]
fn conditional_branch_taken() {
    // CMP X0, #0; B.EQ +8; MOV X1, #1; RET; MOV X1, #2; RET
    let env = make_env(4);
    env.with(|env| {
        env.load_program(
            0x2000,
            &[0xf100001f, 0x54000040, 0xd2800021, RET, 0xd2800041, RET],
        )
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x2000);
    jit.regs_mut()[0] = 0;
    jit.regs_mut()[30] = 0x9000;

    jit.run();
    assert_eq!(jit.regs()[1], 2);
}

#[test]
fn conditional_branch_not_taken() {
    let env = make_env(4);
    env.with(|env| {
        env.load_program(
            0x2000,
            &[0xf100001f, 0x54000040, 0xd2800021, RET, 0xd2800041, RET],
        )
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x2000);
    jit.regs_mut()[0] = 7;
    jit.regs_mut()[30] = 0x9000;

    jit.run();
    assert_eq!(jit.regs()[1], 1);
}

#[test]
fn constant_memory_read_folding() {
    // LDR W0, .+8; RET; .word 0xDEADBEEF — the literal lives in ROM.
    let env = make_env(2);
    env.with(|env| {
        env.load_program(0x1000, &[0x18000040, RET, 0xdeadbeef]);
        env.rom = Some(0x1000..=0x100f);
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(jit.regs()[0], 0xdead_beef);
    // Exactly one data read, performed at translation time by the folding
    // pass; the emitted code never calls back.
    assert_eq!(env.with(|env| env.data_reads_32), 1);

    env.with(|env| env.ticks_remaining = 2);
    jit.set_pc(0x1000);
    jit.regs_mut()[0] = 0;
    jit.run();
    assert_eq!(jit.regs()[0], 0xdead_beef);
    assert_eq!(env.with(|env| env.data_reads_32), 1);
}

#[test]
fn loads_and_stores_roundtrip_through_the_callbacks() {
    // LDR X0, [X1]; ADD X0, X0, #7; STR X0, [X1, #8]; RET
    let env = make_env(4);
    env.with(|env| {
        env.load_program(0x1000, &[0xf9400020, ADD_X0_X0_7, 0xf9000420, RET]);
        env.write_word(0x8000, 35);
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = 0x8000;
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(jit.regs()[0], 42);
    assert_eq!(env.with(|env| env.read_mem(0x8008, 8)), 42);
}

#[test]
fn halt_flag_cancels_an_infinite_loop() {
    let env = make_env(1 << 40);
    env.with(|env| env.load_program(0x4000, &[B_SELF]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x4000);

    let handle = jit.halt_handle();
    let setter = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(30));
        handle.halt(HaltReason::STEP);
    });

    let reason = jit.run();
    setter.join().unwrap();
    assert!(reason.contains(HaltReason::STEP));
    assert_eq!(jit.pc(), 0x4000);
}

#[test]
fn preset_halt_returns_immediately() {
    let env = make_env(100);
    env.with(|env| env.load_program(0x1000, &[MOV_X0_5, RET]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.halt_execution(HaltReason::USER_DEFINED_1);

    let reason = jit.run();
    assert!(reason.contains(HaltReason::USER_DEFINED_1));
    // Guest state was not touched.
    assert_eq!(jit.regs()[0], 0);
    assert_eq!(jit.pc(), 0x1000);
}

#[test]
fn cache_invalidation_retranslates() {
    let env = make_env(2);
    env.with(|env| env.load_program(0x3000, &[MOV_X0_5, RET]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x3000);
    jit.regs_mut()[30] = 0x9000;
    jit.run();
    assert_eq!(jit.regs()[0], 5);

    // Rewrite the guest code; a cached run must not observe it yet.
    env.with(|env| {
        env.load_program(0x3000, &[0xd2800540, RET]); // MOV X0, #42
        env.ticks_remaining = 2;
    });
    jit.set_pc(0x3000);
    jit.run();
    assert_eq!(jit.regs()[0], 5, "stale translation should still be cached");

    jit.invalidate_cache_ranges(&[0x3000..=0x3007]);
    env.with(|env| env.ticks_remaining = 2);
    jit.set_pc(0x3000);
    jit.run();
    assert_eq!(jit.regs()[0], 42);
}

#[test]
fn cycle_accounting_reports_consumed_ticks() {
    // Four instructions ending in SVC: ticks are resynchronized at the
    // supervisor call, observing exactly the four consumed cycles.
    let env = make_env(10);
    env.with(|env| {
        env.load_program(
            0x5000,
            &[MOV_X0_5, ADD_X0_X0_7, 0xaa0003e1, 0xd4000001], // MOV X1, X0; SVC #0
        )
    });

    let mut jit = make_jit(&env);
    env.with(|env| env.halt_on_svc = Some(jit.halt_handle()));
    jit.set_pc(0x5000);
    let reason = jit.run();

    assert_eq!(env.with(|env| env.svc_calls.clone()), vec![0]);
    assert_eq!(env.with(|env| env.ticks_added), 4);
    assert!(reason.contains(HaltReason::USER_DEFINED_2));
}

#[test]
fn dispatcher_runs_until_the_budget_is_exhausted() {
    // ADD X0, X0, #1 three times then B . : a 4-cycle loop under a
    // 10-tick budget runs three times (10, 6, 2 remaining at entry).
    let env = make_env(10);
    env.with(|env| {
        env.load_program(
            0x6000,
            &[0x91000400, 0x91000400, 0x91000400, 0x17fffffd], // B -12
        )
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x6000);
    let reason = jit.run();

    assert_eq!(reason, HaltReason::empty());
    assert_eq!(jit.regs()[0], 9);
    assert_eq!(env.with(|env| env.ticks_added), 12);
}

#[test]
fn exclusive_pair_succeeds_locally() {
    // LDXR X0, [X1]; ADD X0, X0, #7; STXR W2, X0, [X1]; RET
    let env = make_env(4);
    env.with(|env| {
        env.load_program(0x1000, &[0xc85f7c20, ADD_X0_X0_7, 0xc8027c20, RET]);
        env.write_word(0x8000, 10);
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = 0x8000;
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(jit.regs()[0], 17);
    assert_eq!(jit.regs()[2], 0, "store-exclusive should succeed");
    assert_eq!(env.with(|env| env.read_mem(0x8000, 8)), 17);
}

#[test]
fn exclusive_store_fails_after_another_processor_writes() {
    let monitor = Arc::new(ExclusiveMonitor::new(2));

    // Core 0: LDXR X0, [X1]; SVC #0 (a handoff point); STXR W2, X0, [X1]; RET
    let env = make_env(8);
    env.with(|env| {
        env.load_program(0x1000, &[0xc85f7c20, 0xd4000001, 0xc8027c20, RET]);
        env.write_word(0x8000, 10);
    });

    let mut config = A64Config::default();
    config.base.processor_id = 0;
    let mut jit = Jit::with_monitor(config, Box::new(env.clone()), monitor.clone()).unwrap();
    env.with(|env| env.halt_on_svc = Some(jit.halt_handle()));
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = 0x8000;
    jit.regs_mut()[30] = 0x2000;

    // Simulate another processor touching the reserved granule between the
    // exclusive pair: the monitor drops core 0's reservation.
    let run_to_svc = jit.run();
    assert!(run_to_svc.contains(HaltReason::USER_DEFINED_2));
    monitor.clear_address(0x8000);

    // Continue from the STXR.
    env.with(|env| env.ticks_remaining = 4);
    jit.set_pc(0x1008);
    jit.run();
    assert_eq!(jit.regs()[2], 1, "store-exclusive should fail");
    assert_eq!(env.with(|env| env.read_mem(0x8000, 8)), 10);
}

#[test]
fn step_executes_exactly_one_instruction() {
    let env = make_env(100);
    env.with(|env| env.load_program(0x1000, &[MOV_X0_5, ADD_X0_X0_7, RET]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);

    let reason = jit.step();
    assert!(reason.contains(HaltReason::STEP));
    assert_eq!(jit.regs()[0], 5);
    assert_eq!(jit.pc(), 0x1004);

    let reason = jit.step();
    assert!(reason.contains(HaltReason::STEP));
    assert_eq!(jit.regs()[0], 12);
    assert_eq!(jit.pc(), 0x1008);
}

#[test]
fn division_and_multiplication() {
    // UDIV X0, X1, X2; MUL X3, X0, X2; MSUB X4, X0, X2, X1; RET
    let env = make_env(4);
    env.with(|env| {
        env.load_program(0x1000, &[0x9ac20820, 0x9b027c03, 0x9b028404, RET])
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = 100;
    jit.regs_mut()[2] = 7;
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(jit.regs()[0], 14);
    assert_eq!(jit.regs()[3], 98);
    assert_eq!(jit.regs()[4], 2);
}

#[test]
fn flags_drive_conditional_select() {
    // SUBS X0, X1, X2; CSEL X3, X4, X5, LT; RET
    let env = make_env(3);
    env.with(|env| env.load_program(0x1000, &[0xeb020020, 0x9a85b083, RET]));

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = 3;
    jit.regs_mut()[2] = 5;
    jit.regs_mut()[4] = 111;
    jit.regs_mut()[5] = 222;
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(jit.regs()[3], 111, "3 - 5 is negative, LT should pass");
    assert_eq!(jit.nzcv() & 0x8000_0000, 0x8000_0000, "N should be set");
}

#[test]
fn scalar_float_arithmetic() {
    // FMOV D0, X1; FMOV D1, X2; FADD D0, D0, D1; FMOV X0, D0; RET
    let env = make_env(5);
    env.with(|env| {
        env.load_program(
            0x1000,
            &[0x9e670020, 0x9e670041, 0x1e612800, 0x9e660000, RET],
        )
    });

    let mut jit = make_jit(&env);
    jit.set_pc(0x1000);
    jit.regs_mut()[1] = f64::to_bits(1.5);
    jit.regs_mut()[2] = f64::to_bits(2.25);
    jit.regs_mut()[30] = 0x2000;

    jit.run();
    assert_eq!(f64::from_bits(jit.regs()[0]), 3.75);
}
