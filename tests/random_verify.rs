//! Randomized sweep: whatever the decoders make of arbitrary instruction
//! words, the optimized IR must always satisfy the block invariants.

mod common;

use armjit::frontend::{a32, a64};
use armjit::ir::Block;
use armjit::opt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

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

fn optimize_a32(block: &mut Block) {
    opt::polyfill_pass(block, opt::PolyfillOptions::default());
    opt::naming_pass(block);
    opt::a32_get_set_elimination(block, opt::A32GetSetOptions::default());
    opt::dead_code_elimination(block);
    opt::constant_propagation(block);
    opt::dead_code_elimination(block);
    opt::identity_removal(block);
    opt::verification_pass(block);
}

#[test]
fn a64_translation_of_random_words_always_verifies() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_0001);
    for _ in 0..2000 {
        let words: Vec<u32> = (0..8).map(|_| rng.gen()).collect();
        let mut fetch = |vaddr: u64| {
            let index = vaddr.checked_sub(0x10000)? / 4;
            words.get(index as usize).copied()
        };
        let mut block = a64::translate(
            a64::LocationDescriptor::new(0x10000, 0, false),
            &mut fetch,
            a64::TranslationOptions::default(),
        );
        optimize(&mut block);
    }
}

#[test]
fn a32_translation_of_random_words_always_verifies() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_0002);
    for _ in 0..2000 {
        let words: Vec<u32> = (0..8).map(|_| rng.gen()).collect();
        let mut fetch = |vaddr: u32| {
            let index = vaddr.checked_sub(0x10000)? / 4;
            words.get(index as usize).copied()
        };
        let mut block = a32::translate(
            a32::LocationDescriptor::new(0x10000, false, false, Default::default(), 0, false),
            &mut fetch,
            a32::TranslationOptions::default(),
        );
        optimize_a32(&mut block);
    }
}
