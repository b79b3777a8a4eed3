//! Dense instruction naming, for dumps and allocator indexing.

use crate::ir::Block;

pub fn naming_pass(block: &mut Block) {
    let mut name = 1;
    for inst in block.collect_insts() {
        block.set_name(inst, name);
        name += 1;
    }
}
