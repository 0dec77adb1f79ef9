//! Shared helpers for the unit tests.

use dsv_asm::Instruction;

use crate::consts::ExplorerParams;
use crate::error::ExploreResult;
use crate::program::{BinaryInfo, SectionBounds};
use crate::semantics::{self, Ctx};
use crate::state::Step;
use crate::store::Store;

/// A binary with no readable sections.
pub struct NoImage;

impl BinaryInfo for NoImage {
    fn rodata(&self) -> SectionBounds {
        SectionBounds::default()
    }
    fn data(&self) -> SectionBounds {
        SectionBounds::default()
    }
    fn text(&self) -> SectionBounds {
        SectionBounds::default()
    }
    fn read_bytes(&self, _offset: u64, _len: u32) -> Option<u128> {
        None
    }
}

/// Execute one canonical instruction line against the store.
pub fn exec(store: &mut Store, text: &str) -> ExploreResult<Step> {
    let inst = Instruction::parse(text).expect("test instruction parses");
    let ctx = Ctx {
        binary: &NoImage,
        addr_width: 64,
        addr: 0x1000,
        rip: 0x1005,
    };
    semantics::execute(store, &ctx, &inst)
}

/// Execute a straight-line sequence from a fresh entry store.
pub fn exec_all(lines: &[&str]) -> Store {
    let mut store = Store::entry(&ExplorerParams::default());
    for line in lines {
        exec(&mut store, line).expect("test instruction executes");
    }
    store
}
