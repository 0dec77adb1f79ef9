//! The control-flow explorer.
//!
//! A depth-first walk over the lazily-built CFG. Each block carries one
//! instruction and the store after executing it; successors fork the store
//! by deep copy. Conditional branches follow decided flags and split on
//! unknown ones, indirect jumps go through jump-table recovery, calls into
//! labelled symbols go through the external-call abstraction, and a
//! per-address visit bound keeps the unrolling finite.

use std::collections::{BTreeMap, BTreeSet};

use dsv_asm::{Mnemonic, Operand};
use tracing::{debug, info, trace, warn};

use crate::consts::{ExplorerParams, SOUNDNESS_EXCEPTION_INDICATOR};
use crate::error::{ExploreError, ExploreResult};
use crate::extern_call;
use crate::program::{BinaryInfo, Program};
use crate::report::SoundnessReport;
use crate::semantics::{self, eval, flags, Ctx};
use crate::state::{PathEnd, Step};
use crate::store::Store;

mod block;
mod jump_table;

pub use block::{Block, BlockArena, BlockId};
pub use jump_table::JumpTable;

struct WorkItem {
    address: u64,
    parent: Option<BlockId>,
    store: Store,
}

/// Forward symbolic explorer over one normalized program.
pub struct Explorer<'a, B> {
    program: &'a Program,
    binary: &'a B,
    params: ExplorerParams,
    arena: BlockArena,
    work: Vec<WorkItem>,
    visit_counts: BTreeMap<u64, usize>,
    visited: BTreeSet<u64>,
    jump_tables: BTreeMap<u64, JumpTable>,
    unresolved: BTreeSet<u64>,
    exceptions: Vec<(u64, String)>,
    unknown_reported: BTreeSet<String>,
}

impl<'a, B: BinaryInfo> Explorer<'a, B> {
    /// Build an explorer over a program and its binary image.
    pub fn new(program: &'a Program, binary: &'a B, params: ExplorerParams) -> Self {
        Self {
            program,
            binary,
            params,
            arena: BlockArena::default(),
            work: Vec::new(),
            visit_counts: BTreeMap::new(),
            visited: BTreeSet::new(),
            jump_tables: BTreeMap::new(),
            unresolved: BTreeSet::new(),
            exceptions: Vec::new(),
            unknown_reported: BTreeSet::new(),
        }
    }

    /// Explore every path reachable from `entry`.
    pub fn run(&mut self, entry: u64) -> ExploreResult<()> {
        if self.program.instruction(entry).is_none() {
            return Err(ExploreError::MissingEntry(entry));
        }
        self.work.push(WorkItem {
            address: entry,
            parent: None,
            store: Store::entry(&self.params),
        });
        while let Some(item) = self.work.pop() {
            self.step(item)?;
        }
        Ok(())
    }

    /// Addresses reached at least once.
    pub fn visited(&self) -> &BTreeSet<u64> {
        &self.visited
    }

    /// Every resolved indirect jump, keyed by its address.
    pub fn jump_tables(&self) -> &BTreeMap<u64, JumpTable> {
        &self.jump_tables
    }

    /// Indirect jumps that resisted recovery.
    pub fn unresolved(&self) -> &BTreeSet<u64> {
        &self.unresolved
    }

    /// The block tree built so far.
    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    /// Summarize the exploration against the disassembled address set.
    pub fn report(&self) -> SoundnessReport {
        SoundnessReport::new(
            self.program,
            &self.visited,
            &self.exceptions,
            &self.jump_tables,
        )
    }

    fn step(&mut self, item: WorkItem) -> ExploreResult<()> {
        let WorkItem {
            address,
            parent,
            mut store,
        } = item;
        let program = self.program;
        let Some(inst) = program.instruction(address) else {
            self.end_path(address, &PathEnd::OutsideImage);
            return Ok(());
        };
        let saturated = self
            .visit_counts
            .get(&address)
            .is_some_and(|count| *count >= self.params.max_visit);
        if saturated {
            self.end_path(address, &PathEnd::VisitSaturated);
            return Ok(());
        }
        *self.visit_counts.entry(address).or_default() += 1;
        self.visited.insert(address);

        if inst.text().contains(SOUNDNESS_EXCEPTION_INDICATOR) {
            self.exceptions.push((address, inst.text().to_string()));
            self.end_path(address, &PathEnd::AmbiguousOperandSize);
            return Ok(());
        }

        let ctx = Ctx {
            binary: self.binary,
            addr_width: self.params.addr_width,
            addr: address,
            rip: program.next_address(address).unwrap_or(address),
        };
        trace!(address = format_args!("{address:#x}"), inst = inst.text(), "step");
        let step = semantics::execute(&mut store, &ctx, inst)?;
        let id = self.arena.alloc(address, parent, store);

        match step {
            Step::Halt => self.end_path(address, &PathEnd::Halt),
            Step::Unknown => {
                if self.unknown_reported.insert(inst.name().to_string()) {
                    warn!(
                        mnemonic = inst.name(),
                        "no semantics for mnemonic, paths through it are dropped"
                    );
                }
                self.end_path(
                    address,
                    &PathEnd::UnknownInstruction(inst.name().to_string()),
                );
            }
            Step::SymbolicReturn => {
                info!(
                    address = format_args!("{address:#x}"),
                    "return to symbolic address"
                );
                self.end_path(address, &PathEnd::SymbolicReturn);
            }
            Step::Return(target) => {
                if program.instruction(target).is_some() {
                    self.enqueue(target, id);
                } else {
                    self.end_path(address, &PathEnd::Return);
                }
            }
            Step::Proceed => self.expand(id)?,
        }
        Ok(())
    }

    /// Create the successor work items of a block per its last-instruction
    /// classification.
    fn expand(&mut self, id: BlockId) -> ExploreResult<()> {
        let program = self.program;
        let address = self.arena.get(id).address();
        let inst = program
            .instruction(address)
            .expect("block addresses come from the instruction map");
        match inst.mnemonic() {
            Some(Mnemonic::Jmp) => self.expand_jmp(id),
            Some(Mnemonic::J(cond)) => {
                let taken = match inst.operand(0) {
                    Some(Operand::Imm(value)) => u64::try_from(*value).ok(),
                    _ => None,
                };
                let Some(taken) = taken else {
                    return Err(ExploreError::InvalidInstruction {
                        address,
                        text: inst.text().to_string(),
                    });
                };
                match flags::eval_cond(self.arena.get(id).store(), cond) {
                    Some(true) => self.jump_to(taken, id),
                    Some(false) => self.fall_through(id),
                    None => {
                        self.jump_to(taken, id);
                        self.fall_through(id);
                    }
                }
                Ok(())
            }
            Some(Mnemonic::Call) => self.expand_call(id),
            _ => {
                self.fall_through(id);
                Ok(())
            }
        }
    }

    fn fall_through(&mut self, id: BlockId) {
        let address = self.arena.get(id).address();
        let Some(next) = self.program.next_address(address) else {
            self.end_path(address, &PathEnd::OutsideImage);
            return;
        };
        if self.program.symbol_at(next).is_some() {
            // fell into a labelled function entry
            self.end_path(address, &PathEnd::Boundary);
            return;
        }
        self.enqueue(next, id);
    }

    fn expand_jmp(&mut self, id: BlockId) -> ExploreResult<()> {
        let program = self.program;
        let address = self.arena.get(id).address();
        let inst = program.instruction(address).expect("jmp block exists");
        match inst.operand(0) {
            Some(Operand::Imm(value)) => {
                if let Ok(target) = u64::try_from(*value) {
                    self.jump_to(target, id);
                }
                Ok(())
            }
            Some(operand) => {
                let operand = operand.clone();
                let ctx = Ctx {
                    binary: self.binary,
                    addr_width: self.params.addr_width,
                    addr: address,
                    rip: program.next_address(address).unwrap_or(address),
                };
                let target = eval::read_operand(
                    self.arena.get_mut(id).store_mut(),
                    &ctx,
                    &operand,
                    self.params.addr_width,
                );
                if let Some(target) = target.as_u64() {
                    self.jump_to(target, id);
                    return Ok(());
                }
                match jump_table::recover(
                    program,
                    self.binary,
                    &self.params,
                    &self.arena,
                    id,
                    inst,
                ) {
                    Some(table) => {
                        info!(
                            address = format_args!("{address:#x}"),
                            operand = table.operand.as_str(),
                            targets = table.targets.len(),
                            "resolved jump table"
                        );
                        for target in table.targets.clone() {
                            self.jump_to(target, id);
                        }
                        self.jump_tables.insert(address, table);
                    }
                    None => {
                        info!(
                            address = format_args!("{address:#x}"),
                            "unresolved indirect jump"
                        );
                        self.unresolved.insert(address);
                        self.end_path(address, &PathEnd::UnresolvedIndirect);
                    }
                }
                Ok(())
            }
            None => Err(ExploreError::InvalidInstruction {
                address,
                text: inst.text().to_string(),
            }),
        }
    }

    fn expand_call(&mut self, id: BlockId) -> ExploreResult<()> {
        let program = self.program;
        let address = self.arena.get(id).address();
        let inst = program.instruction(address).expect("call block exists");
        let return_to = program.next_address(address);
        let target = match inst.operand(0) {
            Some(Operand::Imm(value)) => u64::try_from(*value).ok(),
            Some(operand) => {
                let operand = operand.clone();
                let ctx = Ctx {
                    binary: self.binary,
                    addr_width: self.params.addr_width,
                    addr: address,
                    rip: return_to.unwrap_or(address),
                };
                eval::read_operand(
                    self.arena.get_mut(id).store_mut(),
                    &ctx,
                    &operand,
                    self.params.addr_width,
                )
                .as_u64()
            }
            None => {
                return Err(ExploreError::InvalidInstruction {
                    address,
                    text: inst.text().to_string(),
                })
            }
        };
        let Some(target) = target else {
            info!(
                address = format_args!("{address:#x}"),
                "unresolved indirect call"
            );
            self.unresolved.insert(address);
            self.end_path(address, &PathEnd::UnresolvedIndirect);
            return Ok(());
        };
        if let Some(symbol) = program.symbol_at(target) {
            let symbol = symbol.to_string();
            if extern_call::is_termination_symbol(&symbol) {
                debug!(
                    address = format_args!("{address:#x}"),
                    symbol = symbol.as_str(),
                    "call into termination symbol"
                );
                self.end_path(address, &PathEnd::Terminated(symbol));
                return Ok(());
            }
            // labelled symbols are library surface; never descend
            extern_call::apply_external_call(
                self.arena.get_mut(id).store_mut(),
                &self.params,
                &symbol,
            );
            if let Some(next) = return_to {
                self.enqueue(next, id);
            }
            return Ok(());
        }
        if program.instruction(target).is_some() {
            self.enqueue(target, id);
        } else {
            self.end_path(address, &PathEnd::OutsideImage);
        }
        Ok(())
    }

    /// Successor at a branch target, dropped when the target leaves the
    /// disassembly.
    fn jump_to(&mut self, target: u64, parent: BlockId) {
        if self.program.instruction(target).is_some() {
            self.enqueue(target, parent);
        } else {
            self.end_path(self.arena.get(parent).address(), &PathEnd::OutsideImage);
        }
    }

    fn enqueue(&mut self, address: u64, parent: BlockId) {
        let store = self.arena.get(parent).store().clone();
        self.work.push(WorkItem {
            address,
            parent: Some(parent),
            store,
        });
    }

    fn end_path(&self, address: u64, reason: &PathEnd) {
        debug!(
            address = format_args!("{address:#x}"),
            reason = format_args!("{reason:?}"),
            "path ended"
        );
    }
}
