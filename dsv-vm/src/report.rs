//! The soundness reporter.
//!
//! Compares the addresses the exploration reached against everything the
//! disassembler emitted and renders the difference the way the log
//! consumers expect it: a `Unreachable instructions:` header followed by
//! one `0x…: <text>` line per unreached address, plus any
//! `ambiguous operand size` soundness exceptions surfaced verbatim.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::consts::{LOG_UNREACHABLE_INDICATOR, SOUNDNESS_EXCEPTION_INDICATOR};
use crate::explorer::JumpTable;
use crate::program::Program;

/// Outcome of one exploration, ready for logging and assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundnessReport {
    unreachable: Vec<(u64, String)>,
    exceptions: Vec<(u64, String)>,
    jump_tables: BTreeMap<u64, JumpTable>,
    reached: usize,
    total: usize,
}

impl SoundnessReport {
    pub(crate) fn new(
        program: &Program,
        visited: &BTreeSet<u64>,
        exceptions: &[(u64, String)],
        jump_tables: &BTreeMap<u64, JumpTable>,
    ) -> Self {
        let unreachable = program
            .addresses()
            .filter(|addr| !visited.contains(addr))
            .map(|addr| {
                let text = program
                    .instruction(addr)
                    .map(|inst| inst.text().to_string())
                    .unwrap_or_default();
                (addr, text)
            })
            .collect();
        Self {
            unreachable,
            exceptions: exceptions.to_vec(),
            jump_tables: jump_tables.clone(),
            reached: visited.len(),
            total: program.len(),
        }
    }

    /// Disassembled addresses no block ever carried, ascending.
    pub fn unreachable(&self) -> &[(u64, String)] {
        &self.unreachable
    }

    /// Instructions the normalizer flagged as under-specified.
    pub fn exceptions(&self) -> &[(u64, String)] {
        &self.exceptions
    }

    /// Every resolved indirect jump, keyed by its address.
    pub fn jump_tables(&self) -> &BTreeMap<u64, JumpTable> {
        &self.jump_tables
    }

    /// Number of addresses reached at least once.
    pub const fn reached(&self) -> usize {
        self.reached
    }

    /// Number of disassembled addresses.
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Whether every disassembled instruction was reached and nothing was
    /// flagged.
    pub fn is_sound(&self) -> bool {
        self.unreachable.is_empty() && self.exceptions.is_empty()
    }

    /// Emit the report onto the log stream.
    pub fn log(&self) {
        info!(
            reached = self.reached,
            total = self.total,
            "exploration finished"
        );
        info!("{LOG_UNREACHABLE_INDICATOR}");
        for (addr, text) in &self.unreachable {
            info!("{addr:#x}: {text}");
        }
        for (addr, text) in &self.exceptions {
            info!("{addr:#x}: {text} [{SOUNDNESS_EXCEPTION_INDICATOR}]");
        }
        for (addr, table) in &self.jump_tables {
            info!(
                "jump table at {addr:#x}: {} -> {:x?}",
                table.operand, table.targets
            );
        }
    }
}

impl fmt::Display for SoundnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{LOG_UNREACHABLE_INDICATOR}")?;
        for (addr, text) in &self.unreachable {
            writeln!(f, "{addr:#x}: {text}")?;
        }
        for (addr, text) in &self.exceptions {
            writeln!(f, "{addr:#x}: {text} [{SOUNDNESS_EXCEPTION_INDICATOR}]")?;
        }
        Ok(())
    }
}
