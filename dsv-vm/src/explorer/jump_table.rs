//! Jump-table recovery.
//!
//! When an indirect jump's target stays symbolic, the table behind it is
//! reconstructed from the path that led here: walk the parent chain for
//! the bounding compare-and-branch and the table row load, enumerate the
//! concrete rows from the image, then re-run the trace suffix once per
//! distinct row to collect the concrete jump targets.

use dsv_asm::{AddrExpr, AddrTermKind, Instruction, MemOperand, Mnemonic, Operand};
use tracing::debug;

use crate::consts::ExplorerParams;
use crate::expr::{solve, Expr, Width};
use crate::program::{BinaryInfo, Program};
use crate::semantics::{self, eval, Ctx};
use crate::store::Store;

use super::block::{Block, BlockArena, BlockId};

/// A resolved jump table: the indirect operand's canonical text and the
/// recovered targets, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTable {
    /// Canonical text of the indirect operand.
    pub operand: String,
    /// Recovered target addresses.
    pub targets: Vec<u64>,
}

/// Whether an instruction looks like the table row load: a `mov`-family
/// move of a non-rip-relative compound address into a register.
fn is_row_load(inst: &Instruction) -> bool {
    if !matches!(
        inst.mnemonic(),
        Some(Mnemonic::Mov | Mnemonic::Movzx | Mnemonic::Movsx | Mnemonic::Movsxd)
    ) {
        return false;
    }
    let [dest, src] = inst.operands() else {
        return false;
    };
    let Operand::Mem(mem) = src else {
        return false;
    };
    dest.as_reg().is_some() && !mem.expr.is_rip_relative() && mem.expr.is_compound()
}

/// Whether the jump reads its table row itself, `jmp [base+idx*scale]`.
fn is_table_jump(mem: &MemOperand) -> bool {
    !mem.expr.is_rip_relative() && mem.expr.is_compound() && mem.expr.has_scaled_index()
}

/// The constant an index is compared against, when the instruction is a
/// compare-with-immediate.
fn cmp_boundary(inst: &Instruction) -> Option<u64> {
    if inst.mnemonic() != Some(Mnemonic::Cmp) {
        return None;
    }
    match inst.operand(1) {
        Some(Operand::Imm(value)) => u64::try_from(*value).ok(),
        _ => None,
    }
}

/// The concrete address of table row `idx`, computed in a store that
/// predates the row load. Symbolic register terms are constrained to the
/// row index; anything else symbolic aborts.
fn table_slot_address(
    store: &Store,
    expr: &AddrExpr,
    width: Width,
    idx: u64,
) -> Option<u64> {
    let mut sum = Expr::constant(0, width);
    for term in &expr.terms {
        let value = match term.kind {
            AddrTermKind::Reg { reg, scale } => {
                let value = Expr::resize(width, store.read_reg(reg));
                let value = if value.is_concrete() {
                    value
                } else {
                    solve::constrain(&value, u128::from(idx))?
                };
                Expr::mul(value, Expr::constant(u128::from(scale), width))
            }
            AddrTermKind::Imm(disp) => Expr::imm(disp, width),
            AddrTermKind::Rip => return None,
        };
        sum = if term.negated {
            Expr::sub(sum, value)
        } else {
            Expr::add(sum, value)
        };
    }
    sum.as_u64()
}

/// Read the distinct table rows `0..bound`, in read order.
fn enumerate_rows<B: BinaryInfo>(
    binary: &B,
    store: &Store,
    expr: &AddrExpr,
    row_width: Width,
    addr_width: Width,
    bound: u64,
) -> Option<Vec<u128>> {
    let mut rows = Vec::new();
    for idx in 0..bound {
        let slot = table_slot_address(store, expr, addr_width, idx)?;
        let value = binary.read_addr(slot, row_width / 8)?;
        if !rows.contains(&value) {
            rows.push(value);
        }
    }
    (!rows.is_empty()).then_some(rows)
}

/// Recover the jump table behind an unresolved indirect jump.
///
/// Returns `None` when any step fails — no bounding branch in the
/// traceback budget, no row load, a symbolic row address, or a
/// non-constant table entry. The caller records the jump as unresolved.
pub(crate) fn recover<B: BinaryInfo>(
    program: &Program,
    binary: &B,
    params: &ExplorerParams,
    arena: &BlockArena,
    jmp_block: BlockId,
    jmp_inst: &Instruction,
) -> Option<JumpTable> {
    // ancestry walks newest-first; the scan below wants execution order
    let mut trace: Vec<(&Block, &Instruction)> = arena
        .ancestry(jmp_block)
        .take(params.max_traceback)
        .filter_map(|block| {
            program
                .instruction(block.address())
                .map(|inst| (block, inst))
        })
        .collect();
    trace.reverse();

    // the bound comes from the compare feeding the out-of-range branch
    let cj_pos = trace
        .iter()
        .position(|(_, inst)| matches!(inst.mnemonic(), Some(Mnemonic::J(_))))?;
    let Some(Mnemonic::J(cond)) = trace[cj_pos].1.mnemonic() else {
        return None;
    };
    let boundary = trace[..cj_pos]
        .iter()
        .rev()
        .find_map(|(_, inst)| cmp_boundary(inst))
        .or_else(|| {
            // the compare can sit outside the traceback window; probe
            // backwards from the branch in program order
            let branch = trace[cj_pos].0.address();
            program
                .prev_address(branch, params.max_inst_gap)
                .and_then(|addr| program.instruction(addr))
                .and_then(cmp_boundary)
        })?;
    let bound = cond.index_upper_bound(boundary)?;

    let jmp_operand = jmp_inst.operand(0)?;

    let row_pos = (cj_pos + 1..trace.len()).find(|&i| is_row_load(trace[i].1));
    let Some(row_pos) = row_pos else {
        // no separate row load: the jump may read the table directly
        let Operand::Mem(mem) = jmp_operand else {
            return None;
        };
        if !is_table_jump(mem) {
            return None;
        }
        let (block, _) = *trace.last()?;
        let row_width = mem.width.unwrap_or(params.addr_width);
        let rows = enumerate_rows(
            binary,
            block.store(),
            &mem.expr,
            row_width,
            params.addr_width,
            bound,
        )?;
        let targets = rows
            .into_iter()
            .map(|row| Expr::constant(row, row_width).as_u64())
            .collect::<Option<Vec<u64>>>()?;
        debug!(
            jmp = format_args!("{:#x}", block.address()),
            bound,
            targets = targets.len(),
            "enumerated direct jump table"
        );
        return Some(JumpTable {
            operand: jmp_operand.to_string(),
            targets,
        });
    };

    let (row_block, row_inst) = trace[row_pos];
    let dest = row_inst.operand(0)?.as_reg()?;
    let Some(Operand::Mem(row_mem)) = row_inst.operand(1) else {
        return None;
    };
    let row_width = row_mem.width.unwrap_or(dest.width());

    // enumerate rows against the state that predates the load
    let parent = arena.get(row_block.parent()?);
    let rows = enumerate_rows(
        binary,
        parent.store(),
        &row_mem.expr,
        row_width,
        params.addr_width,
        bound,
    )?;
    debug!(
        jmp = format_args!("{:#x}", trace.last()?.0.address()),
        bound,
        rows = rows.len(),
        "enumerated jump table"
    );

    // one forked store per distinct row, replaying the suffix after the load
    let mut targets = Vec::new();
    for row in rows {
        let mut store = row_block.store().clone();
        let loaded = Expr::constant(row, row_width);
        let widened = if dest.width() < row_width {
            Expr::extract(dest.width() - 1, 0, loaded)
        } else {
            match row_inst.mnemonic() {
                Some(Mnemonic::Movsx | Mnemonic::Movsxd) => {
                    Expr::sign_ext(dest.width(), loaded)
                }
                _ => Expr::zero_ext(dest.width(), loaded),
            }
        };
        store.write_reg(dest, widened);
        for (block, inst) in &trace[row_pos + 1..trace.len() - 1] {
            let addr = block.address();
            let ctx = Ctx {
                binary,
                addr_width: params.addr_width,
                addr,
                rip: program.next_address(addr).unwrap_or(addr),
            };
            semantics::execute(&mut store, &ctx, inst).ok()?;
        }
        let jmp_addr = trace.last()?.0.address();
        let ctx = Ctx {
            binary,
            addr_width: params.addr_width,
            addr: jmp_addr,
            rip: program.next_address(jmp_addr).unwrap_or(jmp_addr),
        };
        let target =
            eval::read_operand(&mut store, &ctx, jmp_operand, params.addr_width);
        targets.push(target.as_u64()?);
    }

    Some(JumpTable {
        operand: jmp_operand.to_string(),
        targets,
    })
}
