//! Whole-instruction parsing over the canonical text contract.

use core::fmt;

use crate::{Mnemonic, Operand, ParseError, RepPrefix};

/// One canonical-Intel instruction, as handed over by the normalizer.
///
/// Mnemonics without modeled semantics parse successfully with
/// [`Instruction::mnemonic`] left empty; the raw mnemonic token stays
/// available for reporting and for the unknown-instruction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    text: String,
    prefix: Option<RepPrefix>,
    name: String,
    mnemonic: Option<Mnemonic>,
    operands: Vec<Operand>,
}

impl Instruction {
    /// Parse one canonical instruction line.
    ///
    /// `lock` and `data16` prefixes are stripped before dispatch. Operand
    /// tokens the grammar has no shape for are kept opaque rather than
    /// failing the instruction; the semantics layer stops such paths.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.trim();
        let mut tokens = text.splitn(2, ' ');
        let mut head = tokens.next().filter(|t| !t.is_empty()).ok_or(ParseError::Empty)?;
        let mut rest = tokens.next().unwrap_or("").trim();

        while matches!(head, "lock" | "data16") {
            let mut tail = rest.splitn(2, ' ');
            head = tail.next().filter(|t| !t.is_empty()).ok_or(ParseError::Empty)?;
            rest = tail.next().unwrap_or("").trim();
        }

        let prefix = RepPrefix::parse(head);
        if prefix.is_some() {
            let mut tail = rest.splitn(2, ' ');
            if let Some(inner) = tail.next().filter(|t| !t.is_empty()) {
                head = inner;
                rest = tail.next().unwrap_or("").trim();
            } else {
                rest = "";
            }
        }

        let operands = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',')
                .map(|token| {
                    let token = token.trim();
                    Operand::parse(token)
                        .unwrap_or_else(|_| Operand::Other(token.to_string()))
                })
                .collect()
        };

        Ok(Self {
            text: text.to_string(),
            prefix,
            name: head.to_string(),
            mnemonic: Mnemonic::parse(head),
            operands,
        })
    }

    /// The canonical text as received.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The mnemonic token, after prefix stripping.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded mnemonic, when semantics exist for it.
    pub const fn mnemonic(&self) -> Option<Mnemonic> {
        self.mnemonic
    }

    /// The repeat prefix, if any.
    pub const fn prefix(&self) -> Option<RepPrefix> {
        self.prefix
    }

    /// The parsed operand list.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// The operand at `idx`, when present.
    pub fn operand(&self, idx: usize) -> Option<&Operand> {
        self.operands.get(idx)
    }

    /// Whether the last-instruction classification treats this as a branch.
    pub fn is_branch(&self) -> bool {
        self.mnemonic.is_some_and(Mnemonic::is_branch)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cond, Reg64, Register};

    #[test]
    fn parses_two_operand_move() {
        let inst = Instruction::parse("mov eax, 0x5").unwrap();
        assert_eq!(inst.mnemonic(), Some(Mnemonic::Mov));
        assert_eq!(
            inst.operands(),
            &[
                Operand::Reg(Register::new(Reg64::Rax, 0, 32)),
                Operand::Imm(5)
            ]
        );
    }

    #[test]
    fn strips_lock_prefix() {
        let inst = Instruction::parse("lock cmpxchg dword ptr [rdi], esi").unwrap();
        assert_eq!(inst.mnemonic(), Some(Mnemonic::Cmpxchg));
        assert_eq!(inst.operands().len(), 2);
    }

    #[test]
    fn decodes_repeat_prefix() {
        let inst = Instruction::parse("repz cmpsb").unwrap();
        assert_eq!(inst.prefix(), Some(RepPrefix::Repz));
        assert_eq!(inst.name(), "cmpsb");
        assert_eq!(inst.mnemonic(), None);
    }

    #[test]
    fn keeps_unknown_mnemonics() {
        let inst = Instruction::parse("vmovdqa xmm0, xmm1").unwrap();
        assert_eq!(inst.mnemonic(), None);
        assert_eq!(inst.name(), "vmovdqa");
        assert_eq!(inst.operands().len(), 2);
    }

    #[test]
    fn classifies_branches() {
        assert!(Instruction::parse("jne 0x400010").unwrap().is_branch());
        assert!(Instruction::parse("ret").unwrap().is_branch());
        assert!(!Instruction::parse("add eax, ebx").unwrap().is_branch());
        assert_eq!(
            Instruction::parse("jae 0x400010").unwrap().mnemonic(),
            Some(Mnemonic::J(Cond::Ae))
        );
    }

    #[test]
    fn rejects_empty_text() {
        assert_eq!(Instruction::parse("  "), Err(ParseError::Empty));
        assert_eq!(Instruction::parse("lock"), Err(ParseError::Empty));
    }
}
