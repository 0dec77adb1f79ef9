//! The collaborator surface the engine consumes: the normalized
//! instruction stream and the raw binary image.

use std::collections::BTreeMap;

use dsv_asm::Instruction;
use itertools::Itertools;

/// Code sections, in probe order.
pub const CODE_SECTIONS: [&str; 3] = [".plt.got", ".plt", ".text"];

/// Data sections, in probe order.
pub const DATA_SECTIONS: [&str; 3] = [".rodata", ".data", ".bss"];

/// Bounds of one loaded section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionBounds {
    /// First virtual address of the section.
    pub start_addr: u64,
    /// One past the last virtual address.
    pub end_addr: u64,
    /// Virtual address of file offset zero for this section.
    pub base_addr: u64,
}

impl SectionBounds {
    /// Whether the address falls inside the section.
    pub const fn contains(&self, addr: u64) -> bool {
        self.start_addr <= addr && addr < self.end_addr
    }
}

/// Read-only oracle over the binary image: section bounds and raw bytes.
///
/// Injected so tests can run against a stub image; the production
/// implementation wraps the ELF loader.
pub trait BinaryInfo {
    /// Bounds of `.rodata`.
    fn rodata(&self) -> SectionBounds;
    /// Bounds of `.data`.
    fn data(&self) -> SectionBounds;
    /// Bounds of `.text`.
    fn text(&self) -> SectionBounds;

    /// Bounds of a named section. The default knows the three sections
    /// every image carries; implementations that map `.plt.got`, `.plt`,
    /// or `.bss` override it to expose them.
    fn section(&self, name: &str) -> Option<SectionBounds> {
        match name {
            ".rodata" => Some(self.rodata()),
            ".data" => Some(self.data()),
            ".text" => Some(self.text()),
            _ => None,
        }
    }

    /// Little-endian integer read of `len` bytes at a file offset.
    fn read_bytes(&self, offset: u64, len: u32) -> Option<u128>;

    /// The section-backed value at a virtual address: the data sections
    /// are probed first, then the code sections, in table order.
    fn read_addr(&self, addr: u64, len: u32) -> Option<u128> {
        DATA_SECTIONS
            .iter()
            .chain(CODE_SECTIONS.iter())
            .filter_map(|name| self.section(name))
            .find(|section| section.contains(addr))
            .and_then(|section| {
                self.read_bytes(addr.wrapping_sub(section.base_addr), len)
            })
    }
}

/// The normalized program: instruction, successor, and symbol maps keyed by
/// address. Immutable for the lifetime of an exploration.
#[derive(Debug, Clone, Default)]
pub struct Program {
    address_inst_map: BTreeMap<u64, Instruction>,
    address_next_map: BTreeMap<u64, u64>,
    address_sym_table: BTreeMap<u64, String>,
}

impl Program {
    /// Build a program from its three maps.
    pub fn new(
        address_inst_map: BTreeMap<u64, Instruction>,
        address_next_map: BTreeMap<u64, u64>,
        address_sym_table: BTreeMap<u64, String>,
    ) -> Self {
        Self {
            address_inst_map,
            address_next_map,
            address_sym_table,
        }
    }

    /// Build a program from `(address, canonical text)` lines, deriving the
    /// successor map from program order.
    ///
    /// Lines that fail to parse are skipped; the normalizer contract makes
    /// that an empty set in practice.
    pub fn from_lines<'a, I>(lines: I, symbols: BTreeMap<u64, String>) -> Self
    where
        I: IntoIterator<Item = (u64, &'a str)>,
    {
        let address_inst_map: BTreeMap<u64, Instruction> = lines
            .into_iter()
            .filter_map(|(addr, text)| {
                Instruction::parse(text).ok().map(|inst| (addr, inst))
            })
            .collect();
        let address_next_map = address_inst_map
            .keys()
            .copied()
            .tuple_windows()
            .collect();
        Self {
            address_inst_map,
            address_next_map,
            address_sym_table: symbols,
        }
    }

    /// The instruction at an address.
    pub fn instruction(&self, addr: u64) -> Option<&Instruction> {
        self.address_inst_map.get(&addr)
    }

    /// The next instruction address in program order.
    pub fn next_address(&self, addr: u64) -> Option<u64> {
        self.address_next_map.get(&addr).copied()
    }

    /// The exported symbol at an address, when the address is a labelled
    /// function entry.
    pub fn symbol_at(&self, addr: u64) -> Option<&str> {
        self.address_sym_table.get(&addr).map(String::as_str)
    }

    /// The nearest disassembled address strictly before `addr`, probing at
    /// most `gap` bytes back.
    pub fn prev_address(&self, addr: u64, gap: u64) -> Option<u64> {
        (1..gap)
            .filter_map(|off| addr.checked_sub(off))
            .find(|candidate| self.address_inst_map.contains_key(candidate))
    }

    /// All disassembled addresses, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.address_inst_map.keys().copied()
    }

    /// Number of disassembled instructions.
    pub fn len(&self) -> usize {
        self.address_inst_map.len()
    }

    /// Whether the program has no instructions.
    pub fn is_empty(&self) -> bool {
        self.address_inst_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_successors_from_program_order() {
        let program = Program::from_lines(
            [
                (0x1000, "mov eax, 0x5"),
                (0x1005, "add eax, ebx"),
                (0x1007, "ret"),
            ],
            BTreeMap::new(),
        );
        assert_eq!(program.next_address(0x1000), Some(0x1005));
        assert_eq!(program.next_address(0x1005), Some(0x1007));
        assert_eq!(program.next_address(0x1007), None);
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn read_addr_probes_the_section_tables() {
        struct BssImage;
        impl BinaryInfo for BssImage {
            fn rodata(&self) -> SectionBounds {
                SectionBounds::default()
            }
            fn data(&self) -> SectionBounds {
                SectionBounds::default()
            }
            fn text(&self) -> SectionBounds {
                SectionBounds::default()
            }
            fn section(&self, name: &str) -> Option<SectionBounds> {
                (name == ".bss").then_some(SectionBounds {
                    start_addr: 0x7000,
                    end_addr: 0x7100,
                    base_addr: 0x7000,
                })
            }
            fn read_bytes(&self, offset: u64, _len: u32) -> Option<u128> {
                Some(u128::from(offset))
            }
        }
        assert_eq!(BssImage.read_addr(0x7010, 4), Some(0x10));
        assert_eq!(BssImage.read_addr(0x9000, 4), None);
    }

    #[test]
    fn prev_address_probes_within_gap() {
        let program =
            Program::from_lines([(0x1000, "nop"), (0x1010, "ret")], BTreeMap::new());
        assert_eq!(program.prev_address(0x1010, 25), Some(0x1000));
        assert_eq!(program.prev_address(0x1010, 8), None);
    }
}
