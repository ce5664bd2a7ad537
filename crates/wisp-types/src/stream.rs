//! Instruction-stream layout, reading, and disassembly.
//!
//! The stream is one flat byte buffer shared by every compiled module. Each
//! instruction is a one-byte [`Opcode`] followed by fixed-width little-endian
//! immediates. All jumps are absolute byte offsets into the buffer.

use std::fmt::Write as _;

use crate::opcode::{Immediates, Opcode};

/// Placeholder written for a branch or call target that is not known yet.
pub const INVALID_OFFSET: u32 = u32::MAX;

/// Size of one branch-table entry: `offset:u32 drop:u32 keep:u8`.
pub const TABLE_ENTRY_SIZE: u32 = 9;
pub const TABLE_ENTRY_OFFSET_OFFSET: u32 = 0;
pub const TABLE_ENTRY_DROP_OFFSET: u32 = 4;
pub const TABLE_ENTRY_KEEP_OFFSET: u32 = 8;

// ── Raw reads ────────────────────────────────────────────────────────────────

pub fn read_u8_at(code: &[u8], at: usize) -> u8 {
    code[at]
}

pub fn read_u32_at(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

pub fn read_u64_at(code: &[u8], at: usize) -> u64 {
    let lo = read_u32_at(code, at) as u64;
    let hi = read_u32_at(code, at + 4) as u64;
    lo | (hi << 32)
}

/// One branch-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub offset: u32,
    pub drop: u32,
    pub keep: u8,
}

impl TableEntry {
    /// Read entry `index` of the table starting at `table_offset`.
    pub fn read(code: &[u8], table_offset: u32, index: u32) -> Self {
        let at = (table_offset + index * TABLE_ENTRY_SIZE) as usize;
        Self {
            offset: read_u32_at(code, at + TABLE_ENTRY_OFFSET_OFFSET as usize),
            drop: read_u32_at(code, at + TABLE_ENTRY_DROP_OFFSET as usize),
            keep: read_u8_at(code, at + TABLE_ENTRY_KEEP_OFFSET as usize),
        }
    }
}

/// Cursor over the stream.
#[derive(Debug, Clone)]
pub struct StreamReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(code: &'a [u8], pos: usize) -> Self {
        Self { code, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> u8 {
        let v = read_u8_at(self.code, self.pos);
        self.pos += 1;
        v
    }

    pub fn read_u32(&mut self) -> u32 {
        let v = read_u32_at(self.code, self.pos);
        self.pos += 4;
        v
    }

    pub fn read_u64(&mut self) -> u64 {
        let v = read_u64_at(self.code, self.pos);
        self.pos += 8;
        v
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    /// Decode the instruction at the cursor and advance past it.
    ///
    /// Returns `None` at end of input or on an unknown opcode byte.
    pub fn next_instruction(&mut self) -> Option<Instruction> {
        if self.pos >= self.code.len() {
            return None;
        }
        let offset = self.pos;
        let opcode = Opcode::from_byte(self.read_u8())?;
        if self.pos + opcode.immediates().size() > self.code.len() {
            return None;
        }
        let operands = match opcode.immediates() {
            Immediates::None => Operands::None,
            Immediates::U32 => Operands::U32(self.read_u32()),
            Immediates::U64 => Operands::U64(self.read_u64()),
            Immediates::F32 => Operands::F32(self.read_u32()),
            Immediates::F64 => Operands::F64(self.read_u64()),
            Immediates::MemArg | Immediates::U32Pair => {
                let a = self.read_u32();
                Operands::Pair(a, self.read_u32())
            }
            Immediates::DropKeep => {
                let drop = self.read_u32();
                Operands::DropKeep(drop, self.read_u8())
            }
            Immediates::Data => {
                let size = self.read_u32();
                self.skip(size as usize);
                Operands::Data(size)
            }
        };
        Some(Instruction {
            offset,
            opcode,
            operands,
        })
    }
}

/// Decoded immediates of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    U32(u32),
    U64(u64),
    F32(u32),
    F64(u64),
    Pair(u32, u32),
    DropKeep(u32, u8),
    Data(u32),
}

/// A decoded stream instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operands: Operands,
}

impl Instruction {
    /// Text form of the instruction, without its offset.
    pub fn text(&self) -> String {
        let name = self.opcode.name();
        match (self.opcode, self.operands) {
            (Opcode::Br | Opcode::BrUnless | Opcode::Call, Operands::U32(target)) => {
                format!("{name} @{target}")
            }
            (Opcode::CallIndirect, Operands::Pair(table, sig)) => {
                format!("{name} ${table}:{sig}")
            }
            (Opcode::BrTable, Operands::Pair(count, table)) => {
                format!("{name} {count}, $#{count}, table:${table}")
            }
            (_, Operands::None) => name.to_string(),
            (_, Operands::U32(v)) => format!("{name} ${v}"),
            (_, Operands::U64(v)) => format!("{name} ${v}"),
            (_, Operands::F32(bits)) => format!("{name} ${}", f32::from_bits(bits)),
            (_, Operands::F64(bits)) => format!("{name} ${}", f64::from_bits(bits)),
            (_, Operands::Pair(memory, offset)) => format!("{name} ${memory}:+{offset}"),
            (_, Operands::DropKeep(drop, keep)) => format!("{name} ${drop} ${keep}"),
            (_, Operands::Data(size)) => format!("{name} ${size}"),
        }
    }
}

/// Disassemble `code[from..to]`, one `offset| text` line per instruction.
///
/// Branch-table payloads are listed entry by entry under their `data` line.
pub fn disassemble(code: &[u8], from: usize, to: usize) -> String {
    let to = to.min(code.len());
    let mut out = String::new();
    let mut reader = StreamReader::new(code, from);
    while reader.position() < to {
        let Some(instr) = reader.next_instruction() else {
            let _ = writeln!(out, "{:4}| <invalid>", reader.position());
            break;
        };
        let _ = writeln!(out, "{:4}| {}", instr.offset, instr.text());
        if let Operands::Data(size) = instr.operands {
            let start = (instr.offset + 5) as u32;
            for i in 0..size / TABLE_ENTRY_SIZE {
                let entry = TableEntry::read(code, start, i);
                let _ = writeln!(
                    out,
                    "{:4}|   entry {i}: offset: {} drop: {} keep: {}",
                    start + i * TABLE_ENTRY_SIZE,
                    entry.offset,
                    entry.drop,
                    entry.keep
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_reads_are_little_endian() {
        let code = [0x78, 0x56, 0x34, 0x12, 0xef, 0xcd, 0xab, 0x90];
        assert_eq!(read_u32_at(&code, 0), 0x1234_5678);
        assert_eq!(read_u64_at(&code, 0), 0x90ab_cdef_1234_5678);
    }

    #[test]
    fn test_reader_walks_instructions() {
        let code = stream(&[
            &[Opcode::I32Const.byte()],
            &41u32.to_le_bytes(),
            &[Opcode::DropKeep.byte()],
            &2u32.to_le_bytes(),
            &[1],
            &[Opcode::Return.byte()],
        ]);
        let mut reader = StreamReader::new(&code, 0);
        let first = reader.next_instruction().unwrap();
        assert_eq!(first.opcode, Opcode::I32Const);
        assert_eq!(first.operands, Operands::U32(41));
        let second = reader.next_instruction().unwrap();
        assert_eq!(second.offset, 5);
        assert_eq!(second.operands, Operands::DropKeep(2, 1));
        let third = reader.next_instruction().unwrap();
        assert_eq!(third.opcode, Opcode::Return);
        assert!(reader.next_instruction().is_none());
    }

    #[test]
    fn test_table_entry_layout() {
        let mut code = vec![0u8; 3];
        code.extend_from_slice(&100u32.to_le_bytes());
        code.extend_from_slice(&2u32.to_le_bytes());
        code.push(1);
        code.extend_from_slice(&200u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0);

        let e0 = TableEntry::read(&code, 3, 0);
        assert_eq!(e0, TableEntry { offset: 100, drop: 2, keep: 1 });
        let e1 = TableEntry::read(&code, 3, 1);
        assert_eq!(e1, TableEntry { offset: 200, drop: 0, keep: 0 });
    }

    #[test]
    fn test_disassemble_lists_table_entries() {
        let code = stream(&[
            &[Opcode::BrTable.byte()],
            &1u32.to_le_bytes(),
            &14u32.to_le_bytes(),
            &[Opcode::Data.byte()],
            &18u32.to_le_bytes(),
            &32u32.to_le_bytes(),
            &0u32.to_le_bytes(),
            &[0],
            &32u32.to_le_bytes(),
            &1u32.to_le_bytes(),
            &[0],
            &[Opcode::Unreachable.byte()],
        ]);
        let text = disassemble(&code, 0, code.len());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "   0| br_table 1, $#1, table:$14");
        assert_eq!(lines[1], "   9| data $18");
        assert_eq!(lines[2], "  14|   entry 0: offset: 32 drop: 0 keep: 0");
        assert_eq!(lines[3], "  23|   entry 1: offset: 32 drop: 1 keep: 0");
        assert_eq!(lines[4], "  32| unreachable");
    }
}
