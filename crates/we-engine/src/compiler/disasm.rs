//! Program disassembler
//!
//! Decodes a program buffer into one [`Instruction`] per opcode without
//! executing it. Jump and literal offsets are shown both relative and
//! resolved to an absolute program offset.

use std::fmt;

use super::opcode::{num_width, Opcode};

/// Disassembly failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisasmError {
    /// An operand runs past the end of the program
    #[error("truncated instruction at offset {0:#06x}")]
    Truncated(usize),

    /// The opcode byte has no assigned operation
    #[error("unassigned opcode {byte:#04x} at offset {offset:#06x}")]
    Unassigned {
        /// Offset of the instruction
        offset: usize,
        /// Raw instruction byte
        byte: u8,
    },
}

/// Decoded operand of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate number
    Int(i64),
    /// Inline buffer literal
    Bytes(Vec<u8>),
    /// Register, external id or expected stack height
    Byte(u8),
    /// Several registers
    Registers(Vec<u8>),
    /// Relative offset and the absolute position it resolves to
    Offset {
        /// Offset as encoded
        relative: i32,
        /// Program offset it refers to
        target: i64,
    },
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode byte
    pub offset: usize,
    /// Operation
    pub opcode: Opcode,
    /// Decoded operand
    pub operand: Operand,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}  {}", self.offset, self.opcode.name())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int(n) => write!(f, " {}", n),
            Operand::Bytes(bytes) => write!(f, " \"{}\"", bytes.escape_ascii()),
            Operand::Byte(b) => write!(f, " {}", b),
            Operand::Registers(regs) => {
                for r in regs {
                    write!(f, " r{}", r)?;
                }
                Ok(())
            }
            Operand::Offset { relative, target } => {
                write!(f, " {:+} -> {:04x}", relative, target)
            }
        }
    }
}

fn take(code: &[u8], at: usize, len: usize, offset: usize) -> Result<&[u8], DisasmError> {
    code.get(at..at + len).ok_or(DisasmError::Truncated(offset))
}

fn be_int(bytes: &[u8]) -> i64 {
    let mut value = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1i64
    } else {
        0
    };
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    value
}

/// Decode the instruction at `offset`; returns it with the offset of the next
pub fn disassemble_instruction(
    code: &[u8],
    offset: usize,
) -> Result<(Instruction, usize), DisasmError> {
    let byte = *code.get(offset).ok_or(DisasmError::Truncated(offset))?;
    let opcode = Opcode::from_u8(byte).ok_or(DisasmError::Unassigned { offset, byte })?;
    let at = offset + 1;

    let (operand, next) = match opcode {
        Opcode::Num => {
            let width = num_width(byte);
            let raw = take(code, at, width, offset)?;
            (Operand::Int(be_int(raw)), at + width)
        }
        Opcode::Buf => {
            let raw = take(code, at, 2, offset)?;
            let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
            let bytes = take(code, at + 2, len, offset)?;
            (Operand::Bytes(bytes.to_vec()), at + 2 + len)
        }
        Opcode::Get | Opcode::Set | Opcode::Mov | Opcode::Pop => {
            let raw = take(code, at, 1, offset)?;
            (Operand::Registers(vec![raw[0]]), at + 1)
        }
        Opcode::Ext | Opcode::Csp => {
            let raw = take(code, at, 1, offset)?;
            (Operand::Byte(raw[0]), at + 1)
        }
        Opcode::Idx | Opcode::Val => {
            let count = if opcode == Opcode::Idx { 2 } else { 3 };
            let raw = take(code, at, count, offset)?;
            (Operand::Registers(raw.to_vec()), at + count)
        }
        Opcode::Jmp | Opcode::Brz | Opcode::Bin => {
            let raw = take(code, at, 4, offset)?;
            let relative = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let end = at + 4;
            let target = end as i64 + relative as i64;
            (Operand::Offset { relative, target }, end)
        }
        _ => (Operand::None, at),
    };

    Ok((
        Instruction {
            offset,
            opcode,
            operand,
        },
        next,
    ))
}

/// Decode a whole program
pub fn disassemble(code: &[u8]) -> Result<Vec<Instruction>, DisasmError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (instruction, next) = disassemble_instruction(code, offset)?;
        out.push(instruction);
        offset = next;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_program() {
        // num 11; num16 -2; add; buf "hi"; jmp -9; hlt
        let code = [
            0x01, 11, 0x41, 0xFF, 0xFE, 0x09, 0x02, 0x00, 0x02, b'h', b'i', 0x16, 0xFF, 0xFF,
            0xFF, 0xF7, 0x15,
        ];
        let listing = disassemble(&code).unwrap();
        assert_eq!(listing.len(), 6);
        assert_eq!(listing[0].operand, Operand::Int(11));
        assert_eq!(listing[1].operand, Operand::Int(-2));
        assert_eq!(listing[2].opcode, Opcode::Add);
        assert_eq!(listing[3].operand, Operand::Bytes(b"hi".to_vec()));
        assert_eq!(
            listing[4].operand,
            Operand::Offset {
                relative: -9,
                target: 7
            }
        );
        assert_eq!(listing[5].offset, 16);
    }

    #[test]
    fn test_instruction_display() {
        let (ins, _) = disassemble_instruction(&[0x07, 3], 0).unwrap();
        assert_eq!(ins.to_string(), "0000  mov r3");
        let (ins, _) = disassemble_instruction(&[0xC1, 0, 0, 0, 0, 0, 0, 1, 0], 0).unwrap();
        assert_eq!(ins.to_string(), "0000  num 256");
    }

    #[test]
    fn test_errors() {
        assert_eq!(disassemble(&[0x01]), Err(DisasmError::Truncated(0)));
        assert_eq!(
            disassemble(&[0x15, 0x3F]),
            Err(DisasmError::Unassigned {
                offset: 1,
                byte: 0x3F
            })
        );
    }
}
