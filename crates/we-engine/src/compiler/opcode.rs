//! Opcode definitions
//!
//! The low 6 bits of an instruction byte select the operation. Only `num`
//! uses the high 2 bits, as the width of its immediate.

/// Mask selecting the operation from an instruction byte
pub const OPCODE_MASK: u8 = 0x3F;

/// Bytecode opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Memory =====
    /// Push nil
    Nil = 0,
    /// Push a signed immediate (width in bits 6-7)
    Num = 1,
    /// Push an inline buffer literal: u16 length, bytes
    Buf = 2,
    /// Push a new table
    Tab = 3,
    /// Push a new array
    Arr = 4,
    /// Get-or-default from register container: u8 register
    Get = 5,
    /// Store into register container: u8 register
    Set = 6,
    /// Push a copy of a register: u8 register
    Mov = 7,
    /// Pop into a register: u8 register
    Pop = 8,

    // ===== Arithmetic =====
    /// a + b
    Add = 9,
    /// a - b
    Sub = 10,
    /// a * b
    Mul = 11,
    /// a < b
    Cmp = 12,
    /// a / b
    Div = 13,
    /// a % b
    Mod = 14,
    /// a & b
    And = 15,
    /// a | b
    Ior = 16,
    /// a ^ b
    Xor = 17,
    /// a << b
    Shl = 18,
    /// a >> b (logical)
    Shr = 19,
    /// a == b
    Eql = 20,

    // ===== Control =====
    /// Yield to the host or return to the caller frame
    Hlt = 21,
    /// Relative jump: i32 offset
    Jmp = 22,
    /// Pop and jump when zero: i32 offset
    Brz = 23,
    /// Call an external function: u8 id
    Ext = 24,

    // ===== Built-ins =====
    /// Type id of the top
    Tid = 25,
    /// Length of the top
    Len = 26,
    /// Reference count of the top
    Ref = 27,
    /// Allocated size of the top
    Siz = 28,
    /// First byte of a buffer
    Ord = 29,
    /// One-byte buffer from a number
    Chr = 30,
    /// Parse a buffer as a number
    Int = 31,
    /// Stringify the top
    Str = 32,
    /// Concatenate two buffers
    Cat = 33,
    /// Compare two buffers
    Com = 34,
    /// Slice a buffer: buffer, start, stop, step
    Sel = 35,
    /// Advance an iteration cursor: u8 object, u8 cursor
    Idx = 36,
    /// Key/value at a cursor: u8 object, u8 cursor, u8 destination
    Val = 37,
    /// Join an array with a separator
    Tie = 38,
    /// Buffer view offset
    Off = 39,
    /// Heap identity
    Oid = 40,
    /// Push the stack height: u8 expected height
    Csp = 41,
    /// Push a literal at a relative offset: i32 offset
    Bin = 42,
    /// Get (or create) the meta table
    Gmt = 43,
    /// Set the meta table
    Smt = 44,
    /// Push 0
    Lbf = 45,
    /// Push 1
    Lbt = 46,
    /// Resize a container
    Rsz = 47,
    /// Downgrade the top to a weak alias
    Wea = 48,
    /// Run an array as a nested program
    Res = 49,
    /// Enter an array as a child frame
    Eva = 50,
}

impl Opcode {
    /// Decode the operation of an instruction byte (high bits ignored)
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        const TABLE: [Opcode; 51] = [
            Nil, Num, Buf, Tab, Arr, Get, Set, Mov, Pop, Add, Sub, Mul, Cmp, Div, Mod, And, Ior,
            Xor, Shl, Shr, Eql, Hlt, Jmp, Brz, Ext, Tid, Len, Ref, Siz, Ord, Chr, Int, Str, Cat,
            Com, Sel, Idx, Val, Tie, Off, Oid, Csp, Bin, Gmt, Smt, Lbf, Lbt, Rsz, Wea, Res, Eva,
        ];
        TABLE.get((byte & OPCODE_MASK) as usize).copied()
    }

    /// Convert to the base instruction byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Num => "num",
            Self::Buf => "buf",
            Self::Tab => "tab",
            Self::Arr => "arr",
            Self::Get => "get",
            Self::Set => "set",
            Self::Mov => "mov",
            Self::Pop => "pop",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Cmp => "cmp",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::And => "and",
            Self::Ior => "ior",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Eql => "eql",
            Self::Hlt => "hlt",
            Self::Jmp => "jmp",
            Self::Brz => "brz",
            Self::Ext => "ext",
            Self::Tid => "tid",
            Self::Len => "len",
            Self::Ref => "ref",
            Self::Siz => "siz",
            Self::Ord => "ord",
            Self::Chr => "chr",
            Self::Int => "int",
            Self::Str => "str",
            Self::Cat => "cat",
            Self::Com => "com",
            Self::Sel => "sel",
            Self::Idx => "idx",
            Self::Val => "val",
            Self::Tie => "tie",
            Self::Off => "off",
            Self::Oid => "oid",
            Self::Csp => "csp",
            Self::Bin => "bin",
            Self::Gmt => "gmt",
            Self::Smt => "smt",
            Self::Lbf => "lbf",
            Self::Lbt => "lbt",
            Self::Rsz => "rsz",
            Self::Wea => "wea",
            Self::Res => "res",
            Self::Eva => "eva",
        }
    }

    /// Operand bytes following an instruction byte
    ///
    /// `buf` is reported without its inline payload.
    pub fn operand_size(byte: u8) -> Option<usize> {
        let size = match Self::from_u8(byte)? {
            Self::Num => num_width(byte),
            Self::Buf => 2,
            Self::Get | Self::Set | Self::Mov | Self::Pop | Self::Ext | Self::Csp => 1,
            Self::Idx => 2,
            Self::Val => 3,
            Self::Jmp | Self::Brz | Self::Bin => 4,
            _ => 0,
        };
        Some(size)
    }
}

/// Immediate width selected by bits 6-7 of a `num` instruction
#[inline]
pub fn num_width(byte: u8) -> usize {
    1 << (byte >> 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=50u8 {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op.to_u8(), byte);
        }
    }

    #[test]
    fn test_unassigned_opcodes() {
        for byte in 51..=63u8 {
            assert_eq!(Opcode::from_u8(byte), None);
        }
    }

    #[test]
    fn test_high_bits_ignored() {
        assert_eq!(Opcode::from_u8(0xC1), Some(Opcode::Num));
        assert_eq!(Opcode::from_u8(0x40 | 9), Some(Opcode::Add));
    }

    #[test]
    fn test_num_width() {
        assert_eq!(num_width(0x01), 1);
        assert_eq!(num_width(0x41), 2);
        assert_eq!(num_width(0x81), 4);
        assert_eq!(num_width(0xC1), 8);
        assert_eq!(Opcode::operand_size(0xC1), Some(8));
    }

    #[test]
    fn test_names() {
        assert_eq!(Opcode::Eva.name(), "eva");
        assert_eq!(Opcode::Cmp.name(), "cmp");
    }
}
