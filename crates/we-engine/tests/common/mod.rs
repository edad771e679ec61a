//! Shared helpers for integration tests: a minimal program assembler

#![allow(dead_code)]

use std::rc::Rc;

use we_engine::{Opcode, Vm};

/// Byte-level program builder
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current program offset
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.to_u8());
        self
    }

    /// `num` with the narrowest width that holds `n`
    pub fn num(&mut self, n: i64) -> &mut Self {
        let base = Opcode::Num.to_u8();
        if let Ok(v) = i8::try_from(n) {
            self.code.push(base);
            self.code.push(v as u8);
        } else if let Ok(v) = i16::try_from(n) {
            self.code.push(base | 0x40);
            self.code.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = i32::try_from(n) {
            self.code.push(base | 0x80);
            self.code.extend_from_slice(&v.to_be_bytes());
        } else {
            self.code.push(base | 0xC0);
            self.code.extend_from_slice(&n.to_be_bytes());
        }
        self
    }

    /// Inline buffer literal
    pub fn buf(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.push(Opcode::Buf.to_u8());
        self.code.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.code.extend_from_slice(bytes);
        self
    }

    /// Instruction with one-byte operands
    pub fn with(&mut self, op: Opcode, operands: &[u8]) -> &mut Self {
        self.code.push(op.to_u8());
        self.code.extend_from_slice(operands);
        self
    }

    /// Raw bytes, for data placed after the code
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Emit `op` with a zero offset; returns the position to patch
    pub fn branch(&mut self, op: Opcode) -> usize {
        self.code.push(op.to_u8());
        let at = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        at
    }

    /// Point the offset at `at` to `target`
    pub fn patch(&mut self, at: usize, target: usize) {
        let relative = target as i64 - (at as i64 + 4);
        self.code[at..at + 4].copy_from_slice(&(relative as i32).to_be_bytes());
    }

    /// Jump-like instruction to a known target
    pub fn jump_to(&mut self, op: Opcode, target: usize) -> &mut Self {
        let at = self.branch(op);
        self.patch(at, target);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.code.clone()
    }

    pub fn finish(&self) -> Rc<[u8]> {
        Rc::from(self.code.clone())
    }
}

/// VM with `program` in register 0
pub fn load(program: Rc<[u8]>) -> Vm {
    let mut vm = Vm::create(32).unwrap();
    vm.push_buffer(program).unwrap();
    vm
}
