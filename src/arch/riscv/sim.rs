//! A minimal RV64 interpreter for the instructions patch sites use.
//!
//! Registers start out holding junk so a sequence that reads a register it
//! never wrote produces a visibly wrong result.

use super::insn::{opcode, sign_extend, IType, RType, UType};

pub(crate) struct Hart {
    regs: [u64; 32],
}

impl Hart {
    pub fn new() -> Self {
        let mut regs = [0; 32];
        for (i, r) in regs.iter_mut().enumerate().skip(1) {
            *r = 0xa5a5_5a5a_0000_0000 | (i as u64 * 0x0101_0101);
        }
        Hart { regs }
    }

    pub fn reg(&self, r: u8) -> u64 {
        self.regs[r as usize]
    }

    fn set(&mut self, r: u8, value: u64) {
        if r != 0 {
            self.regs[r as usize] = value;
        }
    }

    pub fn run(&mut self, insns: &[u32]) {
        for &insn in insns {
            self.step(insn);
        }
    }

    pub fn step(&mut self, insn: u32) {
        let i = IType(insn);
        let r = RType(insn);
        let rs1 = self.reg(i.rs1());
        let rs2 = self.reg(r.rs2());
        let imm = sign_extend(i.imm12() as u32, 12) as i64 as u64;

        let value = match (i.opcode(), i.funct3()) {
            (opcode::LUI, _) => (UType(insn).imm20() << 12) as i32 as i64 as u64,
            (opcode::OP_IMM, 0b000) => rs1.wrapping_add(imm),
            (opcode::OP_IMM, 0b001) => rs1 << i.shamt6(),
            (opcode::OP_IMM, 0b101) if i.funct6() == 0 => rs1 >> i.shamt6(),
            (opcode::OP_IMM_32, 0b000) => (rs1.wrapping_add(imm) as u32) as i32 as i64 as u64,
            (opcode::OP_IMM_32, 0b101) if i.funct6() == 0 => {
                ((rs1 as u32) >> i.shamt5()) as i32 as i64 as u64
            }
            (opcode::OP, 0b000) if r.funct7() == 0 => rs1.wrapping_add(rs2),
            (opcode::OP, 0b100) if r.funct7() == 0b000_0100 => (rs2 << 32) | (rs1 & 0xffff_ffff),
            (opcode::OP_32, 0b000) if r.funct7() == 0b000_0100 => {
                rs2.wrapping_add(rs1 & 0xffff_ffff)
            }
            _ => panic!("unsupported instruction {insn:#010x}"),
        };
        self.set(i.rd(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv::insn::{self, reg, NOP};

    #[test]
    fn test_nop_changes_nothing() {
        let mut hart = Hart::new();
        let before = hart.regs;
        hart.step(NOP);
        assert_eq!(hart.regs, before);
    }

    #[test]
    fn test_word_ops_sign_extend() {
        let mut hart = Hart::new();
        hart.run(&[insn::lui(reg::A0, 0x80000), insn::addiw(reg::A0, reg::A0, -1)]);
        assert_eq!(hart.reg(reg::A0), 0x7fff_ffff);

        hart.run(&[insn::lui(reg::A0, 0x80000)]);
        assert_eq!(hart.reg(reg::A0), 0xffff_ffff_8000_0000);

        hart.run(&[insn::srliw(reg::A1, reg::A0, 4)]);
        assert_eq!(hart.reg(reg::A1), 0x0800_0000);
    }
}
