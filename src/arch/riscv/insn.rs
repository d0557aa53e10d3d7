//! RISC-V base instruction formats and the few builders the patchers need.
//!
//! All encodings are 32-bit (no compressed forms): patch sites are assembled
//! with `.option norvc`.

use bitfield::bitfield;

/// `addi x0, x0, 0`
pub const NOP: u32 = 0x0000_0013;

/// Size of one instruction in bytes.
pub const INSN_SIZE: usize = 4;

pub mod opcode {
    pub const OP_IMM: u8 = 0b001_0011;
    pub const OP_IMM_32: u8 = 0b001_1011;
    pub const LUI: u8 = 0b011_0111;
    pub const OP: u8 = 0b011_0011;
    pub const OP_32: u8 = 0b011_1011;
}

/// Register numbers.
pub mod reg {
    pub const ZERO: u8 = 0;
    pub const T0: u8 = 5;
    pub const T1: u8 = 6;
    pub const A0: u8 = 10;
    pub const A1: u8 = 11;
}

bitfield! {
    /// U-type: `lui`, `auipc`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct UType(u32);
    impl Debug;
    pub u8, opcode, set_opcode: 6, 0;
    pub u8, rd, set_rd: 11, 7;
    pub u32, imm20, set_imm20: 31, 12;
}

bitfield! {
    /// I-type: register-immediate arithmetic, including shifts.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct IType(u32);
    impl Debug;
    pub u8, opcode, set_opcode: 6, 0;
    pub u8, rd, set_rd: 11, 7;
    pub u8, funct3, set_funct3: 14, 12;
    pub u8, rs1, set_rs1: 19, 15;
    pub u16, imm12, set_imm12: 31, 20;
    /// RV32 and `*w` shift amount.
    pub u8, shamt5, set_shamt5: 24, 20;
    /// RV64 shift amount.
    pub u8, shamt6, set_shamt6: 25, 20;
    /// Upper immediate bits that distinguish `srli` from `srai`.
    pub u8, funct6, set_funct6: 31, 26;
}

bitfield! {
    /// R-type: register-register arithmetic.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RType(u32);
    impl Debug;
    pub u8, opcode, set_opcode: 6, 0;
    pub u8, rd, set_rd: 11, 7;
    pub u8, funct3, set_funct3: 14, 12;
    pub u8, rs1, set_rs1: 19, 15;
    pub u8, rs2, set_rs2: 24, 20;
    pub u8, funct7, set_funct7: 31, 25;
}

/// Sign-extends the low `bits` bits of `value`.
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

pub fn lui(rd: u8, imm20: u32) -> u32 {
    let mut insn = UType(0);
    insn.set_opcode(opcode::LUI);
    insn.set_rd(rd);
    insn.set_imm20(imm20 & 0xf_ffff);
    insn.0
}

fn itype(op: u8, funct3: u8, rd: u8, rs1: u8, imm: i32) -> u32 {
    let mut insn = IType(0);
    insn.set_opcode(op);
    insn.set_funct3(funct3);
    insn.set_rd(rd);
    insn.set_rs1(rs1);
    insn.set_imm12((imm as u32 & 0xfff) as u16);
    insn.0
}

fn rtype(op: u8, funct3: u8, funct7: u8, rd: u8, rs1: u8, rs2: u8) -> u32 {
    let mut insn = RType(0);
    insn.set_opcode(op);
    insn.set_funct3(funct3);
    insn.set_funct7(funct7);
    insn.set_rd(rd);
    insn.set_rs1(rs1);
    insn.set_rs2(rs2);
    insn.0
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(opcode::OP_IMM, 0b000, rd, rs1, imm)
}

pub fn addiw(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(opcode::OP_IMM_32, 0b000, rd, rs1, imm)
}

pub fn slli(rd: u8, rs1: u8, shamt: u8) -> u32 {
    itype(opcode::OP_IMM, 0b001, rd, rs1, (shamt & 0x3f) as i32)
}

pub fn srli(rd: u8, rs1: u8, shamt: u8) -> u32 {
    itype(opcode::OP_IMM, 0b101, rd, rs1, (shamt & 0x3f) as i32)
}

pub fn srliw(rd: u8, rs1: u8, shamt: u8) -> u32 {
    itype(opcode::OP_IMM_32, 0b101, rd, rs1, (shamt & 0x1f) as i32)
}

pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(opcode::OP, 0b000, 0b000_0000, rd, rs1, rs2)
}

/// Zba `add.uw rd, rs1, rs2`: `rs2 + zext32(rs1)`.
pub fn add_uw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(opcode::OP_32, 0b000, 0b000_0100, rd, rs1, rs2)
}

/// Zbkb `pack rd, rs1, rs2`: low halves of `rs1` and `rs2` concatenated.
pub fn pack(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(opcode::OP, 0b100, 0b000_0100, rd, rs1, rs2)
}
