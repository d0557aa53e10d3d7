//! Runtime constant instruction encoding.
//!
//! A pointer constant is materialized by `lui`+`addi` pairs whose immediates
//! start out as recognizable placeholders. Fixing a site up rewrites only the
//! immediate fields (and, when `lui` is elided, the `addi` source register),
//! leaving the destination registers chosen by the compiler intact.
//!
//! On RV64 the low and high halves are loaded into two registers by two
//! interleaved pairs, then merged by a four-instruction tail:
//!
//! ```text
//! lui   rd,  0x89abd         lui   rd,  hi20(lo32)
//! lui   tmp, 0x1234          lui   tmp, hi20(hi32)
//! addiw rd,  rd,  -0x211  => addiw rd,  rd,  lo12(lo32)
//! addiw tmp, tmp, 0x567      addiw tmp, tmp, lo12(hi32)
//! <merge tail>               <merge tail>
//! ```

use arrayvec::ArrayVec;

use super::insn::{self, sign_extend, NOP};
use crate::cpufeature::{IsaExt, IsaExtensions};

/// Value encoded by an unpatched pointer site.
pub const PTR_PLACEHOLDER: u64 = 0x0123_4567_89ab_cdef;

/// Shift amount encoded by an unpatched shift site.
pub const SHIFT_PLACEHOLDER: u8 = 12;

/// Bits of `addi` kept when only its immediate changes: opcode, rd, funct3, rs1.
const ADDI_KEEP: u32 = 0x000f_ffff;
/// Bits of `addi` kept when it must load from `x0`: opcode, rd, funct3.
const ADDI_KEEP_LOAD: u32 = 0x0000_7fff;
/// Bits of `lui` kept when its immediate changes: opcode, rd.
const LUI_KEEP: u32 = 0x0000_0fff;
/// The 5-bit shift amount field at bits 24:20.
const SHAMT_MASK: u32 = 0x01f0_0000;

/// Splits `val` into the `lui` part and the sign-extended 12-bit `addi` part.
///
/// `upper.wrapping_add(lower as u32) == val` always holds; `upper` has its low
/// 12 bits clear.
pub const fn split_imm(val: u32) -> (u32, i32) {
    let lower = sign_extend(val, 12);
    let upper = val.wrapping_sub(lower as u32);
    (upper, lower)
}

/// Re-encodes a `lui`/`addi` (or `addiw`) pair to materialize `val`.
///
/// A `lui` whose upper part is zero becomes a `nop` and the `addi` is turned
/// into a load from `x0`. An `addi` whose lower part is zero becomes a `nop`,
/// unless `lui` was elided as well: then it stays as `addi rd, x0, 0` so the
/// destination register is still written.
pub fn fixup_32(lui: u32, addi: u32, val: u32) -> [u32; 2] {
    let (upper, lower) = split_imm(val);
    let mut addi_keep = ADDI_KEEP;

    let lui = if upper & 0xffff_f000 != 0 {
        (lui & LUI_KEEP) | (upper & 0xffff_f000)
    } else {
        addi_keep = ADDI_KEEP_LOAD;
        NOP
    };

    let lower = lower as u32 & 0xfff;
    let addi = if lower != 0 || lui == NOP {
        (addi & addi_keep) | (lower << 20)
    } else {
        NOP
    };

    [lui, addi]
}

/// Re-encodes an RV32 pointer site: `[lui, addi]`.
pub fn fixup_ptr32(site: [u32; 2], val: u32) -> [u32; 2] {
    fixup_32(site[0], site[1], val)
}

/// Re-encodes the four load instructions of an RV64 pointer site.
///
/// `site` is `[lui rd, lui tmp, addiw rd, addiw tmp]`; the merge tail that
/// follows is not touched.
pub fn fixup_ptr64(site: [u32; 4], val: u64) -> [u32; 4] {
    let [lui_lo, addi_lo] = fixup_32(site[0], site[2], val as u32);
    let [lui_hi, addi_hi] = fixup_32(site[1], site[3], (val >> 32) as u32);
    [lui_lo, lui_hi, addi_lo, addi_hi]
}

/// Replaces the 5-bit shift amount of `srli`/`srliw` with `val & 0x1f`.
pub const fn fixup_shift(insn: u32, val: u32) -> u32 {
    (insn & !SHAMT_MASK) | ((val & 0b11111) << 20)
}

/// How an RV64 pointer site combines its two 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// `slli tmp,32; slli rd,32; srli rd,32; add rd,rd,tmp`
    ShiftAdd,
    /// Zba: `slli tmp,32; add.uw rd,rd,tmp`
    AddUw,
    /// Zbkb: `pack rd,rd,tmp`
    Pack,
}

impl MergeStrategy {
    /// The fastest strategy the extension set allows.
    pub fn select(exts: IsaExtensions) -> Self {
        if exts.has(IsaExt::Zbkb) {
            MergeStrategy::Pack
        } else if exts.has(IsaExt::Zba) {
            MergeStrategy::AddUw
        } else {
            MergeStrategy::ShiftAdd
        }
    }

    /// The extension an alternative carrying this tail is conditioned on.
    pub fn extension(self) -> Option<IsaExt> {
        match self {
            MergeStrategy::ShiftAdd => None,
            MergeStrategy::AddUw => Some(IsaExt::Zba),
            MergeStrategy::Pack => Some(IsaExt::Zbkb),
        }
    }

    /// The four-instruction merge tail, padded with `nop`s.
    pub fn tail(self, rd: u8, tmp: u8) -> [u32; 4] {
        match self {
            MergeStrategy::ShiftAdd => [
                insn::slli(tmp, tmp, 32),
                insn::slli(rd, rd, 32),
                insn::srli(rd, rd, 32),
                insn::add(rd, rd, tmp),
            ],
            MergeStrategy::AddUw => [
                insn::slli(tmp, tmp, 32),
                insn::add_uw(rd, rd, tmp),
                NOP,
                NOP,
            ],
            MergeStrategy::Pack => [insn::pack(rd, rd, tmp), NOP, NOP, NOP],
        }
    }
}

/// Maximum length in instructions of any placeholder sequence.
pub const MAX_SEQUENCE: usize = 8;

pub type Sequence = ArrayVec<u32, MAX_SEQUENCE>;

/// The unpatched RV32 pointer sequence: `lui rd,0x89abd; addi rd,rd,-0x211`.
pub fn ptr32_placeholder(rd: u8) -> Sequence {
    let (upper, lower) = split_imm(PTR_PLACEHOLDER as u32);
    let mut seq = Sequence::new();
    seq.push(insn::lui(rd, upper >> 12));
    seq.push(insn::addi(rd, rd, lower));
    seq
}

/// The unpatched RV64 pointer sequence followed by the `strategy` tail.
pub fn ptr64_placeholder(rd: u8, tmp: u8, strategy: MergeStrategy) -> Sequence {
    let (upper_lo, lower_lo) = split_imm(PTR_PLACEHOLDER as u32);
    let (upper_hi, lower_hi) = split_imm((PTR_PLACEHOLDER >> 32) as u32);
    let mut seq = Sequence::new();
    seq.push(insn::lui(rd, upper_lo >> 12));
    seq.push(insn::lui(tmp, upper_hi >> 12));
    seq.push(insn::addiw(rd, rd, lower_lo));
    seq.push(insn::addiw(tmp, tmp, lower_hi));
    seq.extend(strategy.tail(rd, tmp));
    seq
}

/// The unpatched shift: `srliw` on RV64, `srli` on RV32.
pub fn shift_placeholder(rd: u8, rs: u8, rv64: bool) -> u32 {
    if rv64 {
        insn::srliw(rd, rs, SHIFT_PLACEHOLDER)
    } else {
        insn::srli(rd, rs, SHIFT_PLACEHOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv::insn::{reg, IType, UType};
    use crate::arch::riscv::sim::Hart;
    use proptest::prelude::*;

    fn decode_32(pair: [u32; 2]) -> u32 {
        let upper = if pair[0] == NOP { 0 } else { UType(pair[0]).imm20() << 12 };
        let lower = if pair[1] == NOP {
            0
        } else {
            sign_extend(IType(pair[1]).imm12() as u32, 12)
        };
        upper.wrapping_add(lower as u32)
    }

    #[test]
    fn test_placeholders_match_assembler() {
        let seq = ptr64_placeholder(reg::A0, reg::A1, MergeStrategy::ShiftAdd);
        assert_eq!(
            seq.as_slice(),
            &[
                0x89ab_d537, // lui   a0,0x89abd
                0x0123_45b7, // lui   a1,0x1234
                0xdef5_051b, // addiw a0,a0,-0x211
                0x5675_859b, // addiw a1,a1,0x567
                0x0205_9593, // slli  a1,a1,32
                0x0205_1513, // slli  a0,a0,32
                0x0205_5513, // srli  a0,a0,32
                0x00b5_0533, // add   a0,a0,a1
            ]
        );
        assert_eq!(ptr32_placeholder(reg::A0).as_slice(), &[0x89ab_d537, 0xdef5_0513]);
    }

    #[test]
    fn test_placeholder_decodes_to_placeholder_value() {
        let seq = ptr32_placeholder(reg::A0);
        assert_eq!(decode_32([seq[0], seq[1]]), PTR_PLACEHOLDER as u32);
    }

    #[test]
    fn test_fixup_scenario_89abc211() {
        let seq = ptr32_placeholder(reg::A0);
        let [lui, addi] = fixup_32(seq[0], seq[1], 0x89ab_c211);

        // 0x211 has bit 11 clear, so the lower part is positive.
        assert_eq!(split_imm(0x89ab_c211), (0x89ab_c000, 0x211));
        assert_eq!(UType(lui).imm20(), 0x89abc);
        assert_eq!(UType(lui).rd(), reg::A0);
        assert_eq!(IType(addi).imm12(), 0x211);
        assert_eq!(IType(addi).rs1(), reg::A0);
        assert_eq!(lui, 0x89ab_c537);
        assert_eq!(addi, 0x2115_0513);
    }

    #[test]
    fn test_fixup_negative_lower() {
        // Bit 11 set: lower is negative and upper rounds up.
        assert_eq!(split_imm(0x1234_5800), (0x1234_6000, -0x800));
        let [lui, addi] = fixup_32(insn::lui(reg::T0, 0), insn::addi(reg::T0, reg::T0, 0), 0x1234_5800);
        assert_eq!(UType(lui).imm20(), 0x12346);
        assert_eq!(sign_extend(IType(addi).imm12() as u32, 12), -0x800);
    }

    #[test]
    fn test_zero_elision() {
        let seq = ptr32_placeholder(reg::A0);

        // Low 12 bits clear: addi becomes nop.
        let [lui, addi] = fixup_32(seq[0], seq[1], 0x4000_0000);
        assert_eq!(addi, NOP);
        assert_eq!(lui, insn::lui(reg::A0, 0x40000));

        // Fits in 12 signed bits: lui becomes nop and addi loads from x0.
        let [lui, addi] = fixup_32(seq[0], seq[1], 0x7ff);
        assert_eq!(lui, NOP);
        assert_eq!(addi, insn::addi(reg::A0, reg::ZERO, 0x7ff));

        let [lui, addi] = fixup_32(seq[0], seq[1], 0xffff_f800);
        assert_eq!(lui, NOP);
        assert_eq!(addi, insn::addi(reg::A0, reg::ZERO, -0x800));
    }

    #[test]
    fn test_zero_still_defines_register() {
        let seq = ptr32_placeholder(reg::A0);
        let [lui, addi] = fixup_32(seq[0], seq[1], 0);
        assert_eq!(lui, NOP);
        assert_eq!(addi, insn::addi(reg::A0, reg::ZERO, 0));
    }

    #[test]
    fn test_fixup_is_idempotent() {
        let seq = ptr64_placeholder(reg::A0, reg::A1, MergeStrategy::ShiftAdd);
        let site = [seq[0], seq[1], seq[2], seq[3]];
        for val in [0, 0x7ff, 0x800, 0xffff_ffff_8000_0000, 0xdead_beef_cafe_f00d] {
            let once = fixup_ptr64(site, val);
            assert_eq!(fixup_ptr64(once, val), once, "{val:#x}");
        }
    }

    #[test]
    fn test_shift_keeps_other_bits() {
        let insn = shift_placeholder(reg::A0, reg::A1, true);
        let patched = fixup_shift(insn, 0x3f);
        assert_eq!(IType(patched).shamt5(), 0x1f);
        assert_eq!(patched & !SHAMT_MASK, insn & !SHAMT_MASK);
    }

    #[test]
    fn test_merge_strategy_selection() {
        assert_eq!(MergeStrategy::select(IsaExtensions::empty()), MergeStrategy::ShiftAdd);
        assert_eq!(MergeStrategy::select(IsaExtensions::ZBA), MergeStrategy::AddUw);
        assert_eq!(
            MergeStrategy::select(IsaExtensions::ZBA | IsaExtensions::ZBKB),
            MergeStrategy::Pack
        );
    }

    proptest! {
        #[test]
        fn prop_fixup_32_round_trips(val in any::<u32>()) {
            let seq = ptr32_placeholder(reg::A0);
            let pair = fixup_32(seq[0], seq[1], val);
            prop_assert_eq!(decode_32(pair), val);

            // Also holds when executed from an arbitrary register state.
            let mut hart = Hart::new();
            hart.run(&pair);
            prop_assert_eq!(hart.reg(reg::A0) as u32, val);
        }

        #[test]
        fn prop_ptr64_executes_to_value(val in any::<u64>(), strategy in 0usize..3) {
            let strategy = [MergeStrategy::ShiftAdd, MergeStrategy::AddUw, MergeStrategy::Pack][strategy];
            let seq = ptr64_placeholder(reg::A0, reg::A1, strategy);
            let loads = fixup_ptr64([seq[0], seq[1], seq[2], seq[3]], val);

            let mut hart = Hart::new();
            hart.run(&loads);
            hart.run(&seq[4..]);
            prop_assert_eq!(hart.reg(reg::A0), val);
        }

        #[test]
        fn prop_shift_masks_to_five_bits(val in any::<u32>(), rs in 1u8..32, rd in 1u8..32, rv64 in any::<bool>()) {
            let insn = shift_placeholder(rd, rs, rv64);
            let patched = fixup_shift(insn, val);
            prop_assert_eq!((patched & SHAMT_MASK) >> 20, val & 0b11111);
            prop_assert_eq!(patched & !SHAMT_MASK, insn & !SHAMT_MASK);
        }
    }
}
