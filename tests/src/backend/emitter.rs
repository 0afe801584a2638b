use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::SCRATCH0;
use dbt_backend::{CodeBuffer, HostCond, HostReg};
use proptest::prelude::*;

use crate::support::{words, Machine, Stop};

/// Run `body` followed by `RET` on a machine prepared by `setup`.
fn exec(body: impl FnOnce(&mut CodeBuffer), setup: impl FnOnce(&mut Machine)) -> Machine {
    let mut buf = CodeBuffer::new(4096);
    body(&mut buf);
    emit(&mut buf, encode_return());
    let mut m = Machine::new();
    setup(&mut m);
    assert_eq!(m.run(buf.as_slice()), Stop::Ret);
    m
}

#[test]
fn fixed_encodings() {
    assert_eq!(encode_add(HostReg::X1, HostReg::X1, HostReg::X2), 0x8B02_0021);
    assert_eq!(encode_return(), 0xD65F_03C0);
    assert_eq!(encode_nop(), 0xD503_201F);
    assert_eq!(encode_b(4), Ok(B_NEXT));
    assert_eq!(encode_brk(1), 0xD420_0020);
    assert_eq!(encode_mov(true, HostReg::X0, HostReg::X1), 0xAA01_03E0);
    assert_eq!(encode_mrs_cntvct(HostReg::X3), 0xD53B_E043);
    assert_eq!(encode_mrs_nzcv(HostReg::X22), 0xD53B_4216);
    assert_eq!(encode_msr_nzcv(HostReg::X22), 0xD51B_4216);
}

#[test]
fn carry_flag_through_nzcv() {
    assert_eq!(BitmaskImm::encode(1 << NZCV_C_BIT, true), Some(NZCV_C_MASK));
    assert_eq!(NZCV_C_MASK.decode(true), Some(1 << NZCV_C_BIT));

    // cmp x0, x1; mrs x16, nzcv; eor x16, x16, #C; msr nzcv, x16
    let m = exec(
        |buf| {
            let cmp = encode_addsub_reg(AddSubOp::Subs, true, HostReg::Zr, HostReg::X0, HostReg::X1, Shift::Lsl, 0);
            emit(buf, cmp);
            emit(buf, encode_mrs_nzcv(SCRATCH0));
            emit(buf, encode_logic_imm(LogicOp::Eor, true, SCRATCH0, SCRATCH0, NZCV_C_MASK));
            emit(buf, encode_msr_nzcv(SCRATCH0));
            emit(buf, encode_mrs_nzcv(HostReg::X2));
        },
        |m| {
            m.x[0] = 3;
            m.x[1] = 3;
        },
    );
    // 3 - 3: Z set, no borrow so C was set and is now clear
    assert!(m.nzcv.z && !m.nzcv.c && !m.nzcv.n && !m.nzcv.v);
    assert_eq!(m.x[2], 1 << 30);
}

#[test]
fn branch_ranges() {
    assert!(encode_b(B_RANGE - 4).is_ok());
    assert!(encode_b(-B_RANGE).is_ok());
    assert!(encode_b(B_RANGE).is_err());
    assert!(encode_b(-B_RANGE - 4).is_err());
    assert!(encode_b(2).is_err());
    assert!(encode_b_cond(HostCond::Eq, BCOND_RANGE).is_err());
    assert!(encode_b_cond(HostCond::Eq, BCOND_RANGE - 4).is_ok());
    assert!(encode_cbz(true, false, HostReg::X1, -BCOND_RANGE).is_ok());
    assert!(encode_tbz(true, HostReg::X1, 63, TBZ_RANGE).is_err());
    let err = encode_b(6).unwrap_err();
    assert_eq!(err.disp, 6);
    assert_eq!(err.range, B_RANGE);
}

#[test]
fn bitmask_immediates() {
    for (value, sf) in [
        (0xFFu64, true),
        (0x5555_5555_5555_5555, true),
        (0x0F0F_0F0F, false),
        (0x8000_0000_0000_0001, true),
        (0xFFFF_0000, false),
    ] {
        let imm = BitmaskImm::encode(value, sf).expect("encodable");
        assert_eq!(imm.decode(sf), Some(value));
    }
    assert_eq!(BitmaskImm::encode(0, true), None);
    assert_eq!(BitmaskImm::encode(u64::MAX, true), None);
    assert_eq!(BitmaskImm::encode(0xFFFF_FFFF, false), None);
    assert_eq!(BitmaskImm::encode(0x1234, true), None);
    assert_eq!(BitmaskImm::encode(1 << 40, false), None);
}

#[test]
fn movi_short_forms() {
    let mut buf = CodeBuffer::new(64);
    emit_movi(&mut buf, true, HostReg::X3, 0);
    assert_eq!(words(buf.as_slice()).len(), 1);

    buf.reset();
    emit_movi(&mut buf, true, HostReg::X3, u64::MAX);
    assert_eq!(words(buf.as_slice()).len(), 1);

    buf.reset();
    emit_movi(&mut buf, true, HostReg::X3, 0x1234_0000_0000_5678);
    assert_eq!(words(buf.as_slice()).len(), 2);
}

proptest! {
    #[test]
    fn movi_materializes_any_constant(value: u64, sf: bool) {
        let mut words_used = 0;
        let m = exec(
            |buf| {
                emit_movi(buf, sf, HostReg::X5, value);
                words_used = buf.offset() / 4;
            },
            |m| m.x[5] = 0xDEAD_BEEF_DEAD_BEEF,
        );
        let expected = if sf { value } else { value & 0xFFFF_FFFF };
        prop_assert_eq!(m.x[5], expected);
        prop_assert!(words_used <= MOVI_MAX_WORDS);
    }

    #[test]
    fn addsub_imm_any_value(x: u64, imm in (i64::MIN + 1)..=i64::MAX, sub: bool) {
        let op = if sub { AddSubOp::Subs } else { AddSubOp::Add };
        let m = exec(
            |buf| emit_addsub_imm(buf, op, true, HostReg::X1, HostReg::X2, imm, SCRATCH0),
            |m| m.x[2] = x,
        );
        if sub {
            prop_assert_eq!(m.x[1], x.wrapping_sub(imm as u64));
            prop_assert_eq!(m.nzcv.c, x >= imm as u64);
            prop_assert_eq!(m.nzcv.z, x == imm as u64);
        } else {
            prop_assert_eq!(m.x[1], x.wrapping_add(imm as u64));
        }
    }

    #[test]
    fn addsub_imm_32bit(x: u32, imm: i32) {
        let m = exec(
            |buf| emit_addsub_imm(buf, AddSubOp::Add, false, HostReg::X1, HostReg::X2, imm as i64, SCRATCH0),
            |m| m.x[2] = 0xFFFF_FFFF_0000_0000 | x as u64,
        );
        prop_assert_eq!(m.x[1], x.wrapping_add(imm as u32) as u64);
    }

    #[test]
    fn ldst_any_offset(base in 0x10_0000u64..0x20_0000, offset in -70_000i64..70_000, value: u64, log2 in 0u32..4) {
        let m = exec(
            |buf| {
                emit_ldst(buf, LdStOp::Str, log2, HostReg::X3, HostReg::X2, offset, SCRATCH0);
                emit_ldst(buf, LdStOp::Ldr, log2, HostReg::X5, HostReg::X2, offset, SCRATCH0);
            },
            |m| {
                m.x[2] = base;
                m.x[3] = value;
            },
        );
        let bytes = 1u32 << log2;
        let mask = if bytes == 8 { u64::MAX } else { (1u64 << (8 * bytes)) - 1 };
        prop_assert_eq!(m.x[5], value & mask);
        prop_assert_eq!(m.read(base.wrapping_add(offset as u64), bytes), value & mask);
        prop_assert_eq!(m.x[2], base);
    }
}

#[test]
fn sign_extending_loads() {
    let m = exec(
        |buf| {
            emit(buf, encode_ldst_uimm(LdStOp::LdrSxX, 0, HostReg::X1, HostReg::X2, 0));
            emit(buf, encode_ldst_uimm(LdStOp::LdrSxW, 1, HostReg::X3, HostReg::X2, 0));
            emit(buf, encode_ldst_uimm(LdStOp::LdrSxX, 2, HostReg::X5, HostReg::X2, 0));
        },
        |m| {
            m.x[2] = 0x4000;
            m.write(0x4000, 4, 0x8000_80F0);
        },
    );
    assert_eq!(m.x[1], 0xFFFF_FFFF_FFFF_FFF0);
    assert_eq!(m.x[3], 0xFFFF_80F0);
    assert_eq!(m.x[5], 0xFFFF_FFFF_8000_80F0);
}

#[test]
fn pre_and_post_index() {
    let m = exec(
        |buf| {
            emit(buf, encode_ldst_pre(LdStOp::Str, 3, HostReg::X1, HostReg::X4, -8));
            emit(buf, encode_ldst_post(LdStOp::Ldr, 3, HostReg::X2, HostReg::X4, 8));
        },
        |m| {
            m.x[1] = 0x1122_3344_5566_7788;
            m.x[4] = 0x8000;
        },
    );
    assert_eq!(m.x[2], 0x1122_3344_5566_7788);
    assert_eq!(m.x[4], 0x8000);
    assert_eq!(m.read(0x7FF8, 8), 0x1122_3344_5566_7788);
}

#[test]
fn bitfield_helpers() {
    let m = exec(
        |buf| {
            emit(buf, encode_bfi(true, HostReg::X1, HostReg::X2, 0, 8));
            emit(buf, encode_ubfx(true, HostReg::X3, HostReg::X2, 8, 8));
            emit(buf, encode_sbfx(true, HostReg::X5, HostReg::X2, 0, 16));
            emit(buf, encode_lsl_imm(false, HostReg::X6, HostReg::X2, 28));
            emit(buf, encode_extr(true, HostReg::X7, HostReg::X2, HostReg::X2, 8));
        },
        |m| {
            m.x[1] = 0xAAAA_AAAA_AAAA_AAAA;
            m.x[2] = 0x0123_4567_89AB_CDEF;
        },
    );
    assert_eq!(m.x[1], 0xAAAA_AAAA_AAAA_AAEF);
    assert_eq!(m.x[3], 0xCD);
    assert_eq!(m.x[5], 0xFFFF_FFFF_FFFF_CDEF);
    assert_eq!(m.x[6], 0xF000_0000);
    assert_eq!(m.x[7], 0xEF01_2345_6789_ABCD);
}

#[test]
fn csel_and_cset() {
    let m = exec(
        |buf| {
            emit(buf, encode_addsub_reg(AddSubOp::Subs, true, HostReg::Zr, HostReg::X1, HostReg::X2, Shift::Lsl, 0));
            emit(buf, encode_cset(false, HostReg::X3, HostCond::Lo));
            emit(buf, encode_csel(CselOp::Csel, true, HostReg::X5, HostReg::X1, HostReg::X2, HostCond::Hi));
        },
        |m| {
            m.x[1] = 3;
            m.x[2] = 7;
        },
    );
    assert_eq!(m.x[3], 1);
    assert_eq!(m.x[5], 7);
}
