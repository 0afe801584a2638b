use dbt_backend::aarch64::emitter::*;
use dbt_backend::{optimize, HostCond, HostReg};
use proptest::prelude::*;

use crate::support::{assemble_with, words, Machine, Stop};
use dbt_frontend::BlockLimits;

fn bytes(ws: &[u32]) -> Vec<u8> {
    ws.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[test]
fn removes_self_moves_and_zero_adds() {
    let mut code = bytes(&[
        encode_mov(true, HostReg::X3, HostReg::X3),
        encode_addsub_imm(AddSubOp::Add, true, HostReg::X5, HostReg::X5, 0, false),
        encode_mov(true, HostReg::X3, HostReg::X4),
        encode_return(),
    ]);
    assert_eq!(optimize(&mut code), 2);
    assert_eq!(
        words(&code),
        vec![NOP, NOP, encode_mov(true, HostReg::X3, HostReg::X4), RET]
    );
}

#[test]
fn keeps_zero_extending_moves() {
    let w32 = encode_mov(false, HostReg::X3, HostReg::X3);
    let add32 = encode_addsub_imm(AddSubOp::Add, false, HostReg::X3, HostReg::X3, 0, false);
    let adds = encode_addsub_imm(AddSubOp::Adds, true, HostReg::X3, HostReg::X3, 0, false);
    let mut code = bytes(&[w32, add32, adds]);
    assert_eq!(optimize(&mut code), 0);
    assert_eq!(words(&code), vec![w32, add32, adds]);
}

#[test]
fn drops_dead_zeroing() {
    let zero = encode_movw(MoveWideOp::Movz, true, HostReg::X2, 0, 0);
    let set = encode_movw(MoveWideOp::Movz, true, HostReg::X2, 7, 0);
    let keep = encode_movw(MoveWideOp::Movk, true, HostReg::X2, 7, 1);
    let mut code = bytes(&[zero, set, zero, keep]);
    assert_eq!(optimize(&mut code), 1);
    assert_eq!(words(&code), vec![NOP, set, zero, keep]);
}

#[test]
fn never_touches_control_transfers() {
    let ws = [
        B_NEXT,
        encode_b_cond(HostCond::Eq, 8).unwrap(),
        encode_cbz(true, false, HostReg::X1, 4).unwrap(),
        encode_br(HostReg::X20),
        encode_brk(0),
        RET,
    ];
    let mut code = bytes(&ws);
    assert_eq!(optimize(&mut code), 0);
    assert_eq!(words(&code), ws.to_vec());
}

#[test]
fn ignores_trailing_partial_word() {
    let mut code = bytes(&[encode_mov(true, HostReg::X1, HostReg::X1)]);
    code.push(0xAA);
    assert_eq!(optimize(&mut code), 1);
    assert_eq!(code.len(), 5);
    assert_eq!(code[4], 0xAA);
}

proptest! {
    // mov rax, rbx; add rax, 0; xor ecx, ecx; mov ecx, 5; lea rdx, [rax+rcx]; ret
    #[test]
    fn peephole_preserves_block_semantics(rax: u64, rbx: u64, rcx: u64, rdx: u64) {
        let guest = [
            0x48, 0x89, 0xD8, 0x48, 0x83, 0xC0, 0x00, 0x31, 0xC9, 0xB9, 0x05, 0x00, 0x00, 0x00,
            0x48, 0x8D, 0x14, 0x08, 0xC3,
        ];
        let plain = assemble_with(&guest, &BlockLimits::default(), false);
        let opt = assemble_with(&guest, &BlockLimits::default(), true);
        prop_assert_eq!(plain.code.len(), opt.code.len());

        let init = |m: &mut Machine| {
            m.x[0] = rax;
            m.x[1] = rcx;
            m.x[2] = rdx;
            m.x[3] = rbx;
        };
        let (mut a, mut b) = (Machine::new(), Machine::new());
        init(&mut a);
        init(&mut b);
        prop_assert_eq!(a.run(&plain.code), Stop::Ret);
        prop_assert_eq!(b.run(&opt.code), Stop::Ret);
        prop_assert_eq!(&a.x[..16], &b.x[..16]);
        prop_assert_eq!(a.x[2], rbx.wrapping_add(5));
    }
}
