use dbt_backend::aarch64::emitter::{
    encode_logic_imm, encode_mrs_nzcv, encode_msr_nzcv, LogicOp, B_NEXT, NZCV_C_MASK, RET,
};
use dbt_backend::HostReg::X22;
use dbt_core::{ChainSlot, EndReason, ExitKind, ExitSite, FlagsOut, HelperExit};
use dbt_frontend::{host_cond, CondMapping, FlagsOrigin};
use proptest::prelude::*;

use crate::support::x86::{sub_flags, testable_conds};
use crate::support::{assemble, run, word_at, words, Stop, GUEST_BASE, STACK_TOP};

const EXIT_PC: usize = 20;
const EXIT_REASON: usize = 21;

fn exit_to(block_exit: Option<ExitSite>) -> Option<u64> {
    block_exit.map(|e| e.target_pc)
}

/// Both chain sites of a two-way exit hold the unpatched branch.
fn assert_chain_sites(code: &[u8], exits: &[Option<ExitSite>]) {
    for e in exits.iter().flatten() {
        assert_eq!(word_at(code, e.jmp_offset as usize), B_NEXT);
    }
}

proptest! {
    #[test]
    fn jcc_after_compare(a in any::<u64>(), b in any::<u64>()) {
        let flags = sub_flags(a, b, 64);
        for cc in testable_conds() {
            // cmp rax, rbx; jcc rel32 +0x100
            let code = [0x48, 0x39, 0xD8, 0x0F, 0x80 | cc as u8, 0x00, 0x01, 0x00, 0x00];
            let fallthrough = GUEST_BASE + 9;
            let taken = fallthrough + 0x100;

            let block = assemble(&code);
            prop_assert_eq!(block.end, EndReason::Terminator);
            prop_assert_eq!(block.exit_kind, ExitKind::Direct);
            prop_assert_eq!(exit_to(block.exits[ChainSlot::FallThrough.index()]), Some(fallthrough));
            prop_assert_eq!(exit_to(block.exits[ChainSlot::Taken.index()]), Some(taken));
            assert_chain_sites(&block.code, &block.exits);

            let (m, stop) = run(&code, |m| {
                m.x[0] = a;
                m.x[3] = b;
            });
            prop_assert_eq!(stop, Stop::Ret);
            let want = if flags.eval(cc) { taken } else { fallthrough };
            prop_assert_eq!(m.x[EXIT_PC], want, "{:?}", cc);
        }
    }

    #[test]
    fn short_jcc_backwards(a in any::<u32>(), b in any::<u32>()) {
        // cmp eax, ebx; jb -16
        let code = [0x39, 0xD8, 0x72, 0xF0];
        let (m, _) = run(&code, |m| {
            m.x[0] = a as u64;
            m.x[3] = b as u64;
        });
        let want = if a < b { GUEST_BASE + 4 - 16 } else { GUEST_BASE + 4 };
        prop_assert_eq!(m.x[EXIT_PC], want);
    }

    #[test]
    fn cmov_follows_condition(a in any::<u64>(), b in any::<u64>(), src in any::<u64>(), dst in any::<u64>()) {
        let flags = sub_flags(a, b, 64);
        for cc in testable_conds() {
            if host_cond(cc, FlagsOrigin::Sub) == CondMapping::Unsupported {
                continue;
            }
            // cmp rax, rbx; cmovcc rcx, rdx; ret
            let code = [0x48, 0x39, 0xD8, 0x48, 0x0F, 0x40 | cc as u8, 0xCA, 0xC3];
            let (m, stop) = run(&code, |m| {
                m.x[0] = a;
                m.x[3] = b;
                m.x[1] = dst;
                m.x[2] = src;
            });
            prop_assert_eq!(stop, Stop::Ret);
            prop_assert_eq!(m.x[1], if flags.eval(cc) { src } else { dst }, "{:?}", cc);
        }
    }

    #[test]
    fn loops_count_down(rcx in prop_oneof![Just(0u64), Just(1), Just(2), any::<u64>()], a in 0u64..4, b in 0u64..4) {
        let setup = |m: &mut crate::support::Machine| {
            m.x[0] = a;
            m.x[3] = b;
            m.x[1] = rcx;
        };
        let left = rcx.wrapping_sub(1);

        // loop +0x10
        let (m, _) = run(&[0xE2, 0x10], setup);
        prop_assert_eq!(m.x[1], left);
        let want = if left != 0 { GUEST_BASE + 0x12 } else { GUEST_BASE + 2 };
        prop_assert_eq!(m.x[EXIT_PC], want);

        // cmp rax, rbx; loope +0x10
        let (m, _) = run(&[0x48, 0x39, 0xD8, 0xE1, 0x10], setup);
        prop_assert_eq!(m.x[1], left);
        let want = if left != 0 && a == b { GUEST_BASE + 0x15 } else { GUEST_BASE + 5 };
        prop_assert_eq!(m.x[EXIT_PC], want);

        // cmp rax, rbx; loopne +0x10
        let (m, _) = run(&[0x48, 0x39, 0xD8, 0xE0, 0x10], setup);
        let want = if left != 0 && a != b { GUEST_BASE + 0x15 } else { GUEST_BASE + 5 };
        prop_assert_eq!(m.x[EXIT_PC], want);
    }
}

#[test]
fn unconditional_jumps() {
    let block = assemble(&[0xEB, 0x10]);
    assert_eq!(block.exits[ChainSlot::FallThrough.index()], None);
    assert_eq!(exit_to(block.exits[ChainSlot::Taken.index()]), Some(GUEST_BASE + 0x12));
    assert_chain_sites(&block.code, &block.exits);
    assert_eq!(block.guest_size, 2);

    // jmp rel32 -0x100
    let (m, stop) = run(&[0xE9, 0x00, 0xFF, 0xFF, 0xFF], |_| {});
    assert_eq!(stop, Stop::Ret);
    assert_eq!(m.x[EXIT_PC], GUEST_BASE + 5 - 0x100);
}

#[test]
fn direct_call_pushes_return_address() {
    let (m, stop) = run(&[0xE8, 0x00, 0x01, 0x00, 0x00], |_| {});
    assert_eq!(stop, Stop::Ret);
    assert_eq!(m.x[4], STACK_TOP - 8);
    assert_eq!(m.read(STACK_TOP - 8, 8), GUEST_BASE + 5);
    assert_eq!(m.x[EXIT_PC], GUEST_BASE + 5 + 0x100);

    let block = assemble(&[0xE8, 0x00, 0x01, 0x00, 0x00]);
    assert_eq!(block.exit_kind, ExitKind::Direct);
    assert_eq!(exit_to(block.exits[ChainSlot::Taken.index()]), Some(GUEST_BASE + 0x105));
}

#[test]
fn return_leaves_pop_to_dispatcher() {
    let block = assemble(&[0xC3]);
    assert_eq!(block.exit_kind, ExitKind::Return);
    assert_eq!(block.exits, [None, None]);
    assert_eq!(words(&block.code), [RET]);

    let (m, _) = run(&[0xC3], |m| m.write(STACK_TOP, 8, 0x4242));
    assert_eq!(m.x[4], STACK_TOP);
}

#[test]
fn return_with_immediate_moves_return_address() {
    for (code, released) in [
        (&[0xC2, 0x10, 0x00], 0x10u64),
        (&[0xC2, 0x00, 0x01], 0x100),
        (&[0xC2, 0x00, 0x00], 0),
    ] {
        let (m, stop) = run(code, |m| m.write(STACK_TOP, 8, 0x4242));
        assert_eq!(stop, Stop::Ret);
        assert_eq!(m.x[4], STACK_TOP + released, "{code:02x?}");
        assert_eq!(m.read(STACK_TOP + released, 8), 0x4242, "{code:02x?}");
        assert_eq!(assemble(code).exit_kind, ExitKind::Return);
    }
}

#[test]
fn indirect_transfers() {
    // jmp rax
    let block = assemble(&[0xFF, 0xE0]);
    assert_eq!(block.exit_kind, ExitKind::Indirect);
    assert_eq!(block.exits, [None, None]);
    let (m, stop) = run(&[0xFF, 0xE0], |m| m.x[0] = 0xDEAD_0000);
    assert_eq!(stop, Stop::Ret);
    assert_eq!(m.x[EXIT_PC], 0xDEAD_0000);
    assert_eq!(m.x[4], STACK_TOP);

    // jmp r12
    let (m, _) = run(&[0x41, 0xFF, 0xE4], |m| m.x[12] = 0x7777);
    assert_eq!(m.x[EXIT_PC], 0x7777);

    // call rax
    let (m, _) = run(&[0xFF, 0xD0], |m| m.x[0] = 0x5000);
    assert_eq!(m.x[EXIT_PC], 0x5000);
    assert_eq!(m.x[4], STACK_TOP - 8);
    assert_eq!(m.read(STACK_TOP - 8, 8), GUEST_BASE + 2);

    // call [rsp] reads the slot before the push
    let (m, _) = run(&[0xFF, 0x14, 0x24], |m| m.write(STACK_TOP, 8, 0x6000));
    assert_eq!(m.x[EXIT_PC], 0x6000);
    assert_eq!(m.read(STACK_TOP - 8, 8), GUEST_BASE + 3);
    assert_eq!(m.read(STACK_TOP, 8), 0x6000);
}

#[test]
fn jump_if_rcx_zero() {
    for rcx in [0u64, 1, 0x1_0000_0000] {
        let (m, _) = run(&[0xE3, 0x10], |m| m.x[1] = rcx);
        let want = if rcx == 0 { GUEST_BASE + 0x12 } else { GUEST_BASE + 2 };
        assert_eq!(m.x[EXIT_PC], want, "jrcxz {rcx:#x}");

        // jecxz only looks at ECX
        let (m, _) = run(&[0x67, 0xE3, 0x10], |m| m.x[1] = rcx);
        let want = if rcx as u32 == 0 { GUEST_BASE + 0x13 } else { GUEST_BASE + 3 };
        assert_eq!(m.x[EXIT_PC], want, "jecxz {rcx:#x}");
    }
}

#[test]
fn narrow_cmov_zero_extends_when_false() {
    // cmp eax, ebx; cmove ecx, edx; ret
    let (m, _) = run(&[0x39, 0xD8, 0x0F, 0x44, 0xCA, 0xC3], |m| {
        m.x[0] = 1;
        m.x[3] = 2;
        m.x[1] = 0xFFFF_FFFF_1234_5678;
        m.x[2] = 0x9999;
    });
    assert_eq!(m.x[1], 0x1234_5678);
}

#[test]
fn setcc_to_memory() {
    for (a, b) in [(5u64, 5u64), (5, 6)] {
        // cmp rax, rbx; sete [rsp]; ret
        let (m, _) = run(&[0x48, 0x39, 0xD8, 0x0F, 0x94, 0x04, 0x24, 0xC3], |m| {
            m.x[0] = a;
            m.x[3] = b;
            m.write(STACK_TOP, 2, 0xFFFF);
        });
        assert_eq!(m.read(STACK_TOP, 1), (a == b) as u64);
        assert_eq!(m.read(STACK_TOP + 1, 1), 0xFF);
    }
}

#[test]
fn untranslatable_branches_exit_to_runtime() {
    // cmp rax, rbx; jp +0x10
    let cases: [(&[u8], u64); 3] = [
        (&[0x48, 0x39, 0xD8, 0x7A, 0x10], GUEST_BASE + 3),
        // loop with a 32-bit counter
        (&[0x67, 0xE2, 0x10], GUEST_BASE),
        // call with a 16-bit operand
        (&[0x66, 0xE8, 0x00, 0x01, 0x00, 0x00], GUEST_BASE),
    ];
    for (code, at) in cases {
        let block = assemble(code);
        assert_eq!(block.end, EndReason::UnsupportedTerminator, "{code:02x?}");
        assert_eq!(block.exit_kind, ExitKind::Helper);
        assert_eq!(block.unsupported, 1);
        assert_eq!(block.exits, [None, None]);

        let (m, stop) = run(code, |m| m.x[1] = 7);
        assert_eq!(stop, Stop::Ret);
        assert_eq!(m.x[EXIT_PC], at, "{code:02x?}");
        assert_eq!(m.x[EXIT_REASON], HelperExit::Unsupported.code() as u64);
        assert_eq!(m.x[1], 7);
        assert_eq!(m.x[4], STACK_TOP);
    }
}

#[test]
fn narrow_cmov_is_refused() {
    // cmove cx, dx; ret
    let block = assemble(&[0x66, 0x0F, 0x44, 0xCA, 0xC3]);
    assert_eq!(block.unsupported, 1);
    assert_eq!(block.icount, 2);
}

/// The three words in front of the taken-side chain site.
fn before_taken_site(code: &[u8], exits: &[Option<ExitSite>]) -> Vec<u32> {
    let site = exits[ChainSlot::Taken.index()].expect("taken exit").jmp_offset as usize / 4;
    words(code)[site - 3..site].to_vec()
}

#[test]
fn live_flags_leave_in_compare_form() {
    // add rax, rbx; jmp +0
    let add = [0x48, 0x01, 0xD8, 0xEB, 0x00];
    let block = assemble(&add);
    assert_eq!(block.flags_out, FlagsOut::Exact);
    assert!(!block.flags_in);
    assert_eq!(
        before_taken_site(&block.code, &block.exits),
        [
            encode_mrs_nzcv(X22),
            encode_logic_imm(LogicOp::Eor, true, X22, X22, NZCV_C_MASK),
            encode_msr_nzcv(X22),
        ]
    );
    for (a, b) in [(u64::MAX, 1u64), (1, 1), (u64::MAX, 0)] {
        let (m, _) = run(&add, |m| {
            m.x[0] = a;
            m.x[3] = b;
        });
        let (sum, cf) = a.overflowing_add(b);
        assert_eq!(m.nzcv.c, !cf, "{a:#x} + {b:#x}");
        assert_eq!(m.nzcv.z, sum == 0);
        assert_eq!(m.nzcv.n, sum >> 63 == 1);
    }

    // test eax, eax; jmp +0
    let test = [0x85, 0xC0, 0xEB, 0x00];
    let block = assemble(&test);
    assert_eq!(block.flags_out, FlagsOut::Exact);
    assert_eq!(
        before_taken_site(&block.code, &block.exits)[1],
        encode_logic_imm(LogicOp::Orr, true, X22, X22, NZCV_C_MASK)
    );
    for a in [0u64, 5, 0x8000_0000] {
        let (m, _) = run(&test, |m| m.x[0] = a);
        assert!(m.nzcv.c);
        assert!(!m.nzcv.v);
        assert_eq!(m.nzcv.z, a == 0);
        assert_eq!(m.nzcv.n, a == 0x8000_0000);
    }

    // cmp rax, rbx; jmp +0 needs no rewrite
    let block = assemble(&[0x48, 0x39, 0xD8, 0xEB, 0x00]);
    assert_eq!(block.flags_out, FlagsOut::Exact);
    assert!(!words(&block.code).contains(&encode_mrs_nzcv(X22)));
}

#[test]
fn block_flag_contract() {
    let cases: [(&[u8], bool, FlagsOut); 7] = [
        // mov rax, rbx; jmp +0
        (&[0x48, 0x89, 0xD8, 0xEB, 0x00], false, FlagsOut::PassThrough),
        // jb +0
        (&[0x72, 0x00], true, FlagsOut::PassThrough),
        // inc rcx; jb +0: the incoming carry is read
        (&[0x48, 0xFF, 0xC1, 0x72, 0x00], true, FlagsOut::Exact),
        // xor eax, eax; jb +0
        (&[0x31, 0xC0, 0x72, 0x00], false, FlagsOut::Exact),
        // bt rax, 3; jmp +0
        (&[0x48, 0x0F, 0xBA, 0xE0, 0x03, 0xEB, 0x00], false, FlagsOut::Lost),
        // imul rax, rbx; jmp +0
        (&[0x48, 0x0F, 0xAF, 0xC3, 0xEB, 0x00], false, FlagsOut::Lost),
        // cmp rax, rbx; call +0
        (&[0x48, 0x39, 0xD8, 0xE8, 0x00, 0x00, 0x00, 0x00], false, FlagsOut::Dead),
    ];
    for (code, flags_in, flags_out) in cases {
        let block = assemble(code);
        assert_eq!((block.flags_in, block.flags_out), (flags_in, flags_out), "{code:02x?}");
    }
}
