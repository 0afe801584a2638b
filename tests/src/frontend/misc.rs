use dbt_core::{EndReason, ExitKind, HelperExit};
use proptest::prelude::*;

use crate::support::{assemble, run, Stop, GUEST_BASE};

fn ret(code: &[u8]) -> Vec<u8> {
    let mut v = code.to_vec();
    v.push(0xC3);
    v
}

proptest! {
    #[test]
    fn accumulator_sign_extension(rax in any::<u64>(), rdx in any::<u64>()) {
        let extend: [(&[u8], u64); 3] = [
            (&[0x66, 0x98], (rax & !0xFFFF) | (rax as i8 as i16 as u16) as u64),
            (&[0x98], rax as i16 as i32 as u32 as u64),
            (&[0x48, 0x98], rax as i32 as i64 as u64),
        ];
        for (code, want) in extend {
            let (m, _) = run(&ret(code), |m| m.x[0] = rax);
            prop_assert_eq!(m.x[0], want, "{:02x?}", code);
        }

        let sign: [(&[u8], u64); 3] = [
            (&[0x66, 0x99], (rdx & !0xFFFF) | if (rax as i16) < 0 { 0xFFFF } else { 0 }),
            (&[0x99], if (rax as i32) < 0 { 0xFFFF_FFFF } else { 0 }),
            (&[0x48, 0x99], if (rax as i64) < 0 { u64::MAX } else { 0 }),
        ];
        for (code, want) in sign {
            let (m, _) = run(&ret(code), |m| {
                m.x[0] = rax;
                m.x[2] = rdx;
            });
            prop_assert_eq!(m.x[2], want, "{:02x?}", code);
            prop_assert_eq!(m.x[0], rax);
        }
    }

    #[test]
    fn rdtsc_splits_counter(ticks in any::<u64>()) {
        let (m, _) = run(&ret(&[0x0F, 0x31]), |m| {
            m.cntvct = ticks;
            m.x[0] = u64::MAX;
            m.x[2] = u64::MAX;
        });
        prop_assert_eq!(m.x[0], ticks & 0xFFFF_FFFF);
        prop_assert_eq!(m.x[2], ticks >> 32);
    }
}

#[test]
fn nops_change_nothing() {
    let code = ret(&[0x90, 0x66, 0x90, 0xF3, 0x90, 0x0F, 0x1F, 0x00, 0x0F, 0x1F, 0x44, 0x00, 0x00, 0xFC]);
    let block = assemble(&code);
    assert_eq!(block.unsupported, 0);
    assert_eq!(block.icount, 7);

    let (m, stop) = run(&code, |m| {
        for (i, r) in m.x.iter_mut().enumerate().take(16) {
            *r = i as u64 * 0x1111;
        }
    });
    assert_eq!(stop, Stop::Ret);
    for i in (0..16).filter(|&i| i != 4) {
        assert_eq!(m.x[i], i as u64 * 0x1111, "x{i}");
    }
}

#[test]
fn privileged_flag_control_is_refused() {
    for op in [0xFAu8, 0xFB, 0xFD] {
        let block = assemble(&[op, 0xC3]);
        assert_eq!(block.unsupported, 1, "{op:#04x}");
        assert_eq!(block.end, EndReason::Terminator);
    }
}

#[test]
fn system_instructions_exit_to_runtime() {
    let cases: [(&[u8], u64, HelperExit, u64); 6] = [
        (&[0xF4], 1, HelperExit::Halt, 0),
        (&[0x0F, 0xA2], 2, HelperExit::Cpuid, 0),
        (&[0x0F, 0x05], 2, HelperExit::Syscall, 0),
        (&[0xCC], 1, HelperExit::Breakpoint, 0),
        (&[0xCD, 0x80], 2, HelperExit::Interrupt, 0x80),
        // faults at the instruction itself
        (&[0x0F, 0x0B], 0, HelperExit::Undefined, 0),
    ];
    for (insn, resume, reason, arg) in cases {
        // mov rax, rbx first, so the exit is not at the block start
        let mut code = vec![0x48, 0x89, 0xD8];
        code.extend_from_slice(insn);
        // never reached
        code.push(0x90);

        let block = assemble(&code);
        assert_eq!(block.end, EndReason::Terminator, "{insn:02x?}");
        assert_eq!(block.exit_kind, ExitKind::Helper);
        assert_eq!(block.exits, [None, None]);
        assert_eq!(block.icount, 2);
        assert_eq!(block.guest_size as usize, 3 + insn.len());

        let (m, stop) = run(&code, |m| m.x[3] = 0x77);
        assert_eq!(stop, Stop::Ret);
        assert_eq!(m.x[0], 0x77);
        assert_eq!(m.x[20], GUEST_BASE + 3 + resume, "{insn:02x?}");
        assert_eq!(m.x[21], reason.code() as u64 | arg << 8, "{insn:02x?}");
    }
}
