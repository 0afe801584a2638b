use dbt_backend::aarch64::emitter::{B_NEXT, RET};
use dbt_backend::CodeBuffer;
use dbt_core::{BlockState, ChainSlot, EndReason, ExitKind, HelperExit};
use dbt_frontend::assembler::MAX_HOST_BYTES_PER_INSN;
use dbt_frontend::trans::exit::MAX_EXIT_BYTES;
use dbt_frontend::{translate_block, BlockLimits, GuestImage, TranslateError};
use proptest::collection::vec;
use proptest::prelude::*;

use crate::support::{assemble, assemble_with, run, word_at, words, Stop, GUEST_BASE};

/// Buffer space the assembler wants before each instruction.
const PER_INSN: usize = MAX_HOST_BYTES_PER_INSN + MAX_EXIT_BYTES;

fn translate_into(bytes: &[u8], capacity: usize) -> Result<dbt_frontend::AssembledBlock, TranslateError> {
    let image = GuestImage::new(GUEST_BASE, bytes);
    let mut buf = CodeBuffer::new(capacity);
    translate_block(&image, GUEST_BASE, &BlockLimits::default(), &mut buf, false)
}

proptest! {
    #[test]
    fn any_bytes_make_a_closed_block(bytes in vec(any::<u8>(), 0..64), optimize in any::<bool>()) {
        let block = assemble_with(&bytes, &BlockLimits::default(), optimize);
        prop_assert!(!block.code.is_empty());
        prop_assert_eq!(block.code.len() % 4, 0);
        prop_assert_eq!(words(&block.code).last().copied(), Some(RET));
        prop_assert!(block.guest_size as usize <= bytes.len());
        prop_assert!(block.unsupported <= block.icount);
        prop_assert_eq!(block.state, BlockState::Terminated(block.end));
        for e in block.exits.iter().flatten() {
            prop_assert_eq!(word_at(&block.code, e.jmp_offset as usize), B_NEXT);
        }
    }
}

#[test]
fn instruction_budget_ends_block() {
    let nops = vec![0x90u8; 600];
    let block = assemble(&nops);
    assert_eq!(block.end, EndReason::InsnBudget);
    assert_eq!(block.icount as u32, dbt_core::tb::DEFAULT_MAX_INSNS);
    assert_eq!(block.guest_size, 512);

    let exit = block.exits[ChainSlot::FallThrough.index()].expect("fall-through exit");
    assert_eq!(exit.target_pc, GUEST_BASE + 512);
    assert_eq!(word_at(&block.code, exit.jmp_offset as usize), B_NEXT);
    assert_eq!(block.exit_kind, ExitKind::Direct);

    let (m, stop) = run(&nops, |_| {});
    assert_eq!(stop, Stop::Ret);
    assert_eq!(m.x[20], GUEST_BASE + 512);
}

#[test]
fn configured_limits() {
    let nops = [0x90u8; 16];
    let three = BlockLimits {
        max_insns: 3,
        ..BlockLimits::default()
    };
    let block = assemble_with(&nops, &three, false);
    assert_eq!((block.icount, block.guest_size), (3, 3));

    // zero is taken as one
    let zero = BlockLimits {
        max_insns: 0,
        ..BlockLimits::default()
    };
    assert_eq!(assemble_with(&nops, &zero, false).icount, 1);

    // five three-byte moves against a ten-byte budget
    let moves: Vec<u8> = [0x48, 0x89, 0xD8].repeat(5);
    let bytes = BlockLimits {
        max_guest_bytes: 10,
        ..BlockLimits::default()
    };
    let block = assemble_with(&moves, &bytes, false);
    assert_eq!(block.end, EndReason::InsnBudget);
    assert_eq!((block.icount, block.guest_size), (3, 9));
    assert_eq!(
        block.exits[ChainSlot::FallThrough.index()].map(|e| e.target_pc),
        Some(GUEST_BASE + 9)
    );

    // the first instruction is always taken, however long
    let tiny = BlockLimits {
        max_guest_bytes: 1,
        ..BlockLimits::default()
    };
    assert_eq!(assemble_with(&moves, &tiny, false).icount, 1);
}

#[test]
fn code_size_budget_ends_block() {
    let nops = [0x90u8; 16];
    let block = translate_into(&nops, PER_INSN + 8).expect("room for a few instructions");
    assert_eq!(block.end, EndReason::SizeBudget);
    assert_eq!(block.icount, 3);
    assert_eq!(block.guest_size, 3);
    assert_eq!(
        block.exits[ChainSlot::FallThrough.index()].map(|e| e.target_pc),
        Some(GUEST_BASE + 3)
    );
    assert!(block.code.len() <= PER_INSN + 8);
}

#[test]
fn buffer_too_small_for_one_instruction() {
    let err = translate_into(&[0x90, 0xC3], PER_INSN - 1).unwrap_err();
    assert_eq!(
        err,
        TranslateError::BufferOverflow {
            pc: GUEST_BASE,
            capacity: PER_INSN - 1,
        }
    );
}

#[test]
fn decode_faults_exit_at_faulting_address() {
    let cases: [(&[u8], u16); 4] = [
        // mov rax, rbx; then an opcode that does not exist in long mode
        (&[0x48, 0x89, 0xD8, 0x06], 1),
        (&[0x06], 0),
        // truncated
        (&[0x48, 0x89], 0),
        (&[], 0),
    ];
    for (code, icount) in cases {
        let block = assemble(code);
        let at = if icount == 0 { 0 } else { 3 };
        assert_eq!(block.end, EndReason::DecodeFault, "{code:02x?}");
        assert_eq!(block.icount, icount);
        assert_eq!(block.guest_size, at);
        assert_eq!(block.exit_kind, ExitKind::Helper);
        assert_eq!(block.exits, [None, None]);

        let (m, stop) = run(code, |m| m.x[3] = 9);
        assert_eq!(stop, Stop::Ret);
        assert_eq!(m.x[20], GUEST_BASE + at as u64, "{code:02x?}");
        assert_eq!(m.x[21], HelperExit::DecodeFault.code() as u64);
        assert_eq!(m.x[0], if icount == 1 { 9 } else { 0 });
    }
}

#[test]
fn unsupported_instruction_becomes_nop() {
    // cli; mov rax, rbx; ret
    let code = [0xFA, 0x48, 0x89, 0xD8, 0xC3];
    let block = assemble(&code);
    assert_eq!(block.unsupported, 1);
    assert_eq!(block.icount, 3);
    assert_eq!(block.end, EndReason::Terminator);
    assert_eq!(words(&block.code)[0], dbt_backend::aarch64::emitter::NOP);

    let (m, _) = run(&code, |m| m.x[3] = 0x42);
    assert_eq!(m.x[0], 0x42);
}

#[test]
fn peephole_pass_is_optional() {
    // lea rax, [rax + 0]; ret
    let code = [0x48, 0x8D, 0x40, 0x00, 0xC3];
    let plain = assemble_with(&code, &BlockLimits::default(), false);
    let optimized = assemble_with(&code, &BlockLimits::default(), true);
    assert_eq!(plain.peephole_rewrites, 0);
    assert!(optimized.peephole_rewrites > 0);
    assert_eq!(plain.code.len(), optimized.code.len());
    assert_eq!(words(&optimized.code)[0], dbt_backend::aarch64::emitter::NOP);
}

#[test]
fn instruction_cap_fits_block_counters() {
    let nops = vec![0x90u8; 70_000];
    let unbounded = BlockLimits {
        max_insns: u32::MAX,
        max_guest_bytes: u32::MAX,
    };
    let block = assemble_with(&nops, &unbounded, false);
    assert_eq!(block.end, EndReason::InsnBudget);
    assert_eq!(block.icount, u16::MAX);
    assert_eq!(block.guest_size, u16::MAX as u32);
    assert_eq!(
        block.exits[ChainSlot::FallThrough.index()].map(|e| e.target_pc),
        Some(GUEST_BASE + u16::MAX as u64)
    );

    // refused instructions are counted against the same cap
    let clis = vec![0xFAu8; 70_000];
    let block = assemble_with(&clis, &unbounded, false);
    assert_eq!(block.unsupported, u16::MAX);
    assert_eq!(block.icount, u16::MAX);
}
