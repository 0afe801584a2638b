use std::sync::Arc;

use dbt_backend::{CodeRegion, ExecutableMemory};
use dbt_core::tb::*;

fn block(region: &CodeRegion, pc: u64, size: u32, exits: [Option<ExitSite>; MAX_CHAIN_SLOTS]) -> TranslatedBlock {
    let host = region.alloc_executable(64).unwrap();
    TranslatedBlock::new(pc, size, 3, host, exits, EndReason::Terminator, ExitKind::Direct)
}

#[test]
fn tb_new() {
    let region = CodeRegion::new(4096).unwrap();
    let tb = block(&region, 0x1000, 12, [None, None]);
    assert_eq!(tb.pc, 0x1000);
    assert_eq!(tb.size, 12);
    assert_eq!(tb.icount, 3);
    assert_eq!(tb.unsupported, 0);
    assert_eq!(tb.exits, [None, None]);
    assert!(!tb.is_invalid());
    assert!(!tb.flags_in);
    assert_eq!(tb.flags_out, FlagsOut::Dead);
    let jmp = tb.jmp.lock();
    assert!(jmp.jmp_dest.iter().all(Option::is_none));
    assert!(jmp.jmp_list.is_empty());
}

#[test]
fn tb_exit_addr() {
    let region = CodeRegion::new(4096).unwrap();
    let site = ExitSite {
        jmp_offset: 24,
        target_pc: 0x2000,
    };
    let tb = block(&region, 0x1000, 4, [None, Some(site)]);
    assert_eq!(tb.exit_addr(ChainSlot::FallThrough), None);
    assert_eq!(tb.exit_addr(ChainSlot::Taken), Some(tb.host.addr() + 24));
}

#[test]
fn tb_overlaps() {
    let region = CodeRegion::new(4096).unwrap();
    let tb = block(&region, 0x1000, 0x10, [None, None]);
    assert!(tb.overlaps(0x1000, 1));
    assert!(tb.overlaps(0x100F, 1));
    assert!(tb.overlaps(0xFF0, 0x11));
    assert!(!tb.overlaps(0x1010, 4));
    assert!(!tb.overlaps(0xFF0, 0x10));
    assert!(!tb.overlaps(0x1000, 0));

    // An empty block still claims its first byte.
    let empty = block(&region, 0x3000, 0, [None, None]);
    assert!(empty.overlaps(0x3000, 1));
    assert!(!empty.overlaps(0x3001, 1));

    let top = block(&region, u64::MAX - 1, 8, [None, None]);
    assert!(top.overlaps(u64::MAX - 1, u64::MAX));
}

#[test]
fn tb_jmp_state_links() {
    let region = CodeRegion::new(4096).unwrap();
    let a = Arc::new(block(&region, 0x1000, 4, [None, None]));
    let b = Arc::new(block(&region, 0x2000, 4, [None, None]));
    a.jmp.lock().jmp_dest[ChainSlot::Taken.index()] = Some(Arc::downgrade(&b));
    b.jmp.lock().jmp_list.push((Arc::downgrade(&a), ChainSlot::Taken));

    let dest = a.jmp.lock().jmp_dest[1].as_ref().and_then(|w| w.upgrade()).unwrap();
    assert!(Arc::ptr_eq(&dest, &b));
    drop(dest);
    drop(a);
    // Links never keep a block alive.
    assert!(b.jmp.lock().jmp_list[0].0.upgrade().is_none());
}

#[test]
fn chain_slot_indices() {
    assert_eq!(ChainSlot::FallThrough.index(), 0);
    assert_eq!(ChainSlot::Taken.index(), 1);
    assert_eq!(ChainSlot::ALL.len(), MAX_CHAIN_SLOTS);
}

#[test]
fn helper_exit_codes_are_distinct() {
    let codes = [
        HelperExit::Syscall,
        HelperExit::Cpuid,
        HelperExit::Halt,
        HelperExit::Breakpoint,
        HelperExit::Interrupt,
        HelperExit::Undefined,
        HelperExit::DecodeFault,
        HelperExit::Unsupported,
    ]
    .map(HelperExit::code);
    for (i, c) in codes.iter().enumerate() {
        assert!(*c != 0 && *c < 0x100);
        assert!(!codes[i + 1..].contains(c));
        assert_eq!(HelperExit::from_code(*c).map(HelperExit::code), Some(*c));
    }
    // the argument byte is ignored
    assert_eq!(HelperExit::from_code(0x8005), Some(HelperExit::Interrupt));
    assert_eq!(HelperExit::from_code(0), None);
    assert_eq!(HelperExit::from_code(9), None);
}

#[test]
fn exec_handle_contains() {
    let region = CodeRegion::new(4096).unwrap();
    let h = region.alloc_executable(32).unwrap();
    assert!(h.contains(h.addr(), 32));
    assert!(h.contains(h.addr() + 28, 4));
    assert!(!h.contains(h.addr() + 30, 4));
    assert!(!h.contains(h.addr() - 4, 4));
    // ranges reaching past the top of the address space
    assert!(!h.contains(u64::MAX - 2, 8));
    assert!(!h.contains(h.addr() + 4, usize::MAX));
    assert!(h.contains(h.addr() + 32, 0));
    assert_eq!(h.len(), 32);
    assert!(!h.is_empty());
}

#[test]
fn flags_handoff() {
    use FlagsOut::*;
    for incoming in [Dead, Exact, Lost, PassThrough] {
        assert_eq!(PassThrough.after(incoming), incoming);
        assert_eq!(Exact.after(incoming), Exact);
        assert_eq!(Lost.after(incoming), Lost);
        assert_eq!(Dead.after(incoming), Dead);
    }

    let region = CodeRegion::new(4096).unwrap();
    let mut tb = block(&region, 0x1000, 4, [None, None]);
    assert!(tb.accepts_flags(Lost));
    tb.flags_in = true;
    assert!(!tb.accepts_flags(Lost));
    assert!(tb.accepts_flags(Exact));
    assert!(tb.accepts_flags(Dead));
}
