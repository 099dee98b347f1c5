use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use test_support::mock::fs::MockFile;

use super::*;
use crate::error::VmError;
use crate::fault::handle_page_fault;
use crate::page::FileBacking;

const STACK_TOP: usize = 0xC000_0000;
const STACK_BOTTOM: usize = STACK_TOP - 8 * 1024 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_resolve_unregistered_page_fails() {
    let env = Env::new(2, 2);
    let spt = env.spt();
    assert!(!resolve_fault(&spt, vpn(0)));
    assert_eq!(env.free_frames(), 2);
}

#[test]
fn test_resolve_is_idempotent() {
    let env = Env::new(2, 2);
    let spt = env.spt();
    spt.declare_zero(vpn(0), true).unwrap();

    assert!(resolve_fault(&spt, vpn(0)));
    let frame = spt.lookup(vpn(0)).unwrap().frame;
    assert_eq!(env.free_frames(), 1);

    assert!(resolve_fault(&spt, vpn(0)));
    assert_eq!(spt.lookup(vpn(0)).unwrap().frame, frame);
    assert_eq!(env.free_frames(), 1);
    assert_eq!(env.pool.stats().pinned, 0);
    check_invariants(&env.pool, &[&spt]);
}

#[test]
fn test_recycled_frame_is_zeroed() {
    let env = Env::new(1, 1);
    let space = env.space();
    let spt = space.spt();
    spt.declare_zero(vpn(0), true).unwrap();
    space.copy_to_user(USER_SP, page_addr(0), &[0xAA; 4096]).unwrap();
    spt.remove(vpn(0));

    spt.declare_zero(vpn(1), true).unwrap();
    let mut buf = [0xFFu8; 4096];
    space.copy_from_user(USER_SP, page_addr(1), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_file_page_reads_and_zero_fills() {
    let env = Env::new(2, 2);
    let space = env.space();
    let spt = space.spt();
    let content = pattern(5000);
    let file: Arc<dyn MmFile> = Arc::new(MockFile::new(&content));
    spt.declare_file(
        vpn(0),
        FileBacking {
            file,
            offset: 4096,
            length: 904,
            write_back: false,
        },
        false,
    )
    .unwrap();

    let mut buf = [0xFFu8; 4096];
    space.copy_from_user(USER_SP, page_addr(0), &mut buf).unwrap();
    assert_eq!(&buf[..904], &content[4096..]);
    assert!(buf[904..].iter().all(|&b| b == 0));
    assert_eq!(spt.walk(vpn(0)).map(|(_, flags)| flags.contains(UniversalPTEFlag::WRITEABLE)), Ok(false));
}

#[test]
fn test_short_read_is_not_an_error() {
    let env = Env::new(1, 1);
    let spt = env.spt();
    let file: Arc<dyn MmFile> = Arc::new(MockFile::new(&[9u8; 10]));
    spt.declare_file(
        vpn(0),
        FileBacking {
            file,
            offset: 0,
            length: 4096,
            write_back: false,
        },
        true,
    )
    .unwrap();
    assert!(resolve_fault(&spt, vpn(0)));
}

#[test]
fn test_failed_read_releases_frame() {
    let env = Env::new(1, 1);
    let spt = env.spt();
    let file = Arc::new(MockFile::new(&[1u8; 4096]));
    file.stats().fail_reads.store(true, Ordering::Relaxed);
    spt.declare_file(
        vpn(0),
        FileBacking {
            file: file.clone() as Arc<dyn MmFile>,
            offset: 0,
            length: 4096,
            write_back: false,
        },
        true,
    )
    .unwrap();

    assert!(!resolve_fault(&spt, vpn(0)));
    assert!(!spt.lookup(vpn(0)).unwrap().is_present());
    assert_eq!(env.free_frames(), 1);
    assert_eq!(env.pool.stats().pinned, 0);

    file.stats().fail_reads.store(false, Ordering::Relaxed);
    assert!(resolve_fault(&spt, vpn(0)));
}

#[test]
fn test_clean_file_page_is_reread_not_swapped() {
    let env = Env::new(1, 4);
    let space = env.space();
    let spt = space.spt();
    let content = pattern(4096);
    let file = Arc::new(MockFile::new(&content));
    spt.declare_file(
        vpn(0),
        FileBacking {
            file: file.clone() as Arc<dyn MmFile>,
            offset: 0,
            length: 4096,
            write_back: false,
        },
        false,
    )
    .unwrap();
    spt.declare_zero(vpn(1), true).unwrap();

    space.handle_fault(page_addr(0), USER_SP, false).unwrap();
    space.handle_fault(page_addr(1), USER_SP, false).unwrap();
    assert!(!spt.lookup(vpn(0)).unwrap().is_present());
    assert!(matches!(spt.lookup(vpn(0)).unwrap().kind, PageKind::File { .. }));
    assert_eq!(env.swap.swap_outs(), 0);

    let mut buf = [0u8; 4096];
    space.copy_from_user(USER_SP, page_addr(0), &mut buf).unwrap();
    assert_eq!(&buf[..], &content[..]);
    assert_eq!(file.stats().reads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_dirty_private_file_page_moves_to_swap() {
    let env = Env::new(1, 4);
    let space = env.space();
    let spt = space.spt();
    let file = Arc::new(MockFile::new(&[5u8; 4096]));
    spt.declare_file(
        vpn(0),
        FileBacking {
            file: file.clone() as Arc<dyn MmFile>,
            offset: 0,
            length: 4096,
            write_back: false,
        },
        true,
    )
    .unwrap();
    spt.declare_zero(vpn(1), true).unwrap();

    space.copy_to_user(USER_SP, page_addr(0), b"modified").unwrap();
    space.handle_fault(page_addr(1), USER_SP, false).unwrap();

    let info = spt.lookup(vpn(0)).unwrap();
    assert_eq!(info.kind, PageKind::Swapped);
    assert!(info.swap_slot.is_some());
    assert_eq!(file.stats().writes.load(Ordering::Relaxed), 0);

    let mut buf = [0u8; 10];
    space.copy_from_user(USER_SP, page_addr(0), &mut buf).unwrap();
    assert_eq!(&buf, b"modified\x05\x05");
    assert!(file.contents().iter().all(|&b| b == 5));
    check_invariants(&env.pool, &[spt]);
}

#[test]
fn test_swapped_page_is_always_swapped_out_again() {
    let env = Env::new(1, 4);
    let space = env.space();
    let spt = space.spt();
    spt.declare_zero(vpn(0), true).unwrap();
    spt.declare_zero(vpn(1), true).unwrap();

    space.copy_to_user(USER_SP, page_addr(0), b"keep").unwrap();
    space.handle_fault(page_addr(1), USER_SP, false).unwrap();
    assert_eq!(env.swap.swap_outs(), 1);

    // 换入后只读不写，再次被驱逐时仍需换出
    space.handle_fault(page_addr(0), USER_SP, false).unwrap();
    assert_eq!(env.swap.swap_ins(), 1);
    space.handle_fault(page_addr(1), USER_SP, false).unwrap();
    assert_eq!(env.swap.swap_outs(), 2);
    assert_eq!(spt.lookup(vpn(0)).unwrap().kind, PageKind::Swapped);

    let mut buf = [0u8; 4];
    space.copy_from_user(USER_SP, page_addr(0), &mut buf).unwrap();
    assert_eq!(&buf, b"keep");
}

#[test]
fn test_fault_outside_user_space() {
    let env = Env::new(1, 1);
    let spt = env.spt();
    assert_eq!(handle_page_fault(&spt, 0, USER_SP, false), Err(VmError::SegmentationFault));
    assert_eq!(handle_page_fault(&spt, 0x10, USER_SP, false), Err(VmError::SegmentationFault));
    assert_eq!(
        handle_page_fault(&spt, STACK_TOP, STACK_TOP - 8, true),
        Err(VmError::SegmentationFault)
    );
}

#[test]
fn test_fault_on_unregistered_page() {
    let env = Env::new(1, 1);
    let spt = env.spt();
    assert_eq!(
        handle_page_fault(&spt, page_addr(0), USER_SP, false),
        Err(VmError::SegmentationFault)
    );
    assert!(spt.is_empty());
}

#[test]
fn test_write_fault_on_read_only_page() {
    let env = Env::new(1, 1);
    let spt = env.spt();
    spt.declare_zero(vpn(0), false).unwrap();
    assert_eq!(handle_page_fault(&spt, page_addr(0), USER_SP, true), Err(VmError::ReadOnly));
    assert_eq!(handle_page_fault(&spt, page_addr(0), USER_SP, false), Ok(()));
}

#[test]
fn test_stack_growth() {
    let env = Env::new(2, 2);
    let spt = env.spt();
    let sp = STACK_TOP - 0x3000;

    // 压栈：略低于栈指针
    assert_eq!(handle_page_fault(&spt, sp - 8, sp, true), Ok(()));
    let grown = Vpn::from_addr_floor(Vaddr::from_usize(sp - 8));
    let info = spt.lookup(grown).unwrap();
    assert!(info.writable);
    assert!(info.is_present());
    assert_eq!(info.kind, PageKind::Zero);

    // 栈指针之上的访问同样合法
    assert_eq!(handle_page_fault(&spt, sp + 0x100, sp, false), Ok(()));

    // 远低于栈指针
    assert_eq!(
        handle_page_fault(&spt, sp - 0x2000, sp, true),
        Err(VmError::SegmentationFault)
    );
    assert_eq!(spt.len(), 2);
}

#[test]
fn test_stack_growth_boundaries() {
    let env = Env::new(2, 2);
    let spt = env.spt();

    // 正好位于 user_sp - 32
    let sp = STACK_BOTTOM + 0x800;
    assert_eq!(handle_page_fault(&spt, sp - 32, sp, true), Ok(()));

    let sp = STACK_BOTTOM + 0x1800;
    assert_eq!(
        handle_page_fault(&spt, sp - 33, sp, true),
        Err(VmError::SegmentationFault)
    );

    // 栈区下边界之外
    assert_eq!(
        handle_page_fault(&spt, STACK_BOTTOM - 1, STACK_BOTTOM - 1, true),
        Err(VmError::SegmentationFault)
    );
    assert_eq!(spt.len(), 1);
}
