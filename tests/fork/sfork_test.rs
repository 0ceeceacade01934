/*!
 * Shared Fork Tests
 * Heap shared writable, stack and identity kept copy-on-write
 */

use crate::common::{boot, fork_and_enter, DATA, DATA_PAGES, STACK_PAGE, TEXT};
use cow_fork::core::limits::{IDENTITY_SLOT, PGSIZE};
use cow_fork::{sfork, ForkConfig, ForkPolicy, Layout, ProcessContext, PteFlags, Syscalls, UserMemory};
use pretty_assertions::assert_eq;

#[test]
fn test_shared_heap_visible_both_ways() {
    let (machine, root) = boot();
    let (child, report) = fork_and_enter(&machine, &root, ForkConfig::shared());
    let faults = machine.stats().faults_delivered;

    child.write(DATA, b"from child").unwrap();
    let mut buf = [0u8; 10];
    root.read(DATA, &mut buf).unwrap();
    assert_eq!(&buf, b"from child");

    root.write(DATA + PGSIZE, b"from parent").unwrap();
    let mut buf = [0u8; 11];
    child.read(DATA + PGSIZE, &mut buf).unwrap();
    assert_eq!(&buf, b"from parent");

    assert_eq!(machine.stats().faults_delivered, faults);
    assert_eq!(report.policy, ForkPolicy::Shared);
    assert_eq!(report.shared, DATA_PAGES);
    assert!(machine.audit().is_empty());
}

#[test]
fn test_private_ranges_stay_copy_on_write() {
    let (machine, root) = boot();
    let (child, report) = fork_and_enter(&machine, &root, ForkConfig::shared());

    assert_eq!(report.copy_on_write, 2);
    assert_eq!(report.read_only, 1);
    assert_ne!(
        machine.frame_of(root.pid(), STACK_PAGE),
        machine.frame_of(child.pid(), STACK_PAGE)
    );

    let layout = Layout::default();
    assert_eq!(ProcessContext::new(&child, &layout).this_env().unwrap(), child.pid());
    assert_eq!(ProcessContext::new(&root, &layout).this_env().unwrap(), root.pid());
    assert_eq!(
        root.page_perm(IDENTITY_SLOT),
        Some(PteFlags::USER_RO | PteFlags::COW)
    );

    assert_eq!(child.page_perm(TEXT), Some(PteFlags::USER_RO));
    for va in [DATA, DATA + PGSIZE] {
        assert_eq!(root.page_perm(va), Some(PteFlags::USER_RW));
        assert_eq!(child.page_perm(va), Some(PteFlags::USER_RW));
    }
}

#[test]
fn test_sfork_entry_point() {
    let (machine, root) = boot();
    let outcome = sfork(&root).unwrap();
    let child = outcome.child_pid().unwrap();
    assert_eq!(machine.frame_of(child, DATA), machine.frame_of(root.pid(), DATA));
    assert_eq!(machine.perm(child, DATA), Some(PteFlags::USER_RW));
}
