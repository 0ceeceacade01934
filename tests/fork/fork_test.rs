/*!
 * Fork Tests
 * Address-space duplication and copy-on-write isolation
 */

use crate::common::{boot, fork_and_enter, DATA, DATA_PAGES, STACK_PAGE, TEXT};
use cow_fork::core::limits::{PGSIZE, UXSTACKTOP};
use cow_fork::{fork, EnvStatus, ForkConfig, ForkOutcome, Layout, PteFlags, Syscalls, UserMemory};
use pretty_assertions::assert_eq;

#[test]
fn test_fork_returns_on_both_paths() {
    let (machine, root) = boot();
    let outcome = fork(&root).unwrap();
    let child = outcome.child_pid().unwrap();
    assert!(outcome.as_raw() > 0);
    assert_ne!(child, root.pid());
    assert_eq!(machine.status(child), Some(EnvStatus::Runnable));

    let (child_proc, ret) = machine.enter(child).unwrap();
    let child_outcome = cow_fork::Forker::new(&child_proc, ForkConfig::default())
        .resume(ret)
        .unwrap();
    assert_eq!(child_outcome, ForkOutcome::Child);
    assert_eq!(child_outcome.as_raw(), 0);
}

#[test]
fn test_child_memory_matches_parent() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());

    for va in [TEXT, DATA, DATA + PGSIZE] {
        assert_eq!(
            machine.peek(child.pid(), va, PGSIZE),
            machine.peek(root.pid(), va, PGSIZE),
            "page 0x{:x} differs",
            va
        );
    }
}

#[test]
fn test_write_after_fork_is_private() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let before = machine.stats();

    root.write(DATA, b"parent").unwrap();
    let after = machine.stats();
    assert_eq!(after.faults_delivered, before.faults_delivered + 1);
    assert_eq!(after.page_allocs, before.page_allocs + 1);

    root.write(DATA + 6, b" again").unwrap();
    assert_eq!(machine.stats().faults_delivered, after.faults_delivered);

    let mut seen = [0u8; 12];
    root.read(DATA, &mut seen).unwrap();
    assert_eq!(&seen, b"parent again");

    let mut original = [0u8; 6];
    child.read(DATA, &mut original).unwrap();
    assert_eq!(original, [0, 1, 2, 3, 4, 5]);

    assert_eq!(root.page_perm(DATA), Some(PteFlags::USER_RW));
    assert_eq!(
        child.page_perm(DATA),
        Some(PteFlags::USER_RO | PteFlags::COW)
    );
    assert!(machine.audit().is_empty());
}

#[test]
fn test_child_write_does_not_reach_parent() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let original = machine.peek(root.pid(), DATA + PGSIZE, 5).unwrap();
    assert_eq!(original, vec![80, 81, 82, 83, 84]);
    let before = machine.stats();

    child.write(DATA + PGSIZE, b"child").unwrap();
    let after = machine.stats();
    assert_eq!(after.faults_delivered, before.faults_delivered + 1);
    assert_eq!(after.page_allocs, before.page_allocs + 1);

    assert_eq!(machine.peek(root.pid(), DATA + PGSIZE, 5).unwrap(), original);
    assert_eq!(machine.peek(child.pid(), DATA + PGSIZE, 5).unwrap(), b"child".to_vec());
}

#[test]
fn test_permissions_after_fork() {
    let (machine, root) = boot();
    let (child, report) = fork_and_enter(&machine, &root, ForkConfig::default());

    assert_eq!(report.pages, 1 + DATA_PAGES + 2);
    assert_eq!(report.read_only, 1);
    assert_eq!(report.copy_on_write, DATA_PAGES + 2);
    assert_eq!(report.shared, 0);

    assert_eq!(root.page_perm(TEXT), Some(PteFlags::USER_RO));
    assert_eq!(child.page_perm(TEXT), Some(PteFlags::USER_RO));
    assert_eq!(machine.frame_of(root.pid(), TEXT), machine.frame_of(child.pid(), TEXT));

    for va in [DATA, DATA + PGSIZE] {
        assert_eq!(root.page_perm(va), Some(PteFlags::USER_RO | PteFlags::COW));
        assert_eq!(child.page_perm(va), Some(PteFlags::USER_RO | PteFlags::COW));
        assert_eq!(machine.frame_of(root.pid(), va), machine.frame_of(child.pid(), va));
    }
}

#[test]
fn test_existing_cow_page_stays_cow() {
    let (machine, root) = boot();
    let cow_va = DATA + 4 * PGSIZE;
    machine
        .load_segment(root.pid(), cow_va, b"cow", PteFlags::USER_RO | PteFlags::COW)
        .unwrap();

    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    assert_eq!(root.page_perm(cow_va), Some(PteFlags::USER_RO | PteFlags::COW));
    assert_eq!(child.page_perm(cow_va), Some(PteFlags::USER_RO | PteFlags::COW));
}

#[test]
fn test_absent_pages_stay_absent() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let layout = Layout::default();

    let parent_pages: Vec<_> = machine
        .mappings(root.pid())
        .into_iter()
        .map(|(va, _)| va)
        .filter(|va| layout.is_duplicable(*va))
        .collect();
    let child_pages: Vec<_> = machine
        .mappings(child.pid())
        .into_iter()
        .map(|(va, _)| va)
        .filter(|va| layout.is_duplicable(*va))
        .collect();

    assert_eq!(child_pages, parent_pages);
    assert_eq!(child.page_perm(DATA + DATA_PAGES * PGSIZE), None);
    assert_eq!(child.page_perm(layout.scratch), None);
}

#[test]
fn test_exception_stacks_are_private() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let xstack = UXSTACKTOP - PGSIZE;

    let parent_frame = machine.frame_of(root.pid(), xstack).unwrap();
    let child_frame = machine.frame_of(child.pid(), xstack).unwrap();
    assert_ne!(parent_frame, child_frame);
    assert_eq!(machine.frame_refs(parent_frame), 1);
    assert_eq!(machine.frame_refs(child_frame), 1);
    assert_eq!(child.page_perm(xstack), Some(PteFlags::USER_RW));
}

#[test]
fn test_stacks_diverge_after_fork() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());

    assert_ne!(
        machine.frame_of(root.pid(), STACK_PAGE),
        machine.frame_of(child.pid(), STACK_PAGE)
    );
    assert_eq!(root.page_perm(STACK_PAGE), Some(PteFlags::USER_RW));
    assert_eq!(child.page_perm(STACK_PAGE), Some(PteFlags::USER_RW));
    assert!(machine.audit().is_empty());
}

#[test]
fn test_repeated_fork_reuses_exception_stack() {
    let (machine, root) = boot();
    let xstack = UXSTACKTOP - PGSIZE;

    let (first, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let frame = machine.frame_of(root.pid(), xstack).unwrap();
    let (second, _) = fork_and_enter(&machine, &root, ForkConfig::default());

    assert_eq!(machine.frame_of(root.pid(), xstack), Some(frame));
    assert_ne!(first.pid(), second.pid());
    assert!(machine.audit().is_empty());
}

#[test]
fn test_child_can_fork_again() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    child.write(DATA, b"gen1").unwrap();

    let (grandchild, _) = fork_and_enter(&machine, &child, ForkConfig::default());
    assert_eq!(machine.peek(grandchild.pid(), DATA, 4).unwrap(), b"gen1".to_vec());
    assert_eq!(machine.peek(root.pid(), DATA, 4).unwrap(), vec![0, 1, 2, 3]);
    assert!(machine.audit().is_empty());
}

#[test]
fn test_shared_frame_released_after_both_privatize() {
    let (machine, root) = boot();
    let (child, _) = fork_and_enter(&machine, &root, ForkConfig::default());
    let shared = machine.frame_of(root.pid(), DATA).unwrap();
    assert_eq!(machine.frame_refs(shared), 2);

    root.write(DATA, b"p").unwrap();
    assert_eq!(machine.frame_refs(shared), 1);
    child.write(DATA, b"c").unwrap();
    assert_eq!(machine.frame_refs(shared), 0);

    let live = machine.stats().live_frames;
    let child_pages = machine.mappings(child.pid()).len();
    let shared_with_parent = machine
        .mappings(child.pid())
        .iter()
        .filter(|(va, _)| machine.frame_of(child.pid(), *va) == machine.frame_of(root.pid(), *va))
        .count();
    root.env_destroy(child.pid()).unwrap();
    assert_eq!(machine.status(child.pid()), Some(EnvStatus::Dead));
    assert_eq!(
        machine.stats().live_frames,
        live - (child_pages - shared_with_parent)
    );
}
