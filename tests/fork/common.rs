/*!
 * Shared fixtures for fork tests
 */

#![allow(dead_code)]

use cow_fork::core::limits::{PGSIZE, USTACKTOP, UTEXT};
use cow_fork::{
    ForkConfig, ForkOutcome, ForkReport, Forker, Machine, MachineConfig, ProcessContext, PteFlags,
    SimProcess,
};

pub const TEXT: usize = UTEXT;
pub const DATA: usize = UTEXT + PGSIZE;
pub const DATA_PAGES: usize = 2;
pub const STACK_PAGE: usize = USTACKTOP - PGSIZE;
pub const STACK_POINTER: usize = USTACKTOP - 64;

/// Root environment with a text page, two data pages, one stack page and
/// an initialized identity cache. The stack model is active.
pub fn boot() -> (Machine, SimProcess) {
    boot_with(MachineConfig::default(), true)
}

pub fn boot_with(config: MachineConfig, with_stack: bool) -> (Machine, SimProcess) {
    let machine = Machine::new(config);
    let root = machine.spawn().unwrap();
    machine
        .load_segment(root.pid(), TEXT, b"\x55\x89\xe5 text", PteFlags::USER_RO)
        .unwrap();
    let mut data = vec![0u8; DATA_PAGES * PGSIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    machine
        .load_segment(root.pid(), DATA, &data, PteFlags::USER_RW)
        .unwrap();
    if with_stack {
        machine
            .load_segment(root.pid(), STACK_PAGE, b"frame", PteFlags::USER_RW)
            .unwrap();
        machine
            .set_stack_pointer(root.pid(), Some(STACK_POINTER))
            .unwrap();
    }
    ProcessContext::new(&root, &ForkConfig::default().layout)
        .init()
        .unwrap();
    (machine, root)
}

/// Fork `parent`, then run the child up to its return from `fork`
pub fn fork_and_enter(
    machine: &Machine,
    parent: &SimProcess,
    config: ForkConfig,
) -> (SimProcess, ForkReport) {
    let (outcome, report) = Forker::new(parent, config).fork_with_report().unwrap();
    let ForkOutcome::Parent(child) = outcome else {
        panic!("caller must see the parent continuation");
    };
    let (child_proc, ret) = machine.enter(child).unwrap();
    let child_outcome = Forker::new(&child_proc, config).resume(ret).unwrap();
    assert_eq!(child_outcome, ForkOutcome::Child);
    (child_proc, report.unwrap())
}
