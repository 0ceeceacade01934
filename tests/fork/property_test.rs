/*!
 * Property Tests
 * Random address spaces survive fork with the expected permissions
 */

use crate::common::fork_and_enter;
use cow_fork::core::limits::{PGSIZE, UTEXT};
use cow_fork::{ForkConfig, Machine, PteFlags, Syscalls};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn perm_for(kind: u8) -> PteFlags {
    match kind {
        0 => PteFlags::USER_RO,
        1 => PteFlags::USER_RW,
        _ => PteFlags::USER_RO | PteFlags::COW,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fork_preserves_layout(
        pages in proptest::collection::btree_map(0usize..64, 0u8..3, 1..12),
        shared in any::<bool>(),
    ) {
        let machine = Machine::default();
        let root = machine.spawn().unwrap();
        for (index, kind) in &pages {
            let va = UTEXT + index * PGSIZE;
            machine
                .load_segment(root.pid(), va, &[*index as u8; 8], perm_for(*kind))
                .unwrap();
        }

        let config = if shared { ForkConfig::shared() } else { ForkConfig::cow() };
        let (child, report) = fork_and_enter(&machine, &root, config);
        prop_assert_eq!(report.pages, pages.len());

        let expected: BTreeMap<usize, (PteFlags, PteFlags)> = pages
            .iter()
            .map(|(index, kind)| {
                let perms = match (*kind, shared) {
                    (0, _) => (PteFlags::USER_RO, PteFlags::USER_RO),
                    (1, true) => (PteFlags::USER_RW, PteFlags::USER_RW),
                    _ => (PteFlags::USER_RO | PteFlags::COW, PteFlags::USER_RO | PteFlags::COW),
                };
                (UTEXT + index * PGSIZE, perms)
            })
            .collect();

        for (va, (parent_perm, child_perm)) in &expected {
            prop_assert_eq!(root.page_perm(*va), Some(*parent_perm));
            prop_assert_eq!(child.page_perm(*va), Some(*child_perm));
            prop_assert_eq!(machine.frame_of(root.pid(), *va), machine.frame_of(child.pid(), *va));
        }
        prop_assert!(machine.audit().is_empty());
    }
}
