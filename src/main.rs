/*!
 * forktree - Copy-on-Write Fork Demo
 *
 * Boots a simulated machine, loads a small program image into a root
 * environment and forks a binary tree of environments from it. Each one
 * writes its own name into a shared-at-birth data page to show that the
 * copies diverge only on write.
 *
 * Usage: forktree [depth]
 *
 * Environment variables:
 * - COW_FORK_POLICY: cow (default) or shared
 * - RUST_LOG / COW_FORK_TRACE_JSON: see `init_tracing`
 */

use cow_fork::core::limits::{PGSIZE, USTACKTOP, UTEXT};
use cow_fork::{
    init_tracing, ForkConfig, ForkOutcome, Forker, Machine, Pid, ProcessContext, PteFlags, SimProcess,
    UserMemory,
};
use miette::{IntoDiagnostic, Result};
use tracing::info;

const DEFAULT_DEPTH: usize = 3;
const TEXT: &[u8] = b"\x55\x89\xe5forktree";
const DATA: usize = UTEXT + PGSIZE;
const NAME_LEN: usize = 16;

fn main() -> Result<()> {
    init_tracing();

    let depth = match std::env::args().nth(1) {
        Some(arg) => arg.parse().into_diagnostic()?,
        None => DEFAULT_DEPTH,
    };
    let config = ForkConfig::from_env()?;
    info!(depth = depth, policy = %config.policy, "forktree starting");

    let machine = Machine::default();
    let root = machine.spawn()?;
    machine.load_segment(root.pid(), UTEXT, TEXT, PteFlags::USER_RO)?;
    machine.load_segment(root.pid(), DATA, &[0u8; NAME_LEN], PteFlags::USER_RW)?;
    machine.load_segment(root.pid(), USTACKTOP - PGSIZE, &[], PteFlags::USER_RW)?;
    machine.set_stack_pointer(root.pid(), Some(USTACKTOP - 64))?;
    ProcessContext::new(&root, &config.layout).init()?;

    let mut names = Vec::new();
    forktree(&machine, &root, &config, String::new(), depth, &mut names)?;

    for (pid, name) in &names {
        let stored = machine
            .peek(*pid, DATA, NAME_LEN)
            .map(|bytes| String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string())
            .unwrap_or_default();
        println!("{:08x}: I am '{}' (data page holds '{}')", pid, name, stored);
    }

    let violations = machine.audit();
    println!(
        "{}",
        serde_json::to_string_pretty(&machine.stats()).into_diagnostic()?
    );
    println!("audit: {} violation(s)", violations.len());
    for violation in &violations {
        println!("  {}", violation);
    }
    Ok(())
}

/// Record `name` in `proc`'s own memory, then fork two children below it
fn forktree(
    machine: &Machine,
    proc: &SimProcess,
    config: &ForkConfig,
    name: String,
    depth: usize,
    names: &mut Vec<(Pid, String)>,
) -> Result<()> {
    let mut buf = [0u8; NAME_LEN];
    let len = name.len().min(NAME_LEN);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    proc.write(DATA, &buf)?;
    names.push((proc.pid(), name.clone()));

    if name.len() >= depth {
        return Ok(());
    }

    for branch in ['0', '1'] {
        let forker = Forker::new(proc, *config);
        let (outcome, report) = forker.fork_with_report()?;
        let ForkOutcome::Parent(child) = outcome else {
            continue;
        };
        if let Some(report) = report {
            println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        }

        let (child_proc, ret) = machine.enter(child)?;
        Forker::new(&child_proc, *config).resume(ret)?;
        forktree(machine, &child_proc, config, format!("{}{}", name, branch), depth, names)?;
    }
    Ok(())
}
