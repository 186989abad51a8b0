//! Shared plumbing for the host demos.

use anyhow::bail;
use clap::Args;
use rtos_kernel::Quantum;
use rtos_posix::{HaltReason, SimReport};

/// Simulator options common to every demo
#[derive(Args, Debug, Clone)]
pub struct SimArgs {
    /// Preemption points per simulated timer tick
    #[arg(long, default_value_t = 4, value_name = "POINTS")]
    pub quantum: u32,
}

impl SimArgs {
    pub fn quantum(&self) -> anyhow::Result<Quantum> {
        Ok(Quantum::new(self.quantum)?)
    }
}

/// Print how the run ended; a kernel fault becomes an error.
pub fn summarize(report: &SimReport) -> anyhow::Result<()> {
    println!(
        "halted after {} scheduling points, {} ticks",
        report.steps, report.ticks
    );
    match &report.reason {
        HaltReason::Fault(message) => bail!("simulation faulted: {message}"),
        HaltReason::StepBudget => println!("step budget exhausted"),
        HaltReason::Requested => {}
    }
    Ok(())
}
