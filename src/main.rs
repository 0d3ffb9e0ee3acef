// src/main.rs

//! Demo: a ramp feeding a doubler and an accumulator, run to completion.
//!
//! ```text
//!   ramp ──► scale ──► sum ──► (tap)
//!     └───────────────►┘
//! ```
//!
//! Usage: `dde-kernel [config.json]`

use anyhow::Context;
use log::info;

use dde_kernel::{
    Actor, FiringContext, Input, KernelConfig, KernelResult, Model, CONFIG,
};

/// Completion time used when the config leaves it unset.
const DEMO_COMPLETION_TIME: f64 = 10.0;

/// Emits 0, 1, 2, ... at t=0, 1, 2, ... on every output.
struct Ramp {
    next: u64,
}

impl Actor<u64> for Ramp {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u64>, _input: Option<Input<u64>>) -> KernelResult<()> {
        ctx.advance_to(self.next as f64)?;
        ctx.broadcast(self.next)?;
        self.next += 1;
        Ok(())
    }
}

struct Scale {
    factor: u64,
}

impl Actor<u64> for Scale {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u64>, input: Option<Input<u64>>) -> KernelResult<()> {
        if let Some(value) = input.and_then(Input::into_token) {
            ctx.send(0, value * self.factor)?;
        }
        Ok(())
    }
}

/// Adds up everything it sees and reports the running total.
#[derive(Default)]
struct Sum {
    total: u64,
}

impl Actor<u64> for Sum {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u64>, input: Option<Input<u64>>) -> KernelResult<()> {
        if let Some(input) = input {
            let port = input.port;
            if let Some(value) = input.into_token() {
                self.total += value;
                log::debug!("sum: +{} on port {} at {}", value, port, ctx.current_time());
                ctx.send(0, self.total)?;
            }
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    // --- Configuration ---
    let mut config = match std::env::args().nth(1) {
        Some(path) => KernelConfig::load(&path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => CONFIG.clone(),
    };
    if config.completion_time.is_none() {
        config.completion_time = Some(DEMO_COMPLETION_TIME);
    }
    info!("Configuration: {:?}", config);

    // --- Topology ---
    let mut model: Model<u64> = Model::new(config);
    let ramp = model.add_actor("ramp", Ramp { next: 0 })?;
    let scale = model.add_actor("scale", Scale { factor: 2 })?;
    let sum = model.add_actor("sum", Sum::default())?;
    model.connect(ramp, scale)?;
    model.connect(scale, sum)?;
    model.connect(ramp, sum)?;
    let totals = model.tap(sum)?;

    // --- Run ---
    let report = model.run().context("Model run failed")?;
    info!("Run ended: {}", report.outcome);

    let totals = totals.drain_tokens().context("Failed to drain output")?;
    for (total, time) in &totals {
        info!("{}: total {}", time, total);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
    );
    Ok(())
}
