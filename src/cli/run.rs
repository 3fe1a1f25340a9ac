use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use clap::Args;
use wglaunch::exec::{Event, Harness, Value};
use wglaunch::ir::Type;
use wglaunch::workgroup::context::ContextValues;
use wglaunch::Workgroup;

use super::{load_module, parse_triple, resolve_device};

#[derive(Args)]
pub struct RunArgs {
    /// Input module (JSON)
    pub input: PathBuf,
    /// Target device: built-in name or path to a .toml file
    #[arg(long, default_value = "cpu")]
    pub device: String,
    /// Kernel to run
    #[arg(long)]
    pub kernel: String,
    /// Local work-group size, x[,y[,z]]
    #[arg(long, default_value = "1")]
    pub local: String,
    /// Number of work-groups, x[,y[,z]]
    #[arg(long, default_value = "1")]
    pub groups: String,
    /// Scalar argument values in parameter order (pointers are skipped)
    #[arg(long, value_delimiter = ',')]
    pub scalar: Vec<u64>,
    /// Bytes allocated for every pointer argument
    #[arg(long, default_value_t = 4096)]
    pub buffer_size: u64,
    /// Capacity of the device-side output buffer in bytes
    #[arg(long, default_value_t = 4096)]
    pub output_capacity: u32,
}

pub fn cmd_run(args: RunArgs) {
    let cfg = resolve_device(&args.device);
    let mut module = load_module(&args.input);
    let local = parse_triple(&args.local).unwrap_or_else(|e| {
        eprintln!("error: --local: {}", e);
        process::exit(1);
    });
    let groups = parse_triple(&args.groups).unwrap_or_else(|e| {
        eprintln!("error: --groups: {}", e);
        process::exit(1);
    });

    let Some(kernel) = module.get(&args.kernel).cloned() else {
        eprintln!("error: no function '{}' in module '{}'", args.kernel, module.name);
        process::exit(1);
    };
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    if let Some(skip) = report.skipped(&args.kernel) {
        eprintln!("error: {}", skip);
        process::exit(1);
    }
    let Some(set) = report.get(&args.kernel).cloned() else {
        eprintln!(
            "error: '{}' is not a kernel or already has launchers",
            args.kernel
        );
        process::exit(1);
    };

    let mut harness = Harness::new(&module, &cfg);
    let mut scalars = args.scalar.iter().copied();
    let mut values = Vec::with_capacity(kernel.params.len());
    for param in &kernel.params {
        let value = match (&param.ty, param.by_value) {
            (ty, true) => {
                let size = ty.size(cfg.ptr_bytes());
                Value::Ptr(harness.machine.alloc(0, size))
            }
            // Launcher-allocated locals travel as their byte size.
            (Type::Ptr(space), false)
                if *space == cfg.address_spaces.local
                    && cfg.alloca_locals
                    && set.layout.is_some() =>
            {
                Value::Int(args.buffer_size)
            }
            (Type::Ptr(space), false) => Value::Ptr(harness.machine.alloc(*space, args.buffer_size)),
            _ => Value::Int(scalars.next().unwrap_or(0)),
        };
        values.push(value);
    }

    let mut context = ContextValues::launch(local, groups);
    if cfg.device_side_printf {
        harness.attach_output(&mut context, args.output_capacity);
    }
    if let Err(e) = harness.run_grid(&set, &values, &context) {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    let mut calls: BTreeMap<&str, usize> = BTreeMap::new();
    let mut barriers = 0;
    let mut outputs = 0;
    for event in harness.machine.events() {
        match event {
            Event::Call { callee, .. } => *calls.entry(callee.as_str()).or_default() += 1,
            Event::Barrier => barriers += 1,
            Event::Printf { .. } => outputs += 1,
        }
    }
    println!(
        "{} on {}: local {:?}, groups {:?}",
        args.kernel, cfg.name, local, groups
    );
    for (callee, count) in &calls {
        println!("  {:>8}  {}", count, callee);
    }
    println!("  barriers {}, outputs {}", barriers, outputs);
}
