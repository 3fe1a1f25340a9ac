use std::path::PathBuf;
use std::process;

use clap::Args;
use wglaunch::workgroup::layout::LayoutCache;
use wglaunch::Workgroup;

use super::{load_module, resolve_device, write_output};

#[derive(Args)]
pub struct LaunchArgs {
    /// Input module (JSON)
    pub input: PathBuf,
    /// Target device: built-in name or path to a .toml file
    #[arg(long, default_value = "cpu")]
    pub device: String,
    /// Output module (default: <input>.launch.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Print the transformed module to stdout
    #[arg(long)]
    pub print: bool,
    /// Argument-buffer layout lock file to check against and update
    #[arg(long, value_name = "PATH")]
    pub layout_lock: Option<PathBuf>,
    /// Exit with an error when any kernel is skipped
    #[arg(long)]
    pub strict: bool,
}

pub fn cmd_launch(args: LaunchArgs) {
    let cfg = resolve_device(&args.device);
    let mut module = load_module(&args.input);

    let mut pass = Workgroup::new(&cfg);
    if let Some(lock) = &args.layout_lock {
        match LayoutCache::load_or_default(lock) {
            Ok(cache) => pass = pass.with_layout_cache(cache),
            Err(diag) => {
                eprintln!("{}", diag);
                process::exit(1);
            }
        }
    }

    let report = pass.run_on_module(&mut module);
    for skip in &report.skipped {
        eprintln!("warning: {}", skip);
        for note in &skip.diagnostic.notes {
            eprintln!("  note: {}", note);
        }
        if let Some(help) = &skip.diagnostic.help {
            eprintln!("  help: {}", help);
        }
    }

    if let Some(lock) = &args.layout_lock {
        if let Err(diag) = pass.layout_cache().save(lock) {
            eprintln!("{}", diag);
            process::exit(1);
        }
    }

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("launch.json"));
    write_output(&output, &(module.to_json() + "\n"));
    if args.print {
        print!("{}", module);
    }

    eprintln!(
        "{}: {} kernel(s) launched, {} skipped -> {}",
        args.input.display(),
        report.launchers.len(),
        report.skipped.len(),
        output.display()
    );
    for set in &report.launchers {
        let launchers: Vec<&str> = set.launchers().collect();
        eprintln!("  {} -> {}", set.kernel, launchers.join(", "));
    }

    if args.strict && !report.skipped.is_empty() {
        process::exit(1);
    }
}
