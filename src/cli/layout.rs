use std::path::PathBuf;
use std::process;

use clap::Args;
use wglaunch::workgroup::layout::ArgBufferLayout;

use super::{load_module, resolve_device};

#[derive(Args)]
pub struct LayoutArgs {
    /// Input module (JSON)
    pub input: PathBuf,
    /// Target device: built-in name or path to a .toml file
    #[arg(long, default_value = "accel")]
    pub device: String,
    /// Print the human-readable table instead of JSON
    #[arg(long)]
    pub text: bool,
}

pub fn cmd_layout(args: LayoutArgs) {
    let cfg = resolve_device(&args.device);
    let module = load_module(&args.input);

    let mut layouts = Vec::new();
    let mut failed = false;
    for kernel in module.functions.iter().filter(|f| f.attrs.kernel) {
        match ArgBufferLayout::compute(kernel, &cfg) {
            Ok(layout) => layouts.push(layout),
            Err(diag) => {
                eprintln!("{}", diag);
                failed = true;
            }
        }
    }

    if args.text {
        for layout in &layouts {
            print!("{}", layout);
        }
    } else {
        match serde_json::to_string_pretty(&layouts) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: cannot serialize layouts: {}", e);
                process::exit(1);
            }
        }
    }

    if failed {
        process::exit(1);
    }
}
