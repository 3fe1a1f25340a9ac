use clap::{Parser, Subcommand};

mod cli;

use cli::device::DeviceArgs;
use cli::launch::LaunchArgs;
use cli::layout::LayoutArgs;
use cli::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "wglaunch",
    version,
    about = "Generate work-group launchers for SPMD compute kernels"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit launchers for every kernel of a module
    Launch(LaunchArgs),
    /// Print argument-buffer layouts as JSON
    Layout(LayoutArgs),
    /// Run a kernel over a grid in the reference interpreter
    Run(RunArgs),
    /// Print a resolved device configuration
    Device(DeviceArgs),
}

fn main() {
    cli::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Launch(args) => cli::launch::cmd_launch(args),
        Command::Layout(args) => cli::layout::cmd_layout(args),
        Command::Run(args) => cli::run::cmd_run(args),
        Command::Device(args) => cli::device::cmd_device(args),
    }
}
