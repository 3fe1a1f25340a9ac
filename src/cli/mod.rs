pub mod device;
pub mod launch;
pub mod layout;
pub mod run;

use std::path::{Path, PathBuf};
use std::process;

use tracing_subscriber::EnvFilter;
use wglaunch::{DeviceConfig, Diagnostic, Module};

/// Install the fmt subscriber. `WGLAUNCH_LOG` wins over `RUST_LOG`;
/// without either only warnings are shown.
pub fn init_tracing() {
    let filter = std::env::var("WGLAUNCH_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn render_and_exit(diag: &Diagnostic, path: &Path, source: Option<&str>) -> ! {
    match source {
        Some(source) if !diag.span.is_dummy() => {
            diag.render(&path.display().to_string(), source)
        }
        _ => eprintln!("{}", diag),
    }
    process::exit(1);
}

/// Read and parse a module, exiting with a rendered diagnostic on failure.
pub fn load_module(path: &Path) -> Module {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    };
    match Module::from_json(&source) {
        Ok(module) => module,
        Err(diag) => render_and_exit(&diag, path, Some(&source)),
    }
}

/// Resolve `--device` (a built-in name, a `devices/<name>.toml` lookup, or
/// a path to a `.toml` file).
pub fn resolve_device(name: &str) -> DeviceConfig {
    match DeviceConfig::resolve(name) {
        Ok(cfg) => cfg,
        Err(diag) => {
            let path = PathBuf::from(name);
            let source = std::fs::read_to_string(&path).ok();
            render_and_exit(&diag, &path, source.as_deref())
        }
    }
}

pub fn write_output(path: &Path, content: &str) {
    if let Err(e) = std::fs::write(path, content) {
        eprintln!("error: cannot write '{}': {}", path.display(), e);
        process::exit(1);
    }
}

/// Parse `x,y,z` (missing trailing dimensions default to 1).
pub fn parse_triple(s: &str) -> Result<[u64; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("expected 1 to 3 comma-separated sizes, got '{}'", s));
    }
    let mut out = [1u64; 3];
    for (i, part) in parts.iter().enumerate() {
        out[i] = part
            .parse()
            .map_err(|_| format!("invalid size '{}' in '{}'", part, s))?;
        if out[i] == 0 {
            return Err(format!("sizes must be nonzero, got '{}'", s));
        }
    }
    Ok(out)
}
