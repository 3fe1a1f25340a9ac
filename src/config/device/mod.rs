use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::ir::Type;
use crate::span::Span;

/// Address-space ids the device assigns to each memory kind.
///
/// Id 0 is always the private address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressSpaces {
    pub global: u32,
    pub local: u32,
    pub constant: u32,
    /// Memory holding the execution context record.
    pub context: u32,
    /// Memory holding the packed argument buffer.
    pub args: u32,
}

/// Per-target compile-time constants consumed by the work-group pass.
///
/// One value is built per compilation and passed by reference to every
/// stage; nothing in the pass mutates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Short identifier used in CLI and file paths (e.g. "cpu").
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Pointer width in bits.
    pub address_bits: u32,
    /// Width of `size_t` context fields and local ids (32 or 64).
    pub size_t_width: u32,
    pub address_spaces: AddressSpaces,
    /// Number of work-item dimensions the device supports (1..=3).
    pub max_work_item_dims: u32,
    /// Largest local size per dimension.
    pub max_work_item_sizes: [u64; 3],
    /// Largest number of work-groups per grid dimension.
    pub max_grid_dim_width: u64,
    /// Kernels are entered through a packed argument buffer.
    pub arg_buffer_launcher: bool,
    /// One call executes the whole grid.
    pub grid_launcher: bool,
    /// Converged hardware threads: the hardware iterates work-items.
    pub spmd: bool,
    /// The launcher allocates local-memory buffers itself.
    pub alloca_locals: bool,
    /// Local size is only known at launch time.
    pub dynamic_local_size: bool,
    /// Local size fixed at generation time (ignored when dynamic).
    pub local_size: [u64; 3],
    /// Global offset is assumed to be zero.
    pub assume_zero_global_offset: bool,
    /// Formatted output is written to a device-side buffer.
    pub device_side_printf: bool,
    /// Supported subgroup sizes (empty: none can be requested).
    pub subgroup_sizes: Vec<u32>,
}

impl DeviceConfig {
    /// Multi-core host CPU: direct arguments, dynamic local size.
    pub fn cpu() -> Self {
        Self {
            name: "cpu".to_string(),
            display_name: "Host CPU".to_string(),
            address_bits: 64,
            size_t_width: 64,
            address_spaces: AddressSpaces {
                global: 1,
                local: 3,
                constant: 2,
                context: 0,
                args: 0,
            },
            max_work_item_dims: 3,
            max_work_item_sizes: [4096, 4096, 4096],
            max_grid_dim_width: 1 << 32,
            arg_buffer_launcher: false,
            grid_launcher: false,
            spmd: false,
            alloca_locals: true,
            dynamic_local_size: true,
            local_size: [1, 1, 1],
            assume_zero_global_offset: false,
            device_side_printf: true,
            subgroup_sizes: vec![8, 16],
        }
    }

    /// 32-bit accelerator entered once per grid through an argument buffer.
    pub fn accel() -> Self {
        Self {
            name: "accel".to_string(),
            display_name: "32-bit Accelerator".to_string(),
            address_bits: 32,
            size_t_width: 32,
            address_spaces: AddressSpaces {
                global: 1,
                local: 3,
                constant: 2,
                context: 5,
                args: 4,
            },
            max_work_item_dims: 3,
            max_work_item_sizes: [64, 64, 64],
            max_grid_dim_width: 1 << 16,
            arg_buffer_launcher: true,
            grid_launcher: true,
            spmd: false,
            alloca_locals: true,
            dynamic_local_size: false,
            local_size: [4, 1, 1],
            assume_zero_global_offset: true,
            device_side_printf: false,
            subgroup_sizes: Vec::new(),
        }
    }

    /// GPU-like SPMD device: the hardware runs one invocation per work-item.
    pub fn spmd() -> Self {
        Self {
            name: "spmd".to_string(),
            display_name: "SPMD GPU".to_string(),
            address_bits: 64,
            size_t_width: 64,
            address_spaces: AddressSpaces {
                global: 1,
                local: 3,
                constant: 4,
                context: 1,
                args: 1,
            },
            max_work_item_dims: 3,
            max_work_item_sizes: [1024, 1024, 64],
            max_grid_dim_width: 1 << 31,
            arg_buffer_launcher: true,
            grid_launcher: false,
            spmd: true,
            alloca_locals: false,
            dynamic_local_size: true,
            local_size: [1, 1, 1],
            assume_zero_global_offset: false,
            device_side_printf: true,
            subgroup_sizes: vec![8, 16, 32],
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(Self::cpu()),
            "accel" => Some(Self::accel()),
            "spmd" => Some(Self::spmd()),
            _ => None,
        }
    }

    pub fn ptr_bytes(&self) -> u64 {
        u64::from(self.address_bits / 8)
    }

    pub fn size_t(&self) -> Type {
        Type::size_t(self.size_t_width)
    }

    pub fn size_t_bytes(&self) -> u64 {
        u64::from(self.size_t_width / 8)
    }

    /// Local size and zero global offset are known before code generation.
    pub fn fast_path_eligible(&self) -> bool {
        !self.dynamic_local_size && self.assume_zero_global_offset
    }

    pub fn global_ptr(&self) -> Type {
        Type::Ptr(self.address_spaces.global)
    }

    pub fn local_ptr(&self) -> Type {
        Type::Ptr(self.address_spaces.local)
    }

    pub fn constant_ptr(&self) -> Type {
        Type::Ptr(self.address_spaces.constant)
    }

    pub fn context_ptr(&self) -> Type {
        Type::Ptr(self.address_spaces.context)
    }

    pub fn args_ptr(&self) -> Type {
        Type::Ptr(self.address_spaces.args)
    }

    /// Whether a kernel parameter may point into `space`.
    pub fn is_kernel_arg_space(&self, space: u32) -> bool {
        let spaces = &self.address_spaces;
        space == crate::ir::PRIVATE_AS
            || space == spaces.global
            || space == spaces.local
            || space == spaces.constant
    }

    /// Load a device configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read device config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a device by name: built-ins first, then `devices/{name}.toml`
    /// relative to the binary or the working directory. A name ending in
    /// `.toml` is loaded as a path.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        if name.ends_with(".toml") {
            return Self::load(Path::new(name));
        }

        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Diagnostic::error(
                format!("invalid device name '{}'", name),
                Span::dummy(),
            ));
        }

        if let Some(config) = Self::builtin(name) {
            return Ok(config);
        }

        let relative = format!("devices/{}.toml", name);

        // 1. Relative to the binary
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidates = [
                    Some(dir.to_path_buf()),
                    dir.parent().map(|p| p.to_path_buf()),
                    dir.parent().and_then(|p| p.parent()).map(|p| p.to_path_buf()),
                ];
                for base in candidates.iter().flatten() {
                    let path = base.join(&relative);
                    if path.exists() {
                        return Self::load(&path);
                    }
                }
            }
        }

        // 2. Current working directory
        let cwd_path = PathBuf::from(&relative);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }

        Err(Diagnostic::error(
            format!("unknown device '{}' (looked for '{}')", name, relative),
            Span::dummy(),
        )
        .with_help("built-in devices: cpu, accel, spmd"))
    }

    pub fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err_at = |span: Span, msg: String| {
            Diagnostic::error(format!("{}: {}", path.display(), msg), span)
        };

        // Unset keys fall back to the host CPU preset.
        let mut config = Self::cpu();
        config.name = String::new();
        config.display_name = String::new();

        let mut section = String::new();
        let mut line_start = 0usize;

        for line in content.split_inclusive('\n') {
            let span = Span::of_line(line_start, line.trim_end_matches(['\n', '\r']));
            line_start += line.len();

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(err_at(span, format!("expected 'key = value', found '{}'", trimmed)));
            };
            let key = key.trim();
            let value = value.trim();
            let unquoted = value.trim_matches('"');

            let int = |what: &str| -> Result<u64, Diagnostic> {
                value
                    .parse::<u64>()
                    .map_err(|_| err_at(span, format!("invalid {}: {}", what, value)))
            };
            let flag = |what: &str| -> Result<bool, Diagnostic> {
                match value {
                    "true" => Ok(true),
                    "false" => Ok(false),
                    _ => Err(err_at(span, format!("invalid {}: {} (expected bool)", what, value))),
                }
            };
            let triple = |what: &str| -> Result<[u64; 3], Diagnostic> {
                let items = parse_int_array(value)
                    .ok_or_else(|| err_at(span, format!("invalid {}: {}", what, value)))?;
                match items.as_slice() {
                    [x] => Ok([*x, 1, 1]),
                    [x, y] => Ok([*x, *y, 1]),
                    [x, y, z] => Ok([*x, *y, *z]),
                    _ => Err(err_at(span, format!("{} takes 1 to 3 entries", what))),
                }
            };

            match (section.as_str(), key) {
                ("device", "name") => config.name = unquoted.to_string(),
                ("device", "display_name") => config.display_name = unquoted.to_string(),
                ("device", "address_bits") => config.address_bits = int("device.address_bits")? as u32,
                ("device", "size_t_width") => config.size_t_width = int("device.size_t_width")? as u32,
                ("address_space", "global") => {
                    config.address_spaces.global = int("address_space.global")? as u32
                }
                ("address_space", "local") => {
                    config.address_spaces.local = int("address_space.local")? as u32
                }
                ("address_space", "constant") => {
                    config.address_spaces.constant = int("address_space.constant")? as u32
                }
                ("address_space", "context") => {
                    config.address_spaces.context = int("address_space.context")? as u32
                }
                ("address_space", "args") => {
                    config.address_spaces.args = int("address_space.args")? as u32
                }
                ("workitem", "max_dims") => {
                    config.max_work_item_dims = int("workitem.max_dims")? as u32
                }
                ("workitem", "max_sizes") => {
                    config.max_work_item_sizes = triple("workitem.max_sizes")?
                }
                ("workitem", "max_grid_dim_width") => {
                    config.max_grid_dim_width = int("workitem.max_grid_dim_width")?
                }
                ("launcher", "arg_buffer") => config.arg_buffer_launcher = flag("launcher.arg_buffer")?,
                ("launcher", "grid") => config.grid_launcher = flag("launcher.grid")?,
                ("launcher", "spmd") => config.spmd = flag("launcher.spmd")?,
                ("launcher", "alloca_locals") => {
                    config.alloca_locals = flag("launcher.alloca_locals")?
                }
                ("workgroup", "dynamic_local_size") => {
                    config.dynamic_local_size = flag("workgroup.dynamic_local_size")?
                }
                ("workgroup", "local_size") => config.local_size = triple("workgroup.local_size")?,
                ("workgroup", "assume_zero_global_offset") => {
                    config.assume_zero_global_offset =
                        flag("workgroup.assume_zero_global_offset")?
                }
                ("printf", "device_side") => {
                    config.device_side_printf = flag("printf.device_side")?
                }
                ("subgroup", "sizes") => {
                    config.subgroup_sizes = parse_int_array(value)
                        .ok_or_else(|| err_at(span, format!("invalid subgroup.sizes: {}", value)))?
                        .into_iter()
                        .map(|s| s as u32)
                        .collect();
                }
                _ => {
                    return Err(err_at(
                        span,
                        format!("unknown key '{}' in section [{}]", key, section),
                    ))
                }
            }
        }

        if config.name.is_empty() {
            return Err(err_at(Span::dummy(), "missing device.name".to_string()));
        }
        if config.display_name.is_empty() {
            config.display_name = config.name.clone();
        }
        config
            .validate()
            .map_err(|msg| err_at(Span::dummy(), msg))?;
        Ok(config)
    }

    /// Check internal consistency of the constants.
    pub fn validate(&self) -> Result<(), String> {
        if self.size_t_width != 32 && self.size_t_width != 64 {
            return Err(format!(
                "device.size_t_width must be 32 or 64, got {}",
                self.size_t_width
            ));
        }
        if self.address_bits != 32 && self.address_bits != 64 {
            return Err(format!(
                "device.address_bits must be 32 or 64, got {}",
                self.address_bits
            ));
        }
        if !(1..=3).contains(&self.max_work_item_dims) {
            return Err(format!(
                "workitem.max_dims must be between 1 and 3, got {}",
                self.max_work_item_dims
            ));
        }
        if self.max_work_item_sizes.contains(&0) {
            return Err("workitem.max_sizes entries must be > 0".to_string());
        }
        if self.max_grid_dim_width == 0 {
            return Err("workitem.max_grid_dim_width must be > 0".to_string());
        }
        let spaces = &self.address_spaces;
        if spaces.global == spaces.local
            || spaces.global == spaces.constant
            || spaces.local == spaces.constant
        {
            return Err("global, local and constant address spaces must be distinct".to_string());
        }
        if spaces.local == crate::ir::PRIVATE_AS {
            return Err("local address space cannot be the private space 0".to_string());
        }
        if !self.dynamic_local_size {
            for (dim, (&size, &max)) in self
                .local_size
                .iter()
                .zip(&self.max_work_item_sizes)
                .enumerate()
            {
                if size == 0 || size > max {
                    return Err(format!(
                        "workgroup.local_size[{}] = {} outside 1..={}",
                        dim, size, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Parse a minimal TOML integer array: `[4, 1, 1]` → `vec![4, 1, 1]`.
fn parse_int_array(s: &str) -> Option<Vec<u64>> {
    let s = s.trim();
    if !s.starts_with('[') || !s.ends_with(']') {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}
