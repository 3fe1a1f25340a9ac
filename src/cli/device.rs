use clap::Args;

use super::resolve_device;

#[derive(Args)]
pub struct DeviceArgs {
    /// Built-in device (cpu, accel, spmd), devices/<name>.toml, or a .toml path
    pub device: String,
}

pub fn cmd_device(args: DeviceArgs) {
    let cfg = resolve_device(&args.device);
    let spaces = &cfg.address_spaces;
    let sizes: Vec<String> = cfg.subgroup_sizes.iter().map(|s| s.to_string()).collect();

    println!("{} ({})", cfg.name, cfg.display_name);
    println!("  address bits     {}", cfg.address_bits);
    println!("  size_t           {} bits", cfg.size_t_width);
    println!(
        "  address spaces   global={} local={} constant={} context={} args={}",
        spaces.global, spaces.local, spaces.constant, spaces.context, spaces.args
    );
    println!(
        "  work-items       {} dims, max {:?}, max groups per dim {}",
        cfg.max_work_item_dims, cfg.max_work_item_sizes, cfg.max_grid_dim_width
    );
    println!(
        "  launchers        default{}{}{}",
        if cfg.fast_path_eligible() { " fast" } else { "" },
        if cfg.arg_buffer_launcher { " argbuffer" } else { "" },
        if cfg.grid_launcher { " grid" } else { "" },
    );
    if cfg.dynamic_local_size {
        println!("  local size       dynamic");
    } else {
        println!("  local size       {:?}", cfg.local_size);
    }
    println!("  spmd             {}", cfg.spmd);
    println!("  alloca locals    {}", cfg.alloca_locals);
    println!("  zero offset      {}", cfg.assume_zero_global_offset);
    println!("  device printf    {}", cfg.device_side_printf);
    println!(
        "  subgroup sizes   {}",
        if sizes.is_empty() { "none".to_string() } else { sizes.join(", ") }
    );
}
