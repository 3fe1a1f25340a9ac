use super::context::*;
use super::layout::*;
use super::launcher::*;
use super::privatize::*;
use super::*;
use crate::ir::builder::FnBuilder;
use crate::ir::{walk, BinOp, Handle, Inst, Module, Operand, Param, Type};

fn store_global_id(b: &mut FnBuilder) {
    // out[gid] = gid, gid = group_id * local_size + local_id
    let base = b.bin(
        BinOp::Mul,
        Operand::handle(Handle::GroupId, 0),
        Operand::handle(Handle::LocalSize, 0),
    );
    let gid = b.bin(
        BinOp::Add,
        Operand::Reg(base),
        Operand::handle(Handle::LocalId, 0),
    );
    let offset = b.bin(BinOp::Mul, Operand::Reg(gid), Operand::Imm(8));
    let slot = b.bin(BinOp::Add, Operand::Param(0), Operand::Reg(offset));
    b.store(Type::I64, Operand::Reg(slot), 0, Operand::Reg(gid));
}

fn simple_module() -> Module {
    let mut b = FnBuilder::new();
    store_global_id(&mut b);
    b.ret();
    let mut module = Module::new("simple");
    module.handles.extend([Handle::LocalId, Handle::GroupId, Handle::LocalSize]);
    module.add(Function::kernel(
        "fill",
        vec![Param::new("out", Type::Ptr(1))],
        b.finish(),
    ));
    module
}

fn function_names(module: &Module) -> Vec<&str> {
    module.functions.iter().map(|f| f.name.as_str()).collect()
}

// ─── Context ───────────────────────────────────────────────────────

#[test]
fn test_context_layout_64() {
    let cfg = DeviceConfig::cpu();
    let layout = ContextLayout::new(&cfg);
    assert_eq!(layout.offset(ContextField::WorkDim, 0), 0);
    assert_eq!(layout.offset(ContextField::NumGroups, 0), 8);
    assert_eq!(layout.offset(ContextField::GlobalOffset, 0), 32);
    assert_eq!(layout.offset(ContextField::LocalSize, 2), 72);
    assert_eq!(layout.offset(ContextField::GroupId, 0), 80);
    assert_eq!(layout.offset(ContextField::PrintfBuffer, 0), 104);
    assert_eq!(layout.offset(ContextField::PrintfBufferPosition, 0), 112);
    assert_eq!(layout.offset(ContextField::PrintfBufferCapacity, 0), 120);
    assert_eq!(layout.size(), 128);
    assert_eq!(layout.align(), 8);
}

#[test]
fn test_context_layout_32() {
    let cfg = DeviceConfig::accel();
    let layout = ContextLayout::new(&cfg);
    assert_eq!(layout.offset(ContextField::NumGroups, 0), 4);
    assert_eq!(layout.offset(ContextField::LocalSize, 0), 28);
    assert_eq!(layout.offset(ContextField::GroupId, 1), 44);
    assert_eq!(layout.offset(ContextField::PrintfBufferCapacity, 0), 60);
    assert_eq!(layout.size(), 64);
    assert_eq!(*layout.field_type(ContextField::LocalSize), Type::I32);
}

#[test]
fn test_context_encode_read_back() {
    let cfg = DeviceConfig::cpu();
    let layout = ContextLayout::new(&cfg);
    let mut values = ContextValues::launch([4, 2, 1], [3, 1, 1]);
    values.group_id = [2, 0, 0];
    assert_eq!(values.work_dim, 2);
    let bytes = layout.encode(&values);
    assert_eq!(bytes.len(), 128);
    assert_eq!(layout.read(&bytes, ContextField::WorkDim, 0), 2);
    assert_eq!(layout.read(&bytes, ContextField::LocalSize, 1), 2);
    assert_eq!(layout.read(&bytes, ContextField::NumGroups, 0), 3);
    assert_eq!(layout.read(&bytes, ContextField::GroupId, 0), 2);
}

#[test]
fn test_context_load_carries_range() {
    let cfg = DeviceConfig::cpu();
    let layout = ContextLayout::new(&cfg);
    let mut b = FnBuilder::new();
    create_load_from_context(&mut b, &cfg, &layout, Operand::Param(0), ContextField::LocalSize, 1);
    create_load_from_context(&mut b, &cfg, &layout, Operand::Param(0), ContextField::PrintfBuffer, 0);
    let insts = b.finish();
    assert!(matches!(
        &insts[0],
        Inst::Load { offset: 64, range: Some(r), ty: Type::I64, .. } if r.lo == 1 && r.hi == 4097
    ));
    assert!(matches!(&insts[1], Inst::Load { range: None, ty: Type::Ptr(1), .. }));
}

#[test]
fn test_replace_placeholders_in_nested_loops() {
    let mut b = FnBuilder::new();
    let outer = b.begin_loop(Operand::Imm(2));
    let inner = b.begin_loop(Operand::Imm(3));
    let ph = add_placeholder(&mut b, "_local_id_x");
    b.call("use", vec![Operand::Reg(ph)]);
    b.end_loop();
    b.end_loop();
    let mut insts = b.finish();
    let map = [(ph, Operand::Reg(inner))].into_iter().collect();
    replace_placeholders(&mut insts, &map);

    let mut placeholders = 0;
    let mut args = Vec::new();
    walk(&insts, &mut |inst| match inst {
        Inst::Placeholder { .. } => placeholders += 1,
        Inst::Call { args: a, .. } => args.extend(a.clone()),
        _ => {}
    });
    assert_eq!(placeholders, 0);
    assert_eq!(args, vec![Operand::Reg(inner)]);
    assert_ne!(outer, inner);
}

// ─── Classification ────────────────────────────────────────────────

#[test]
fn test_kernel_to_process() {
    let mut module = simple_module();
    let kernel = module.get("fill").unwrap().clone();
    assert!(classify::is_kernel_to_process(&kernel, &module));
    module.add(Function::new("_wl_fill_workgroup", vec![], vec![]));
    assert!(!classify::is_kernel_to_process(&kernel, &module));
    let helper = Function::new("helper", vec![], vec![]);
    assert!(!classify::is_kernel_to_process(&helper, &module));
}

#[test]
fn test_barrier_found_through_helpers() {
    let mut module = simple_module();
    module.add(Function::new("sync", vec![], vec![Inst::Barrier]));
    module.add(Function::new(
        "middle",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "sync".into(),
            args: vec![],
        }],
    ));
    module.add(Function::kernel(
        "reduce",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "middle".into(),
            args: vec![],
        }],
    ));
    module.add(Function::declaration("runtime_fn", vec![]));
    module.add(Function::kernel(
        "plain",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "runtime_fn".into(),
            args: vec![],
        }],
    ));
    let cg = CallGraph::build(&module);
    assert!(classify::has_workgroup_barriers(module.get("reduce").unwrap(), &module, &cg));
    assert!(!classify::has_workgroup_barriers(module.get("plain").unwrap(), &module, &cg));
    assert!(!classify::has_workgroup_barriers(module.get("fill").unwrap(), &module, &cg));

    let mut shaped = module.get("fill").unwrap().clone();
    shaped.attrs.workgroup_body = true;
    assert!(classify::has_workgroup_barriers(&shaped, &module, &cg));
}

// ─── Privatization ─────────────────────────────────────────────────

#[test]
fn test_derive_body_signature_and_loads() {
    let cfg = DeviceConfig::cpu();
    let layout = ContextLayout::new(&cfg);
    let module = simple_module();
    let kernel = module.get("fill").unwrap();
    let body = derive_body(kernel, &cfg, &layout, BodyFlavor::Dynamic, false).unwrap();

    assert_eq!(body.name, "_wl_fill_body");
    assert!(!body.attrs.kernel);
    assert_eq!(body.attrs.derived_from.as_deref(), Some("fill"));
    let names: Vec<_> = body.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["out", "_context", "_local_id_x", "_local_id_y", "_local_id_z"]
    );
    assert!(body.handle_refs().is_empty());
    // group_id and local_size come from the context, in entry order.
    let loads: Vec<u64> = body
        .insts()
        .iter()
        .filter_map(|inst| match inst {
            Inst::Load {
                ptr: Operand::Param(1),
                offset,
                ..
            } => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(loads, vec![80, 56]);
    // The kernel itself is untouched.
    assert_eq!(kernel.handle_refs().len(), 3);
}

#[test]
fn test_fixed_body_folds_local_size() {
    let cfg = DeviceConfig::accel();
    let layout = ContextLayout::new(&cfg);
    let module = simple_module();
    let kernel = module.get("fill").unwrap();
    let body = derive_body(kernel, &cfg, &layout, BodyFlavor::Fixed([4, 1, 1]), false).unwrap();
    assert_eq!(body.name, "_wl_fill_body_fast");
    let mut saw_const = false;
    walk(body.insts(), &mut |inst| {
        if let Inst::Bin {
            op: BinOp::Mul,
            rhs: Operand::Imm(4),
            ..
        } = inst
        {
            saw_const = true;
        }
    });
    assert!(saw_const);
}

#[test]
fn test_handle_dimension_out_of_range() {
    let mut cfg = DeviceConfig::cpu();
    cfg.max_work_item_dims = 2;
    let layout = ContextLayout::new(&cfg);
    let kernel = Function::kernel(
        "k",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "f".into(),
            args: vec![Operand::handle(Handle::GroupId, 2)],
        }],
    );
    let err = derive_body(&kernel, &cfg, &layout, BodyFlavor::Dynamic, false).unwrap_err();
    assert!(err.message.contains("_group_id[2]"));
}

#[test]
fn test_local_id_in_workgroup_body_is_malformed() {
    let cfg = DeviceConfig::cpu();
    let layout = ContextLayout::new(&cfg);
    let module = simple_module();
    let err = derive_body(module.get("fill").unwrap(), &cfg, &layout, BodyFlavor::Dynamic, true)
        .unwrap_err();
    assert!(err.message.contains("_local_id"));
}

#[test]
fn test_privatize_globals_counts_rewrites() {
    let mut func = Function::new(
        "f",
        vec![],
        vec![
            Inst::Call {
                dst: None,
                callee: "g".into(),
                args: vec![
                    Operand::handle(Handle::WorkDim, 0),
                    Operand::handle(Handle::WorkDim, 0),
                    Operand::handle(Handle::GroupId, 0),
                ],
            },
        ],
    );
    let values = [(
        crate::ir::HandleRef {
            kind: Handle::WorkDim,
            dim: 0,
        },
        Operand::Imm(3),
    )];
    assert_eq!(privatize_globals(&mut func, &values), 2);
    assert_eq!(func.handle_refs().len(), 1);
}

// ─── Argument buffer layout ────────────────────────────────────────

#[test]
fn test_layout_int_then_pointer() {
    let cfg = DeviceConfig::cpu();
    let kernel = Function::kernel(
        "k",
        vec![Param::new("n", Type::I32), Param::new("p", Type::Ptr(1))],
        vec![],
    );
    let layout = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    let slots: Vec<(u64, u64)> = layout.slots.iter().map(|s| (s.offset, s.size)).collect();
    assert_eq!(slots, vec![(0, 4), (8, 8)]);
    assert_eq!(layout.size, 16);
    assert_eq!(layout.align, 8);
}

#[test]
fn test_layout_byval_and_locals() {
    let cfg = DeviceConfig::accel();
    let kernel = Function::kernel(
        "k",
        vec![
            Param::new("c", Type::I8),
            Param::by_value("s", Type::Struct(vec![Type::I16, Type::I32])),
            Param::new("scratch", Type::Ptr(3)),
        ],
        vec![],
    );
    let layout = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    assert_eq!(layout.slots[1].offset, 4);
    assert_eq!(layout.slots[1].size, 8);
    assert_eq!(layout.slots[1].kind, SlotKind::ByValue);
    assert_eq!(layout.slots[2].offset, 12);
    assert!(layout.slots[2].is_pointer_to_local());
    assert_eq!(
        layout.slots[2].kind,
        SlotKind::Local {
            launcher_allocates: true
        }
    );
    insta::assert_snapshot!(layout.to_string(), @r###"
    k: 16 bytes, align 4
      arg0 @0 size 1 align 1 scalar
      arg1 @4 size 8 align 4 byval
      arg2 @12 size 4 align 4 local (size)
    "###);
}

#[test]
fn test_layout_is_deterministic() {
    let cfg = DeviceConfig::cpu();
    let kernel = Function::kernel(
        "k",
        vec![
            Param::new("a", Type::I16),
            Param::new("b", Type::F64),
            Param::new("c", Type::I8),
        ],
        vec![],
    );
    let first = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    let second = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    assert_eq!(first, second);
    for pair in first.slots.windows(2) {
        assert!(pair[0].offset + pair[0].size <= pair[1].offset);
    }
    for slot in &first.slots {
        assert_eq!(slot.offset % slot.align, 0);
    }
}

#[test]
fn test_layout_pack() {
    let cfg = DeviceConfig::cpu();
    let kernel = Function::kernel(
        "k",
        vec![Param::new("n", Type::I32), Param::new("m", Type::I64)],
        vec![],
    );
    let layout = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    let buffer = layout
        .pack(&[7u32.to_le_bytes().as_slice(), 9u64.to_le_bytes().as_slice()])
        .unwrap();
    assert_eq!(buffer.len(), 16);
    assert_eq!(buffer[0], 7);
    assert_eq!(buffer[8], 9);
    assert!(layout.pack(&[7u32.to_le_bytes().as_slice()]).is_err());
    assert!(layout
        .pack(&[[0u8; 2].as_slice(), 9u64.to_le_bytes().as_slice()])
        .is_err());
}

#[test]
fn test_layout_cache_detects_disagreement() {
    let cfg = DeviceConfig::cpu();
    let kernel = Function::kernel(
        "k",
        vec![Param::new("n", Type::I32), Param::new("p", Type::Ptr(1))],
        vec![],
    );
    let layout = ArgBufferLayout::compute(&kernel, &cfg).unwrap();
    let mut cache = LayoutCache::new();
    cache.record(layout.clone()).unwrap();
    cache.record(layout.clone()).unwrap();
    assert_eq!(cache.len(), 1);

    let mut tampered = layout.clone();
    tampered.slots[1].offset = 4;
    let err = cache.check(&tampered).unwrap_err();
    assert!(err.message.contains("disagrees"));
    assert!(err.notes[0].contains("arg1"));

    // A changed signature replaces the entry.
    let widened = Function::kernel(
        "k",
        vec![Param::new("n", Type::I64), Param::new("p", Type::Ptr(1))],
        vec![],
    );
    let relaid = ArgBufferLayout::compute(&widened, &cfg).unwrap();
    assert_ne!(relaid.fingerprint, layout.fingerprint);
    cache.record(relaid.clone()).unwrap();
    assert_eq!(cache.get("k"), Some(&relaid));
}

#[test]
fn test_layout_cache_lock_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layouts.lock.json");
    let cfg = DeviceConfig::accel();
    let kernel = Function::kernel("k", vec![Param::new("p", Type::Ptr(1))], vec![]);
    let mut cache = LayoutCache::load_or_default(&path).unwrap();
    assert!(cache.is_empty());
    cache
        .record(ArgBufferLayout::compute(&kernel, &cfg).unwrap())
        .unwrap();
    cache.save(&path).unwrap();
    assert_eq!(LayoutCache::load(&path).unwrap(), cache);

    std::fs::write(&path, "{ nope").unwrap();
    assert!(LayoutCache::load(&path).unwrap_err().message.contains("invalid layout lock"));
}

#[test]
fn test_fingerprint_depends_on_device() {
    let kernel = Function::kernel("k", vec![Param::new("p", Type::Ptr(1))], vec![]);
    assert_ne!(
        fingerprint(&kernel, &DeviceConfig::cpu()),
        fingerprint(&kernel, &DeviceConfig::accel())
    );
}

// ─── Launchers ─────────────────────────────────────────────────────

#[test]
fn test_subgroup_size_validation() {
    let cfg = DeviceConfig::cpu();
    let mut kernel = Function::kernel("k", vec![], vec![]);
    assert_eq!(required_subgroup_size(&kernel, &cfg).unwrap(), None);
    kernel.attrs.reqd_subgroup_size = Some(16);
    assert_eq!(required_subgroup_size(&kernel, &cfg).unwrap(), Some(16));
    kernel.attrs.reqd_subgroup_size = Some(32);
    let err = required_subgroup_size(&kernel, &cfg).unwrap_err();
    assert_eq!(err.notes, vec!["supported subgroup sizes: 8, 16".to_string()]);
    let accel = DeviceConfig::accel();
    let err = required_subgroup_size(&kernel, &accel).unwrap_err();
    assert_eq!(err.notes, vec!["supported subgroup sizes: none".to_string()]);
}

#[test]
fn test_fixed_local_size_limits() {
    let cfg = DeviceConfig::accel();
    let mut kernel = Function::kernel("k", vec![], vec![]);
    assert_eq!(fixed_local_size(&kernel, &cfg).unwrap(), [4, 1, 1]);
    kernel.attrs.reqd_work_group_size = Some([8, 8, 1]);
    assert_eq!(fixed_local_size(&kernel, &cfg).unwrap(), [8, 8, 1]);
    kernel.attrs.reqd_work_group_size = Some([128, 1, 1]);
    assert!(fixed_local_size(&kernel, &cfg).is_err());
    kernel.attrs.reqd_work_group_size = Some([4, 0, 1]);
    assert!(fixed_local_size(&kernel, &cfg).is_err());
}

#[test]
fn test_default_launcher_shape() {
    let cfg = DeviceConfig::cpu();
    let mut module = simple_module();
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    assert!(report.skipped.is_empty());
    let launcher = module.get("_wl_fill_workgroup").unwrap();
    insta::assert_snapshot!(launcher.to_string(), @r###"
    launcher(default) @_wl_fill_workgroup(ptr addrspace(1) %out, ptr %_context) {
      %r0 = load i64, %arg1 + 56 !range [1, 4097)
      %r1 = load i64, %arg1 + 64 !range [1, 4097)
      %r2 = load i64, %arg1 + 72 !range [1, 4097)
      loop %r3 < %r2 {
        loop %r4 < %r1 {
          loop %r5 < %r0 {
            call @_wl_fill_body(%arg0, %arg1, %r5, %r4, %r3)
          }
        }
      }
      ret
    }
    "###);
}

#[test]
fn test_cpu_emits_default_only() {
    let cfg = DeviceConfig::cpu();
    let mut module = simple_module();
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    let set = report.get("fill").unwrap();
    assert!(!set.fast_eligible());
    assert!(set.arg_buffer.is_none() && set.grid.is_none());
    assert_eq!(set.entry(), "_wl_fill_workgroup");
    assert_eq!(
        function_names(&module),
        vec!["fill", "_wl_fill_body", "_wl_fill_workgroup"]
    );
}

#[test]
fn test_accel_emits_every_flavour() {
    let cfg = DeviceConfig::accel();
    let mut module = simple_module();
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    let set = report.get("fill").unwrap();
    assert!(set.fast_eligible());
    assert_eq!(set.entry(), "_wl_fill_workgroup_argbuffer");
    assert_eq!(
        set.launchers().collect::<Vec<_>>(),
        vec![
            "_wl_fill_workgroup",
            "_wl_fill_workgroup_fast",
            "_wl_fill_workgroup_argbuffer",
            "_wl_fill_grid",
        ]
    );
    let argbuf = module.get("_wl_fill_workgroup_argbuffer").unwrap();
    assert_eq!(argbuf.params.len(), 2);
    assert!(argbuf.callees().contains("_wl_fill_workgroup_fast"));
    let grid = module.get("_wl_fill_grid").unwrap();
    assert_eq!(grid.params, argbuf.params);
    assert!(grid.callees().contains("_wl_fill_workgroup_argbuffer"));
    // Fast launcher: constant bounds, a single x loop.
    let fast = module.get("_wl_fill_workgroup_fast").unwrap();
    let mut bounds = Vec::new();
    walk(fast.insts(), &mut |inst| {
        if let Inst::Loop { bound, .. } = inst {
            bounds.push(bound.clone());
        }
    });
    assert_eq!(bounds, vec![Operand::Imm(4)]);
}

#[test]
fn test_generated_code_reads_no_handles() {
    for cfg in [DeviceConfig::cpu(), DeviceConfig::accel(), DeviceConfig::spmd()] {
        let mut module = simple_module();
        Workgroup::new(&cfg).run_on_module(&mut module);
        for func in &module.functions {
            if func.attrs.derived_from.is_some() {
                assert!(func.handle_refs().is_empty(), "{} on {}", func.name, cfg.name);
            }
        }
    }
}

#[test]
fn test_spmd_launcher_uses_intrinsic() {
    let cfg = DeviceConfig::spmd();
    let mut module = simple_module();
    Workgroup::new(&cfg).run_on_module(&mut module);
    let launcher = module.get("_wl_fill_workgroup").unwrap();
    let mut loops = 0;
    walk(launcher.insts(), &mut |inst| {
        if matches!(inst, Inst::Loop { .. }) {
            loops += 1;
        }
    });
    assert_eq!(loops, 0);
    assert!(launcher.callees().contains(LOCAL_ID_INTRINSIC));
    assert!(module.get(LOCAL_ID_INTRINSIC).unwrap().is_declaration());
}

#[test]
fn test_skip_is_transactional() {
    let cfg = DeviceConfig::cpu();
    let mut module = simple_module();
    let mut bad = Function::kernel(
        "bad",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "f".into(),
            args: vec![Operand::handle(Handle::LocalSize, 5)],
        }],
    );
    bad.attrs.reqd_subgroup_size = Some(8);
    module.add(bad);
    let before = module.functions.len();
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    let skip = report.skipped("bad").unwrap();
    assert_eq!(skip.reason, SkipReason::MalformedKernel);
    assert!(!module.contains("_wl_bad_body"));
    assert!(!module.contains("_wl_bad_workgroup"));
    // fill still got its body and launcher.
    assert_eq!(module.functions.len(), before + 2);
}

#[test]
fn test_dead_handles_removed() {
    let cfg = DeviceConfig::cpu();
    let mut module = simple_module();
    module.handles.insert(Handle::WorkDim);
    Workgroup::new(&cfg).run_on_module(&mut module);
    assert!(module.handles.is_empty());
}

#[test]
fn test_printf_helpers_cloned_once_per_module() {
    let cfg = DeviceConfig::cpu();
    let mut module = Module::new("printing");
    module.add(Function::new(
        "log",
        vec![Param::new("v", Type::I64)],
        vec![Inst::Printf {
            format: "v=%ld".into(),
            args: vec![Operand::Param(0)],
            buffer: None,
        }],
    ));
    for name in ["a", "b"] {
        module.add(Function::kernel(
            name,
            vec![],
            vec![Inst::Call {
                dst: None,
                callee: "log".into(),
                args: vec![Operand::Imm(1)],
            }],
        ));
    }
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    assert_eq!(report.launchers.len(), 2);
    let clones: Vec<_> = module
        .functions
        .iter()
        .filter(|f| f.name == "log.printf")
        .collect();
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].params.len(), 4);
    assert!(matches!(
        &clones[0].insts()[0],
        Inst::Printf { buffer: Some(b), .. } if b[0] == Operand::Param(1)
    ));
    for body in ["_wl_a_body", "_wl_b_body"] {
        let body = module.get(body).unwrap();
        assert!(body.callees().contains("log.printf"));
        assert!(!body.callees().contains("log"));
    }
}

#[test]
fn test_performs_output_through_helpers() {
    let mut module = simple_module();
    module.add(Function::new(
        "log",
        vec![],
        vec![Inst::Printf {
            format: "hi".into(),
            args: vec![],
            buffer: None,
        }],
    ));
    module.add(Function::kernel(
        "chatty",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "log".into(),
            args: vec![],
        }],
    ));
    let cg = CallGraph::build(&module);
    assert!(classify::performs_output(module.get("chatty").unwrap(), &module, &cg));
    assert!(classify::performs_output(module.get("log").unwrap(), &module, &cg));
    assert!(!classify::performs_output(module.get("fill").unwrap(), &module, &cg));
}

#[test]
fn test_printf_clone_reused_by_later_run() {
    let cfg = DeviceConfig::cpu();
    let log_call = |name: &str| {
        Function::kernel(
            name,
            vec![],
            vec![Inst::Call {
                dst: None,
                callee: "log".into(),
                args: vec![Operand::Imm(1)],
            }],
        )
    };
    let mut module = Module::new("printing");
    module.add(Function::new(
        "log",
        vec![Param::new("v", Type::I64)],
        vec![Inst::Printf {
            format: "v=%ld".into(),
            args: vec![Operand::Param(0)],
            buffer: None,
        }],
    ));
    module.add(log_call("a"));
    Workgroup::new(&cfg).run_on_module(&mut module);

    module.add(log_call("b"));
    let report = Workgroup::new(&cfg).run_on_module(&mut module);
    assert!(report.skipped.is_empty());
    assert!(report.get("b").is_some());
    let clones = function_names(&module)
        .into_iter()
        .filter(|n| *n == "log.printf")
        .count();
    assert_eq!(clones, 1);
    assert!(module.get("_wl_b_body").unwrap().callees().contains("log.printf"));
}

#[test]
fn test_layout_rejects_oversized_parameter() {
    let cfg = DeviceConfig::accel();
    let huge = Type::Array(Box::new(Type::I64), 1 << 62);
    let kernel = Function::kernel("k", vec![Param::by_value("big", huge)], vec![]);
    let err = ArgBufferLayout::compute(&kernel, &cfg).unwrap_err();
    assert!(err.message.contains("too large"), "{}", err.message);

    // Each slot fits, the buffer does not.
    let half = Type::Array(Box::new(Type::I8), u64::MAX / 2 + 1);
    let kernel = Function::kernel(
        "k",
        vec![
            Param::by_value("a", half.clone()),
            Param::by_value("b", half),
        ],
        vec![],
    );
    assert!(ArgBufferLayout::compute(&kernel, &cfg).is_err());
}

#[test]
fn test_oversized_parameter_skips_only_its_kernel() {
    let huge = Type::Array(Box::new(Type::I64), 1 << 62);
    let nested = Type::Struct(vec![Type::I32, huge.clone()]);
    for cfg in [DeviceConfig::cpu(), DeviceConfig::accel()] {
        let mut module = simple_module();
        module.add(Function::kernel(
            "big",
            vec![Param::by_value("a", huge.clone())],
            vec![Inst::Return],
        ));
        module.add(Function::kernel(
            "nested",
            vec![Param::by_value("s", nested.clone())],
            vec![Inst::Return],
        ));
        let report = Workgroup::new(&cfg).run_on_module(&mut module);
        for kernel in ["big", "nested"] {
            let skip = report.skipped(kernel).unwrap();
            assert_eq!(skip.reason, SkipReason::MalformedKernel);
            assert!(skip.diagnostic.message.contains("does not fit"));
            assert!(!module.contains(&format!("_wl_{}_body", kernel)));
        }
        assert!(report.get("fill").is_some(), "{}", cfg.name);
    }
}

#[test]
fn test_generated_name_collision_is_malformed() {
    let cfg = DeviceConfig::accel();
    for taken in ["_wl_fill_body", "_wl_fill_body_fast", "_wl_fill_grid"] {
        let mut module = simple_module();
        module.add(Function::new(taken, vec![], vec![Inst::Return]));
        let before = module.clone();
        let report = Workgroup::new(&cfg).run_on_module(&mut module);
        let skip = report.skipped("fill").unwrap();
        assert_eq!(skip.reason, SkipReason::MalformedKernel);
        assert!(skip.diagnostic.message.contains(taken));
        assert_eq!(module, before);
    }
}
