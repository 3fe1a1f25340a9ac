use super::builder::FnBuilder;
use super::callgraph::CallGraph;
use super::*;

#[test]
fn test_type_layout_follows_c_rules() {
    assert_eq!(Type::I32.size(8), 4);
    assert_eq!(Type::Ptr(1).size(8), 8);
    assert_eq!(Type::Ptr(1).size(4), 4);
    let s = Type::Struct(vec![Type::I8, Type::I32, Type::I16]);
    assert_eq!(s.align(8), 4);
    assert_eq!(s.size(8), 12);
    let a = Type::Array(Box::new(Type::F32), 3);
    assert_eq!(a.size(8), 12);
    assert_eq!(a.align(8), 4);
    assert!(a.is_aggregate());
    assert_eq!(Type::Struct(vec![]).size(8), 0);
}

#[test]
fn test_checked_size_overflow() {
    let huge = Type::Array(Box::new(Type::I64), 1 << 62);
    assert_eq!(huge.checked_size(8), None);
    assert_eq!(huge.size(8), u64::MAX);
    let nested = Type::Struct(vec![Type::I8, huge]);
    assert_eq!(nested.checked_size(8), None);
    assert_eq!(Type::Array(Box::new(Type::I32), 3).checked_size(8), Some(12));
    assert_eq!(checked_align_to(u64::MAX, 8), None);
    assert_eq!(checked_align_to(13, 4), Some(16));
}

#[test]
fn test_align_to() {
    assert_eq!(align_to(0, 8), 0);
    assert_eq!(align_to(4, 8), 8);
    assert_eq!(align_to(8, 8), 8);
    assert_eq!(align_to(13, 4), 16);
}

#[test]
fn test_builder_nests_loops() {
    let mut b = FnBuilder::new();
    let z = b.begin_loop(Operand::Imm(2));
    let x = b.begin_loop(Operand::Imm(3));
    b.call("f", vec![Operand::Reg(x), Operand::Reg(z)]);
    b.end_loop();
    b.end_loop();
    b.ret();
    let body = b.finish();
    assert_eq!(body.len(), 2);
    let Inst::Loop { var, body: outer, .. } = &body[0] else {
        panic!("expected a loop, got {:?}", body[0]);
    };
    assert_eq!(*var, z);
    assert!(matches!(&outer[0], Inst::Loop { var, .. } if *var == x));
}

#[test]
fn test_finish_closes_open_loops() {
    let mut b = FnBuilder::starting_at(5);
    let i = b.begin_loop(Operand::Imm(4));
    assert_eq!(i, Reg(5));
    b.call("f", vec![]);
    let body = b.finish();
    assert_eq!(body.len(), 1);
    assert!(matches!(&body[0], Inst::Loop { body, .. } if body.len() == 1));
}

#[test]
fn test_function_queries() {
    let mut b = FnBuilder::new();
    let v = b.load(Type::I64, Operand::Param(0), 0, None);
    let i = b.begin_loop(Operand::handle(Handle::LocalSize, 0));
    b.call("helper", vec![Operand::Reg(v), Operand::Reg(i)]);
    b.call("other", vec![Operand::handle(Handle::GroupId, 1)]);
    b.end_loop();
    let func = Function::kernel("k", vec![Param::new("p", Type::Ptr(1))], b.finish());

    assert_eq!(func.reg_count(), 2);
    assert_eq!(
        func.callees().into_iter().collect::<Vec<_>>(),
        vec!["helper", "other"]
    );
    let refs: Vec<_> = func.handle_refs().into_iter().collect();
    assert_eq!(
        refs,
        vec![
            HandleRef {
                kind: Handle::GroupId,
                dim: 1
            },
            HandleRef {
                kind: Handle::LocalSize,
                dim: 0
            },
        ]
    );
    assert!(!func.is_declaration());
    assert!(Function::declaration("d", vec![]).is_declaration());
}

#[test]
fn test_launcher_symbols() {
    assert_eq!(LauncherKind::Default.symbol("vadd"), "_wl_vadd_workgroup");
    assert_eq!(LauncherKind::Fast.symbol("vadd"), "_wl_vadd_workgroup_fast");
    assert_eq!(
        LauncherKind::ArgBuffer.symbol("vadd"),
        "_wl_vadd_workgroup_argbuffer"
    );
    assert_eq!(LauncherKind::Grid.symbol("vadd"), "_wl_vadd_grid");
}

#[test]
fn test_module_json_round_trip() {
    let mut module = Module::new("m");
    module.handles.insert(Handle::LocalId);
    let mut k = Function::kernel(
        "k",
        vec![
            Param::new("n", Type::I32),
            Param::by_value("s", Type::Struct(vec![Type::I32, Type::F32])),
        ],
        vec![Inst::Barrier, Inst::Return],
    );
    k.attrs.reqd_subgroup_size = Some(16);
    module.add(k);
    module.add(Function::declaration("ext", vec![]));

    let json = module.to_json();
    assert_eq!(Module::from_json(&json).unwrap(), module);
}

#[test]
fn test_module_json_minimal() {
    let source = r#"{
  "name": "tiny",
  "handles": ["local_id"],
  "functions": [
    {
      "name": "k",
      "params": [{"name": "out", "ty": {"ptr": 1}}],
      "body": [
        {"store": {"ty": "i64", "ptr": {"param": 0},
                   "value": {"handle": {"kind": "local_id"}}}},
        "return"
      ],
      "attrs": {"kernel": true}
    }
  ]
}"#;
    let module = Module::from_json(source).unwrap();
    let k = module.get("k").unwrap();
    assert!(k.attrs.kernel);
    assert_eq!(k.params[0].ty, Type::Ptr(1));
    assert_eq!(k.handle_refs().len(), 1);
}

#[test]
fn test_module_json_error_has_span() {
    let source = "{\n  \"name\": \"m\",\n  \"functions\": 3\n}";
    let err = Module::from_json(source).unwrap_err();
    assert!(err.message.starts_with("invalid module"));
    let line_three = source.find("  \"functions\"").unwrap() as u32;
    assert!(err.span.start >= line_three);
}

#[test]
fn test_display() {
    let mut b = FnBuilder::new();
    let size = b.load(
        Type::I64,
        Operand::Param(1),
        8,
        Some(ValueRange { lo: 1, hi: 4097 }),
    );
    let x = b.begin_loop(Operand::Reg(size));
    b.call("body", vec![Operand::Param(0), Operand::Reg(x)]);
    b.end_loop();
    b.ret();
    let mut f = Function::new(
        "_wl_k_workgroup",
        vec![Param::new("a", Type::I32), Param::new("_context", Type::Ptr(0))],
        b.finish(),
    );
    f.attrs.launcher = Some(LauncherKind::Default);
    insta::assert_snapshot!(f.to_string(), @r###"
    launcher(default) @_wl_k_workgroup(i32 %a, ptr %_context) {
      %r0 = load i64, %arg1 + 8 !range [1, 4097)
      loop %r1 < %r0 {
        call @body(%arg0, %r1)
      }
      ret
    }
    "###);
}

#[test]
fn test_callgraph_reachability() {
    let mut module = Module::new("m");
    module.add(Function::kernel(
        "k",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "a".into(),
            args: vec![],
        }],
    ));
    module.add(Function::new(
        "a",
        vec![],
        vec![Inst::Call {
            dst: None,
            callee: "b".into(),
            args: vec![],
        }],
    ));
    module.add(Function::new("b", vec![], vec![Inst::Barrier]));
    module.add(Function::new("unrelated", vec![], vec![]));

    let cg = CallGraph::build(&module);
    let reach: Vec<_> = cg.reachable_from("k").into_iter().collect();
    assert_eq!(reach, vec!["a", "b", "k"]);

    let barrier = cg.reaching(&module, |f| f.insts().contains(&Inst::Barrier));
    assert!(barrier.contains("k") && barrier.contains("a") && barrier.contains("b"));
    assert!(!barrier.contains("unrelated"));
    assert!(!cg.is_recursive());
}

#[test]
fn test_callgraph_unknown_callee_and_recursion() {
    let mut module = Module::new("m");
    module.add(Function::new(
        "r",
        vec![],
        vec![
            Inst::Call {
                dst: None,
                callee: "r".into(),
                args: vec![],
            },
            Inst::Call {
                dst: None,
                callee: "extern_only".into(),
                args: vec![],
            },
        ],
    ));
    let cg = CallGraph::build(&module);
    assert!(cg.reachable_from("r").contains("extern_only"));
    assert!(cg.is_recursive());
    assert!(cg.reachable_from("nope").is_empty());
}
