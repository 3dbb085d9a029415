//! End-to-end interpreter scenarios: dispatch, override resolution, tick
//! budgets, error actions, object error-handlers, and the scheduler.

use cmm_config::Config;
use cmm_core::ident::{self, Sym};
use cmm_core::{Dbref, List, Op, Value};
use cmm_db::Db;
use cmm_net::Bridge;
use cmm_vm::{MethodBuilder, Vm};
use tempfile::TempDir;

const SYSTEM: Dbref = Dbref(0);

fn world() -> (Vm, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.dirs.binary = dir.path().join("binary");
    config.dirs.backup = dir.path().join("backup");
    config.dirs.textdump = dir.path().join("textdump");
    let mut db = Db::open(&config).expect("open");
    let system = db.create(List::new()).expect("system object");
    assert_eq!(system, SYSTEM);
    let root = db.create(List::new()).expect("root object");
    assert_eq!(root.0, 1);
    (Vm::new(db, Bridge::new(), &config), dir)
}

fn sym(name: &str) -> Sym {
    ident::get(name)
}

/// Declares `result` on `obj` so methods can record what they computed.
fn declare_result(vm: &mut Vm, obj: Dbref) -> Sym {
    let result = sym("result");
    vm.db
        .fetch(obj)
        .expect("fetch")
        .expect("exists")
        .add_param(result);
    result
}

fn result_of(vm: &mut Vm, obj: Dbref, class: Dbref) -> Value {
    let result = sym("result");
    let value = vm
        .db
        .retrieve_var(obj, class, result)
        .expect("retrieve")
        .expect("declared");
    ident::discard(result);
    value
}

fn install(vm: &mut Vm, obj: Dbref, name: &str, builder: impl FnOnce(MethodBuilder) -> MethodBuilder) {
    let method = {
        let object = vm.db.fetch(obj).expect("fetch").expect("exists");
        builder(MethodBuilder::new(object)).build(obj)
    };
    let name = sym(name);
    vm.db.add_method(obj, name, method).expect("add method");
    ident::discard(name);
}

fn run(vm: &mut Vm, obj: Dbref, message: &str) -> Option<Sym> {
    let message = sym(message);
    let outcome = vm.task(None, obj, message, vec![]).expect("task");
    ident::discard(message);
    outcome
}

#[test]
fn create_and_reparent_through_operators() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);
    let before_top = vm.db.db_top();

    // result = create([#0]);
    install(&mut vm, SYSTEM, "boot", |b| {
        b.op(Op::StartArgs)
            .op(Op::StartArgs)
            .op_with(Op::DbrefLit, &[0])
            .op(Op::ListBuild)
            .op(Op::Create)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });
    assert_eq!(run(&mut vm, SYSTEM, "boot"), None);

    let created = match result_of(&mut vm, SYSTEM, SYSTEM) {
        Value::Dbref(dbref) => dbref,
        other => panic!("expected a dbref, got {other:?}"),
    };
    assert_eq!(created.0, before_top);
    let children = vm
        .db
        .fetch(SYSTEM)
        .expect("fetch")
        .expect("exists")
        .children
        .clone();
    assert!(children.iter().any(|v| v.as_dbref() == Some(created)));

    // chparents(created, [#1]) moves it under the root object.
    install(&mut vm, SYSTEM, "move", |b| {
        b.op(Op::StartArgs)
            .op_with(Op::DbrefLit, &[created.0])
            .op(Op::StartArgs)
            .op_with(Op::DbrefLit, &[1])
            .op(Op::ListBuild)
            .op(Op::Chparents)
            .op(Op::Pop)
            .op(Op::Return)
    });
    assert_eq!(run(&mut vm, SYSTEM, "move"), None);

    let system_children = vm
        .db
        .fetch(SYSTEM)
        .expect("fetch")
        .expect("exists")
        .children
        .clone();
    assert!(!system_children.iter().any(|v| v.as_dbref() == Some(created)));
    let root_children = vm
        .db
        .fetch(Dbref(1))
        .expect("fetch")
        .expect("exists")
        .children
        .clone();
    assert!(root_children.iter().any(|v| v.as_dbref() == Some(created)));

    let ancestors = vm.db.ancestors(created).expect("ancestors");
    let order: Vec<i64> = ancestors
        .iter()
        .map(|v| v.as_dbref().expect("dbrefs").0)
        .collect();
    assert_eq!(order, vec![1, created.0]);
}

#[test]
fn resolution_respects_override_blocking_and_pass() {
    let (mut vm, _dir) = world();
    let a = vm.db.create(List::new()).expect("a");
    let b = vm.db.create(List::new()).expect("b");
    let c = vm
        .db
        .create(List::from_vec(vec![Value::Dbref(a), Value::Dbref(b)]))
        .expect("c");

    // Both parents define m; each stores its own marker on c through its
    // own class variable.
    let ra = sym("ra");
    vm.db.fetch(a).expect("f").expect("e").add_param(ra);
    let rb = sym("rb");
    vm.db.fetch(b).expect("f").expect("e").add_param(rb);

    install(&mut vm, a, "m", |builder| {
        builder
            .push_int(11)
            .ident_op(Op::SetObjVar, "ra")
            .op(Op::Pop)
            .op(Op::Return)
    });
    install(&mut vm, b, "m", |builder| {
        builder
            .non_overridable()
            .push_int(22)
            .ident_op(Op::SetObjVar, "rb")
            .op(Op::Pop)
            .op(Op::Return)
    });

    // b's m is non-overridable, so c.m() runs it.
    assert_eq!(run(&mut vm, c, "m"), None);
    assert_eq!(
        vm.db.retrieve_var(c, b, rb).expect("ok"),
        Some(Value::Int(22))
    );
    assert_eq!(
        vm.db.retrieve_var(c, a, ra).expect("ok"),
        Some(Value::Int(0))
    );

    // Removing b.m leaves a.m; the stamped method cache must notice.
    let m = sym("m");
    assert!(vm.db.del_method(b, m).expect("del"));
    ident::discard(m);
    assert_eq!(run(&mut vm, c, "m"), None);
    assert_eq!(
        vm.db.retrieve_var(c, a, ra).expect("ok"),
        Some(Value::Int(11))
    );

    ident::discard(ra);
    ident::discard(rb);
}

#[test]
fn tick_budget_terminates_runaway_loops() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // loop() { while (1) {} }
    install(&mut vm, SYSTEM, "spin", |b| {
        // 0: ONE; 1: WHILE 7 0; 4: END 0; 6: RETURN
        b.push_int(1)
            .op_with(Op::While, &[7, 0])
            .op_with(Op::End, &[0])
            .op(Op::Return)
    });

    // guard() { catch any { .spin(); } with { result = error(); } }
    install(&mut vm, SYSTEM, "guard", |b| {
        // 0: CATCH 11 -1
        // 3: DBREF 0; 5: START_ARGS; 6: MESSAGE spin; 8: POP
        // 9: CATCH_END 17
        // 11: START_ARGS; 12: error; 13: SET_OBJ_VAR result; 15: POP;
        // 16: HANDLER_END; 17: RETURN
        b.op_with(Op::Catch, &[11, -1])
            .op_with(Op::DbrefLit, &[0])
            .op(Op::StartArgs)
            .message("spin")
            .op(Op::Pop)
            .op_with(Op::CatchEnd, &[17])
            .op(Op::StartArgs)
            .op(Op::ErrorFunc)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::HandlerEnd)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "guard"), None);
    let caught = result_of(&mut vm, SYSTEM, SYSTEM);
    assert_eq!(caught, Value::error(ident::ids().methoderr));
}

#[test]
fn traceback_names_the_spinning_method() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    install(&mut vm, SYSTEM, "spin", |b| {
        b.push_int(1)
            .op_with(Op::While, &[7, 0])
            .op_with(Op::End, &[0])
            .op(Op::Return)
    });
    // Store traceback() instead of error().
    install(&mut vm, SYSTEM, "guard", |b| {
        b.op_with(Op::Catch, &[12, -1])
            .op_with(Op::DbrefLit, &[0])
            .op(Op::StartArgs)
            .message("spin")
            .op(Op::Pop)
            .op_with(Op::CatchEnd, &[17])
            .op(Op::StartArgs)
            .op(Op::TracebackOp)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::HandlerEnd)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "guard"), None);
    let stored = result_of(&mut vm, SYSTEM, SYSTEM);
    let traceback = stored.as_list().expect("traceback list").clone();
    // [[error, explanation, arg], [location...], frame rows...]
    assert!(traceback.len() >= 3);
    let condition = traceback.get(0).as_list().expect("condition row");
    assert_eq!(
        condition.get(0),
        &Value::error(ident::ids().methoderr)
    );
    assert_eq!(condition.get(1), &Value::Str("Out of ticks".into()));
    // The interpreter row carries the spinning method's name.
    let location = traceback.get(1).as_list().expect("location row");
    assert_eq!(
        location.get(0),
        &Value::symbol(ident::ids().interpreter)
    );
    let spin = sym("spin");
    assert_eq!(location.get(1), &Value::symbol(spin));
    ident::discard(spin);
}

#[test]
fn suspend_resume_round_trips_the_value() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // f() { result = suspend(); }
    install(&mut vm, SYSTEM, "f", |b| {
        b.op(Op::StartArgs)
            .op(Op::SuspendOp)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });
    // r() { resume(1, 42); }
    install(&mut vm, SYSTEM, "r", |b| {
        b.op(Op::StartArgs)
            .push_int(1)
            .op_with(Op::IntLit, &[42])
            .op(Op::ResumeOp)
            .op(Op::Pop)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "f"), None);
    // Still waiting: nothing stored yet.
    assert_eq!(result_of(&mut vm, SYSTEM, SYSTEM), Value::Int(0));

    assert_eq!(run(&mut vm, SYSTEM, "r"), None);
    assert_eq!(result_of(&mut vm, SYSTEM, SYSTEM), Value::Int(42));
}

#[test]
fn cancel_unpins_and_unlists_the_task() {
    let (mut vm, _dir) = world();
    install(&mut vm, SYSTEM, "f", |b| {
        b.op(Op::StartArgs)
            .op(Op::SuspendOp)
            .op(Op::Pop)
            .op(Op::Return)
    });
    // c() { cancel(1); }
    install(&mut vm, SYSTEM, "c", |b| {
        b.op(Op::StartArgs)
            .push_int(1)
            .op(Op::CancelOp)
            .op(Op::Pop)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "f"), None);
    assert_eq!(vm.db.pins(SYSTEM), 2);

    assert_eq!(run(&mut vm, SYSTEM, "c"), None);
    assert_eq!(vm.db.pins(SYSTEM), 0);
}

#[test]
fn critical_recovers_with_the_error_value() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // result = critical(1 / 0);
    install(&mut vm, SYSTEM, "m", |b| {
        // 0: CRITICAL 6; 2: ONE; 3: ZERO; 4: /; 5: CRITICAL_END;
        // 6: SET_OBJ_VAR result; 8: POP; 9: RETURN
        b.op_with(Op::Critical, &[6])
            .push_int(1)
            .push_int(0)
            .op(Op::Divide)
            .op(Op::CriticalEnd)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });
    assert_eq!(run(&mut vm, SYSTEM, "m"), None);
    assert_eq!(
        result_of(&mut vm, SYSTEM, SYSTEM),
        Value::error(ident::ids().div)
    );
}

#[test]
fn object_error_handler_replaces_the_operand() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);
    let class = vm.db.create(List::new()).expect("class");

    // class.catch(suberror, traceback, offender) { return 0; }
    install(&mut vm, class, "catch", |b| {
        b.arg("suberror")
            .arg("traceback")
            .arg("offender")
            .push_int(0)
            .op(Op::ReturnExpr)
    });

    // result = <class, 0> + 5;  -- the frob cannot add, its class's
    // handler replaces it with 0, and the opcode restarts.
    install(&mut vm, SYSTEM, "m", |b| {
        b.op(Op::StartArgs)
            .op_with(Op::DbrefLit, &[class.0])
            .push_int(0)
            .op(Op::FrobBuild)
            .op_with(Op::IntLit, &[5])
            .op(Op::Add)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "m"), None);
    assert_eq!(result_of(&mut vm, SYSTEM, SYSTEM), Value::Int(5));
}

#[test]
fn failing_handler_surfaces_the_original_error() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);
    let class = vm.db.create(List::new()).expect("class");

    // The handler itself blows up with a division.
    install(&mut vm, class, "catch", |b| {
        b.arg("suberror")
            .arg("traceback")
            .arg("offender")
            .push_int(1)
            .push_int(0)
            .op(Op::Divide)
            .op(Op::ReturnExpr)
    });

    // catch any { <class, 0> + 5 } with { result = error(); }
    install(&mut vm, SYSTEM, "m", |b| {
        // 0: CATCH 14 -1
        // 3: START_ARGS; 4: DBREF class; 6: ZERO; 7: FROB;
        // 8: INTEGER 5; 10: +; 11: POP
        // 12: CATCH_END 20
        // 14: START_ARGS; 15: error; 16: SET_OBJ_VAR result; 18: POP;
        // 19: HANDLER_END; 20: RETURN
        b.op_with(Op::Catch, &[14, -1])
            .op(Op::StartArgs)
            .op_with(Op::DbrefLit, &[class.0])
            .push_int(0)
            .op(Op::FrobBuild)
            .op_with(Op::IntLit, &[5])
            .op(Op::Add)
            .op(Op::Pop)
            .op_with(Op::CatchEnd, &[20])
            .op(Op::StartArgs)
            .op(Op::ErrorFunc)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::HandlerEnd)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "m"), None);
    // The intervention failed, so the original type error resumes its
    // propagation and the catch sees it unreplaced.
    assert_eq!(
        result_of(&mut vm, SYSTEM, SYSTEM),
        Value::error(ident::ids().type_)
    );
}

#[test]
fn propagate_preserves_the_error_across_frames() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // inner() { propagate(1 / 0); }
    install(&mut vm, SYSTEM, "inner", |b| {
        b.op_with(Op::Propagate, &[6])
            .push_int(1)
            .push_int(0)
            .op(Op::Divide)
            .op(Op::PropagateEnd)
            .op(Op::Pop)
            .op(Op::Return)
    });
    // outer() { catch any { .inner(); } with { result = error(); } }
    install(&mut vm, SYSTEM, "outer", |b| {
        b.op_with(Op::Catch, &[11, -1])
            .op_with(Op::DbrefLit, &[0])
            .op(Op::StartArgs)
            .message("inner")
            .op(Op::Pop)
            .op_with(Op::CatchEnd, &[17])
            .op(Op::StartArgs)
            .op(Op::ErrorFunc)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::HandlerEnd)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "outer"), None);
    // Without the propagate specifier this would read ~methoderr.
    assert_eq!(
        result_of(&mut vm, SYSTEM, SYSTEM),
        Value::error(ident::ids().div)
    );
}

#[test]
fn pass_reaches_the_next_method_in_order() {
    let (mut vm, _dir) = world();
    let parent = vm.db.create(List::new()).expect("parent");
    let child = vm
        .db
        .create(List::from_vec(vec![Value::Dbref(parent)]))
        .expect("child");
    let marker = sym("marker");
    vm.db.fetch(parent).expect("f").expect("e").add_param(marker);

    install(&mut vm, parent, "m", |b| {
        b.push_int(77)
            .ident_op(Op::SetObjVar, "marker")
            .op(Op::Pop)
            .op(Op::Return)
    });
    // child.m() { pass(); }
    install(&mut vm, child, "m", |b| {
        b.op(Op::StartArgs).op(Op::Pass).op(Op::Pop).op(Op::Return)
    });

    assert_eq!(run(&mut vm, child, "m"), None);
    assert_eq!(
        vm.db.retrieve_var(child, parent, marker).expect("ok"),
        Some(Value::Int(77))
    );
    ident::discard(marker);
}

#[test]
fn rest_arguments_collect_the_excess() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // f(first, [rest]) { result = rest; }
    install(&mut vm, SYSTEM, "f", |b| {
        b.arg("first")
            .rest_arg("rest")
            .op_with(Op::GetLocal, &[1])
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });
    // g() { .f(1, 2, 3); }
    install(&mut vm, SYSTEM, "g", |b| {
        b.op_with(Op::DbrefLit, &[0])
            .op(Op::StartArgs)
            .push_int(1)
            .op_with(Op::IntLit, &[2])
            .op_with(Op::IntLit, &[3])
            .message("f")
            .op(Op::Pop)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "g"), None);
    assert_eq!(
        result_of(&mut vm, SYSTEM, SYSTEM),
        Value::List(List::from_vec(vec![Value::Int(2), Value::Int(3)]))
    );
}

#[test]
fn wrong_argument_counts_report_numargs() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    install(&mut vm, SYSTEM, "two", |b| {
        b.arg("a").arg("b").op(Op::Return)
    });
    // catch any { .two(1); } with { result = error(); }
    install(&mut vm, SYSTEM, "m", |b| {
        b.op_with(Op::Catch, &[12, -1])
            .op_with(Op::DbrefLit, &[0])
            .op(Op::StartArgs)
            .push_int(1)
            .message("two")
            .op(Op::Pop)
            .op_with(Op::CatchEnd, &[18])
            .op(Op::StartArgs)
            .op(Op::ErrorFunc)
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::HandlerEnd)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "m"), None);
    assert_eq!(
        result_of(&mut vm, SYSTEM, SYSTEM),
        Value::error(ident::ids().numargs)
    );
}

#[test]
fn paused_tasks_run_on_the_heartbeat() {
    let (mut vm, _dir) = world();
    declare_result(&mut vm, SYSTEM);

    // f() { pause(); result = 9; }
    install(&mut vm, SYSTEM, "f", |b| {
        b.op(Op::StartArgs)
            .op(Op::PauseOp)
            .op(Op::Pop)
            .op_with(Op::IntLit, &[9])
            .ident_op(Op::SetObjVar, "result")
            .op(Op::Pop)
            .op(Op::Return)
    });

    assert_eq!(run(&mut vm, SYSTEM, "f"), None);
    assert_eq!(result_of(&mut vm, SYSTEM, SYSTEM), Value::Int(0));

    vm.heartbeat().expect("heartbeat");
    assert_eq!(result_of(&mut vm, SYSTEM, SYSTEM), Value::Int(9));
}
