//! End-to-end elimination tests.
//!
//! These tests exercise the complete pipeline through the public API:
//! 1. Assemble method bodies with `MethodBuilder`
//! 2. Collect them into a `Scope`
//! 3. Run `CsePass` (purity classification + parallel fixpoint drivers)
//! 4. Verify the rewritten bodies and the merged report

use vmcse::{
    ir::{FieldRef, Instruction, MethodBuilder, MethodRef, Opcode, Reg, Scope},
    opt::{CseConfig, CsePass, CseReport},
    Result,
};

/// Run the pass with default configuration.
fn run_default(scope: &Scope) -> Result<CseReport> {
    CsePass::new(CseConfig::default()).run(scope)
}

/// Fetch a method's linear body back out of the scope.
fn code_of(scope: &Scope, id: &MethodRef) -> Vec<Instruction> {
    scope
        .with_method(id, |m| m.code().to_vec())
        .expect("method not in scope")
}

fn count_opcode(code: &[Instruction], opcode: Opcode) -> usize {
    code.iter().filter(|i| i.opcode == opcode).count()
}

#[test]
fn test_redundant_add_eliminated() -> Result<()> {
    // x = a + b; y = a + b; return y
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "twice", 2);
    scope.add_method(
        MethodBuilder::new("app.Main", "twice")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.results_captured, 1);
    assert_eq!(report.stats.instructions_eliminated, 1);

    let code = code_of(&scope, &id);
    assert_eq!(count_opcode(&code, Opcode::Add), 1, "one add must remain");
    Ok(())
}

#[test]
fn test_field_reads_across_unclassified_call_kept() -> Result<()> {
    // r1 = this.f; unknown(); r2 = this.f -- the callee is out of scope and
    // unclassified, so the second read must stay.
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "reads", 0);
    let f = FieldRef::new("app.Main", "f");
    scope.add_method(
        MethodBuilder::new("app.Main", "reads")
            .instance()
            .get_field(Reg(1), Reg(0), f.clone())
            .invoke(
                Opcode::InvokeVirtual,
                None,
                vec![Reg(0)],
                MethodRef::new("ext.Unknown", "poke", 0),
            )
            .get_field(Reg(2), Reg(0), f)
            .ret_val(Reg(2))
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.results_captured, 0);
    assert_eq!(report.stats.instructions_eliminated, 0);
    assert_eq!(count_opcode(&code_of(&scope, &id), Opcode::GetField), 2);
    Ok(())
}

#[test]
fn test_in_scope_impure_callee_is_barrier() -> Result<()> {
    // The callee writes a field, so it is a method barrier; its classification
    // shows up in the report and the caller's second read stays.
    let scope = Scope::new();
    let f = FieldRef::new("app.Main", "f");
    let writer = MethodRef::new("app.Main", "bump", 0);
    scope.add_method(
        MethodBuilder::new("app.Main", "bump")
            .instance()
            .const_(Reg(1), 1)
            .put_field(Reg(1), Reg(0), f.clone())
            .ret()
            .build(),
    );
    let id = MethodRef::new("app.Main", "reads", 0);
    scope.add_method(
        MethodBuilder::new("app.Main", "reads")
            .instance()
            .get_field(Reg(1), Reg(0), f.clone())
            .invoke(Opcode::InvokeDirect, None, vec![Reg(0)], writer)
            .get_field(Reg(2), Reg(0), f)
            .ret_val(Reg(2))
            .build(),
    );

    let report = run_default(&scope)?;
    assert!(report.shared.method_barriers >= 1);
    assert_eq!(report.stats.results_captured, 0);
    assert_eq!(count_opcode(&code_of(&scope, &id), Opcode::GetField), 2);
    Ok(())
}

#[test]
fn test_allocation_only_callee_is_not_a_barrier() -> Result<()> {
    // The callee only allocates: impure (a fresh object each call), but no
    // write escapes, so a call to it must not invalidate tracked memory.
    let scope = Scope::new();
    let f = FieldRef::new("app.Main", "f");
    let alloc = MethodRef::new("app.Main", "fresh", 0);
    scope.add_method(
        MethodBuilder::new("app.Main", "fresh")
            .push(Instruction::new_instance(
                Reg(0),
                vmcse::ir::TypeId::new("app.Widget"),
            ))
            .ret_val(Reg(0))
            .build(),
    );
    let id = MethodRef::new("app.Main", "reads", 0);
    scope.add_method(
        MethodBuilder::new("app.Main", "reads")
            .instance()
            .get_field(Reg(1), Reg(0), f.clone())
            .invoke(Opcode::InvokeStatic, Some(Reg(2)), vec![], alloc)
            .get_field(Reg(3), Reg(0), f)
            .ret_val(Reg(3))
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.results_captured, 1);
    assert_eq!(count_opcode(&code_of(&scope, &id), Opcode::GetField), 1);
    Ok(())
}

#[test]
fn test_array_length_capture() -> Result<()> {
    let scope = Scope::new();
    scope.add_method(
        MethodBuilder::new("app.Main", "len")
            .param("int[]")
            .array_length(Reg(1), Reg(0))
            .array_length(Reg(2), Reg(0))
            .binop(Opcode::Add, Reg(3), Reg(1), Reg(2))
            .ret_val(Reg(3))
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.array_lengths_captured, 1);
    assert_eq!(report.stats.results_captured, 0);
    Ok(())
}

#[test]
fn test_mutually_recursive_pure_helpers() -> Result<()> {
    // a and b call each other and touch no memory; the conditional-purity
    // fixpoint must classify both as pure, letting the caller capture the
    // repeated call.
    let scope = Scope::new();
    let a = MethodRef::new("app.Rec", "a", 1);
    let b = MethodRef::new("app.Rec", "b", 1);
    scope.add_method(
        MethodBuilder::new("app.Rec", "a")
            .param("int")
            .invoke(Opcode::InvokeStatic, Some(Reg(1)), vec![Reg(0)], b.clone())
            .ret_val(Reg(1))
            .build(),
    );
    scope.add_method(
        MethodBuilder::new("app.Rec", "b")
            .param("int")
            .invoke(Opcode::InvokeStatic, Some(Reg(1)), vec![Reg(0)], a.clone())
            .ret_val(Reg(1))
            .build(),
    );
    scope.add_method(
        MethodBuilder::new("app.Main", "calls")
            .param("int")
            .invoke(Opcode::InvokeStatic, Some(Reg(1)), vec![Reg(0)], a.clone())
            .invoke(Opcode::InvokeStatic, Some(Reg(2)), vec![Reg(0)], a)
            .ret_val(Reg(2))
            .build(),
    );

    let report = run_default(&scope)?;
    // a, b, and the caller itself (its only calls resolve pure).
    assert_eq!(report.shared.conditionally_pure_methods, 3);
    assert_eq!(report.stats.results_captured, 1);
    Ok(())
}

#[test]
fn test_store_elision() -> Result<()> {
    // this.f = p; this.f = p -- the second store is provably a no-op.
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "stores", 1);
    let f = FieldRef::new("app.Main", "f");
    scope.add_method(
        MethodBuilder::new("app.Main", "stores")
            .instance()
            .param("int")
            .put_field(Reg(1), Reg(0), f.clone())
            .put_field(Reg(1), Reg(0), f)
            .ret()
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.stores_captured, 1);
    assert_eq!(count_opcode(&code_of(&scope, &id), Opcode::PutField), 1);
    Ok(())
}

#[test]
fn test_second_run_is_idempotent() -> Result<()> {
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "twice", 2);
    scope.add_method(
        MethodBuilder::new("app.Main", "twice")
            .param("int")
            .param("int")
            .binop(Opcode::Mul, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Mul, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build(),
    );

    let first = run_default(&scope)?;
    assert_eq!(first.stats.results_captured, 1);
    let after_first = code_of(&scope, &id);

    let second = run_default(&scope)?;
    assert_eq!(second.stats.results_captured, 0);
    assert_eq!(second.stats.instructions_eliminated, 0);
    assert_eq!(code_of(&scope, &id), after_first);
    Ok(())
}

#[test]
fn test_runtime_assertions_verify_instead_of_eliminate() -> Result<()> {
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "twice", 2);
    scope.add_method(
        MethodBuilder::new("app.Main", "twice")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build(),
    );

    let config = CseConfig::default().with_runtime_assertions();
    CsePass::new(config).run(&scope)?;

    let code = code_of(&scope, &id);
    assert_eq!(count_opcode(&code, Opcode::Add), 2, "both adds must remain");
    assert_eq!(count_opcode(&code, Opcode::CheckEq), 1);
    Ok(())
}

#[test]
fn test_register_budget_leaves_method_valid() -> Result<()> {
    let scope = Scope::new();
    let id = MethodRef::new("app.Main", "twice", 2);
    let build = || {
        MethodBuilder::new("app.Main", "twice")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build()
    };
    scope.add_method(build());
    let before = code_of(&scope, &id);

    let config = CseConfig::default().with_max_estimated_registers(4);
    let report = CsePass::new(config).run(&scope)?;

    assert_eq!(report.stats.skipped_due_to_too_many_registers, 1);
    assert_eq!(report.stats.results_captured, 0);
    assert_eq!(code_of(&scope, &id), before);
    Ok(())
}

#[test]
fn test_capture_across_branch_into_dominated_block() -> Result<()> {
    // The first add dominates the add in the taken branch; the capture
    // crosses the block boundary.
    let scope = Scope::new();
    scope.add_method(
        MethodBuilder::new("app.Main", "branchy")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .push(Instruction::if_zero(Reg(2), 4))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .ret_val(Reg(2))
            .build(),
    );

    let report = run_default(&scope)?;
    assert_eq!(report.stats.results_captured, 1);
    Ok(())
}
