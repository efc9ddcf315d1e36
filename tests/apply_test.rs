#![allow(clippy::expect_used, clippy::unwrap_used, clippy::wildcard_imports)]
//! End-to-end apply scenarios over the in-memory system.
//!
//! Each test builds a catalog, converges it, and asserts on the resulting
//! filesystem state, the change map, and the scheduling behavior around
//! failures and dependencies.

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::*;
use converge::catalog::{Condition, ResourceId};
use converge::error::ApplyError;
use converge::system::System;
use converge::system::read_file;

/// Install a fake program at `path` that records its resource id in `trace`
/// each time it runs.
fn tracing_program(fx: &Fixture, path: &str, id: ResourceId, trace: &Arc<Mutex<Vec<ResourceId>>>) {
    let trace = Arc::clone(trace);
    fx.system
        .mkprogram(
            Path::new(path),
            Arc::new(move |_| {
                trace.lock().unwrap().push(id);
                0
            }),
        )
        .expect("install program");
}

/// Install a fake `touch` that creates the file named by its argument.
fn touch_program(fx: &Fixture) {
    let system = fx.system.clone();
    fx.system
        .mkprogram(
            Path::new("/bin/touch"),
            Arc::new(move |ctx| {
                let Some(path) = ctx.args.get(1) else {
                    return 2;
                };
                match system.create_file(Path::new(path), 0o666) {
                    Ok(_) => 0,
                    Err(_) => 1,
                }
            }),
        )
        .expect("install touch");
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn empty_catalog_succeeds() {
    let fx = Fixture::new();
    let changed = fx.applier().apply(&catalog(vec![])).unwrap();
    assert!(changed.is_empty());
}

#[test]
fn single_resource_with_no_dependencies_runs() {
    let fx = Fixture::new();
    let cat = catalog(vec![resource(7, "", &[], directory("/tmp/dir"))]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&7), Some(&true));
    assert!(fx.system.lstat(Path::new("/tmp/dir")).unwrap().is_dir());
}

// ---------------------------------------------------------------------------
// S1: write file, converge to fixed point
// ---------------------------------------------------------------------------

#[test]
fn write_file_then_second_apply_is_a_fixed_point() {
    let fx = Fixture::new();
    let cat = catalog(vec![resource(42, "", &[], plain_file("/tmp/foo", b"Hello"))]);

    let changed = fx.applier().apply(&cat).unwrap();
    assert!(fx.system.lstat(Path::new("/tmp/foo")).unwrap().is_file());
    assert_eq!(read_file(&fx.system, Path::new("/tmp/foo")).unwrap(), b"Hello");
    assert_eq!(changed.get(&42), Some(&true));

    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&42), Some(&false), "second apply must not write");
    assert_eq!(read_file(&fx.system, Path::new("/tmp/foo")).unwrap(), b"Hello");
}

#[test]
fn differing_content_is_replaced() {
    let fx = Fixture::new();
    let pre = catalog(vec![resource(1, "", &[], plain_file("/tmp/foo", b"old and longer"))]);
    fx.applier().apply(&pre).unwrap();

    let cat = catalog(vec![resource(1, "", &[], plain_file("/tmp/foo", b"new"))]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&true));
    assert_eq!(read_file(&fx.system, Path::new("/tmp/foo")).unwrap(), b"new");
}

// ---------------------------------------------------------------------------
// S2: link depends on file
// ---------------------------------------------------------------------------

#[test]
fn symlink_depending_on_file_reads_through() {
    let fx = Fixture::new();
    let cat = catalog(vec![
        resource(42, "file", &[], plain_file("/tmp/foo", b"Hello")),
        resource(100, "link", &[42], symlink("/tmp/foo", "/tmp/link")),
    ]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&100), Some(&true));
    assert_eq!(
        fx.system.readlink(Path::new("/tmp/link")).unwrap(),
        PathBuf::from("/tmp/foo")
    );
    assert_eq!(read_file(&fx.system, Path::new("/tmp/link")).unwrap(), b"Hello");
}

// ---------------------------------------------------------------------------
// S3: retarget an existing symlink
// ---------------------------------------------------------------------------

#[test]
fn existing_symlink_is_retargeted() {
    let fx = Fixture::new();
    fx.system
        .symlink(Path::new("/tmp/foo"), Path::new("/tmp/link"))
        .unwrap();

    let cat = catalog(vec![resource(1, "", &[], symlink("/tmp/bar", "/tmp/link"))]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&true));
    assert_eq!(
        fx.system.readlink(Path::new("/tmp/link")).unwrap(),
        PathBuf::from("/tmp/bar")
    );

    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&false), "correct link is left alone");
}

#[test]
fn non_symlink_in_the_way_is_an_error() {
    let fx = Fixture::new();
    fx.system.mkdir(Path::new("/tmp/link"), 0o777).unwrap();
    let cat = catalog(vec![resource(1, "", &[], symlink("/tmp/bar", "/tmp/link"))]);
    assert!(matches!(fx.applier().apply(&cat), Err(ApplyError::NotClean)));
}

// ---------------------------------------------------------------------------
// Absent and no-content files
// ---------------------------------------------------------------------------

#[test]
fn absent_removes_and_then_converges() {
    let fx = Fixture::new();
    let pre = catalog(vec![resource(1, "", &[], plain_file("/tmp/junk", b"x"))]);
    fx.applier().apply(&pre).unwrap();

    let cat = catalog(vec![resource(2, "", &[], absent("/tmp/junk"))]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&2), Some(&true));
    assert!(fx.system.lstat(Path::new("/tmp/junk")).is_err());

    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&2), Some(&false));
}

#[test]
fn bare_plain_file_asserts_existence() {
    let fx = Fixture::new();
    let cat = catalog(vec![resource(1, "", &[], plain_file_bare("/tmp/required"))]);
    assert!(matches!(fx.applier().apply(&cat), Err(ApplyError::NotClean)));

    let seed = catalog(vec![resource(9, "", &[], plain_file("/tmp/required", b"present"))]);
    fx.applier().apply(&seed).unwrap();
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&false), "assertion never mutates");
}

// ---------------------------------------------------------------------------
// S4: cascade skip on failure
// ---------------------------------------------------------------------------

#[test]
fn failure_cascades_to_dependents_but_not_siblings() {
    let fx = Fixture::new();
    // /tmp/a is already a directory, so the plain file resource fails.
    fx.system.mkdir(Path::new("/tmp/a"), 0o777).unwrap();
    let cat = catalog(vec![
        resource(101, "a", &[], plain_file("/tmp/a", b"x")),
        resource(102, "b", &[101], plain_file("/tmp/b", b"x")),
        resource(103, "c", &[102], plain_file("/tmp/c", b"x")),
        resource(200, "canary", &[], plain_file("/tmp/canary", b"x")),
    ]);

    assert!(matches!(fx.applier().apply(&cat), Err(ApplyError::NotClean)));
    assert!(fx.system.lstat(Path::new("/tmp/b")).is_err(), "b must not run");
    assert!(fx.system.lstat(Path::new("/tmp/c")).is_err(), "c must not run");
    assert!(
        fx.system.lstat(Path::new("/tmp/canary")).unwrap().is_file(),
        "independent resource still applies"
    );
    assert!(fx.log.contains("skipping due to failure of a (id=101)"));
    assert!(!fx.log.contains("applying: b (id=102)"), "skipped ids never dispatch");
}

// ---------------------------------------------------------------------------
// S5/S6: dependency-change triggers
// ---------------------------------------------------------------------------

fn deps_changed_catalog() -> converge::catalog::Catalog {
    catalog(vec![
        resource(100, "config", &[], plain_file("/tmp/config", b"Hello")),
        resource(
            42,
            "refresh",
            &[100],
            exec(
                argv(&["/bin/touch", "/tmp/canary"]),
                Condition::IfDepsChanged(vec![100]),
            ),
        ),
    ])
}

#[test]
fn exec_triggers_when_dependency_changed() {
    let fx = Fixture::new();
    touch_program(&fx);
    let changed = fx.applier().apply(&deps_changed_catalog()).unwrap();
    assert_eq!(changed.get(&100), Some(&true));
    assert_eq!(changed.get(&42), Some(&true));
    assert!(fx.system.lstat(Path::new("/tmp/canary")).unwrap().is_file());
}

#[test]
fn exec_skips_when_dependency_already_converged() {
    let fx = Fixture::new();
    touch_program(&fx);
    let seed = catalog(vec![resource(1, "", &[], plain_file("/tmp/config", b"Hello"))]);
    fx.applier().apply(&seed).unwrap();

    let changed = fx.applier().apply(&deps_changed_catalog()).unwrap();
    assert_eq!(changed.get(&100), Some(&false));
    assert_eq!(changed.get(&42), Some(&false));
    assert!(
        fx.system.lstat(Path::new("/tmp/canary")).is_err(),
        "trigger must not fire"
    );
}

// ---------------------------------------------------------------------------
// Noop rollup
// ---------------------------------------------------------------------------

#[test]
fn noop_changed_bit_rolls_up_dependencies() {
    let fx = Fixture::new();
    let cat = catalog(vec![
        resource(101, "", &[], plain_file("/tmp/one", b"1")),
        resource(102, "", &[], plain_file("/tmp/two", b"2")),
        resource(42, "join", &[101, 102], converge::catalog::Payload::Noop),
    ]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&42), Some(&true));

    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&42), Some(&false));
}

// ---------------------------------------------------------------------------
// Change map coverage
// ---------------------------------------------------------------------------

#[test]
fn change_map_has_exactly_one_entry_per_resource() {
    let fx = Fixture::new();
    let cat = catalog(vec![
        resource(1, "", &[], plain_file("/tmp/a", b"a")),
        resource(2, "", &[1], plain_file("/tmp/b", b"b")),
        resource(3, "", &[], converge::catalog::Payload::Noop),
    ]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.len(), 3);
    for id in [1, 2, 3] {
        assert!(changed.contains_key(&id), "missing change entry for {id}");
    }
}

// ---------------------------------------------------------------------------
// Ordering under a worker pool
// ---------------------------------------------------------------------------

#[test]
fn chain_order_is_preserved_with_concurrent_workers() {
    let fx = Fixture::with_jobs(4);
    let trace = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=5u64 {
        tracing_program(&fx, &format!("/bin/step{id}"), id, &trace);
    }
    let cat = catalog(vec![
        resource(1, "", &[], exec(argv(&["/bin/step1"]), Condition::Always)),
        resource(2, "", &[1], exec(argv(&["/bin/step2"]), Condition::Always)),
        resource(3, "", &[2], exec(argv(&["/bin/step3"]), Condition::Always)),
        resource(4, "", &[3], exec(argv(&["/bin/step4"]), Condition::Always)),
        resource(5, "", &[4], exec(argv(&["/bin/step5"]), Condition::Always)),
    ]);
    fx.applier().apply(&cat).unwrap();
    assert_eq!(*trace.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn diamond_joins_only_after_both_branches() {
    let fx = Fixture::with_jobs(4);
    let trace = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=4u64 {
        tracing_program(&fx, &format!("/bin/node{id}"), id, &trace);
    }
    let cat = catalog(vec![
        resource(1, "", &[], exec(argv(&["/bin/node1"]), Condition::Always)),
        resource(2, "", &[1], exec(argv(&["/bin/node2"]), Condition::Always)),
        resource(3, "", &[1], exec(argv(&["/bin/node3"]), Condition::Always)),
        resource(4, "", &[2, 3], exec(argv(&["/bin/node4"]), Condition::Always)),
    ]);
    fx.applier().apply(&cat).unwrap();

    let order = trace.lock().unwrap().clone();
    assert_eq!(order.len(), 4, "every resource runs exactly once");
    let pos = |id: u64| order.iter().position(|&x| x == id).unwrap();
    assert!(pos(1) < pos(2));
    assert!(pos(1) < pos(3));
    assert!(pos(4) > pos(2));
    assert!(pos(4) > pos(3));
}

#[test]
fn independent_resources_all_run_with_concurrent_workers() {
    let fx = Fixture::with_jobs(4);
    let mut resources = Vec::new();
    for id in 1..=12u64 {
        resources.push(resource(
            id,
            "",
            &[],
            plain_file(&format!("/tmp/file{id}"), b"data"),
        ));
    }
    let changed = fx.applier().apply(&catalog(resources)).unwrap();
    assert_eq!(changed.len(), 12);
    for id in 1..=12u64 {
        assert!(
            fx.system
                .lstat(Path::new(&format!("/tmp/file{id}")))
                .unwrap()
                .is_file()
        );
    }
}

// ---------------------------------------------------------------------------
// Exec conditions end to end
// ---------------------------------------------------------------------------

#[test]
fn only_if_gates_execution() {
    let fx = Fixture::new();
    touch_program(&fx);
    fx.system
        .mkprogram(Path::new("/bin/no"), Arc::new(|_| 1))
        .unwrap();
    let cat = catalog(vec![resource(
        1,
        "",
        &[],
        exec(
            argv(&["/bin/touch", "/tmp/canary"]),
            Condition::OnlyIf(argv(&["/bin/no"])),
        ),
    )]);
    let changed = fx.applier().apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&false));
    assert!(fx.system.lstat(Path::new("/tmp/canary")).is_err());
}

#[test]
fn failed_command_output_reaches_the_log() {
    let fx = Fixture::new();
    fx.system
        .mkprogram(
            Path::new("/bin/broken"),
            Arc::new(|ctx| {
                ctx.output.extend_from_slice(b"exploded spectacularly");
                3
            }),
        )
        .unwrap();
    let cat = catalog(vec![resource(
        5,
        "deploy",
        &[],
        exec(argv(&["/bin/broken"]), Condition::Always),
    )]);
    assert!(matches!(fx.applier().apply(&cat), Err(ApplyError::NotClean)));
    assert!(fx.log.contains("apply deploy (id=5)"));
    assert!(fx.log.contains("exploded spectacularly"));
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_does_not_mutate() {
    use converge::apply::{Applier, ApplyOptions};
    use converge::logging::MemoryLog;
    use converge::system::SimulatedSystem;

    let fx = Fixture::new();
    touch_program(&fx);
    let sim = SimulatedSystem::new(fx.system.clone());
    let applier = Applier::with_options(
        Arc::new(sim),
        Arc::new(MemoryLog::new()),
        ApplyOptions::default(),
    );
    let cat = catalog(vec![
        resource(1, "", &[], plain_file("/tmp/foo", b"Hello")),
        resource(2, "", &[], directory("/tmp/dir")),
        resource(3, "", &[], symlink("/tmp/foo", "/tmp/link")),
        resource(
            4,
            "",
            &[1],
            exec(argv(&["/bin/touch", "/tmp/canary"]), Condition::Always),
        ),
    ]);
    let changed = applier.apply(&cat).unwrap();
    assert_eq!(changed.get(&1), Some(&true), "dry run still reports changes");
    assert!(fx.system.lstat(Path::new("/tmp/foo")).is_err());
    assert!(fx.system.lstat(Path::new("/tmp/dir")).is_err());
    assert!(fx.system.lstat(Path::new("/tmp/link")).is_err());
    assert!(fx.system.lstat(Path::new("/tmp/canary")).is_err());
}

// ---------------------------------------------------------------------------
// Skip-conditions override
// ---------------------------------------------------------------------------

#[test]
fn skip_conditions_forces_triggers_to_fire() {
    use converge::apply::{Applier, ApplyOptions};

    let fx = Fixture::new();
    touch_program(&fx);
    let seed = catalog(vec![resource(1, "", &[], plain_file("/tmp/config", b"Hello"))]);
    fx.applier().apply(&seed).unwrap();

    let options = ApplyOptions {
        skip_conditions: true,
        ..ApplyOptions::default()
    };
    let applier = Applier::with_options(Arc::new(fx.system.clone()), fx.log.clone(), options);
    applier.apply(&deps_changed_catalog()).unwrap();
    assert!(
        fx.system.lstat(Path::new("/tmp/canary")).unwrap().is_file(),
        "unconditional mode ignores the unchanged dependency"
    );
}
