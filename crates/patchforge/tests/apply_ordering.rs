//! Selection and ordering behavior of the apply operation.

mod common;

use common::{FakeVcs, Fixture, VecSink};
use patchforge::applier::Outcome;
use patchforge::driver::{ApplySelection, Driver, ReportEvent};

fn driver<'a>(fx: &Fixture, vcs: &'a FakeVcs, sink: &'a VecSink) -> Driver<'a> {
    Driver::new(
        fx.registry(),
        fx.tree_root.clone(),
        fx.patch_dir.clone(),
        vcs,
        sink,
    )
}

fn applied_order(outcome: &patchforge::driver::RunOutcome) -> Vec<&str> {
    outcome
        .results
        .iter()
        .map(|r| r.patch_id.as_str())
        .collect()
}

#[test]
fn default_selection_applies_enabled_patches_in_dependency_order() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let outcome = driver(&fx, &vcs, &sink)
        .apply(&ApplySelection::default())
        .unwrap();

    // charlie is disabled and nothing requested pulls it in.
    assert_eq!(applied_order(&outcome), vec!["alpha", "bravo"]);
    assert!(outcome.ok());
    assert!(fx.tree_file("src/alpha.h").contains("#define ALPHA 1"));
    assert!(fx.tree_file("src/charlie.h").is_empty());

    let events = sink.events.borrow();
    assert!(
        matches!(events.last(), Some(ReportEvent::RunDone { ok: true })),
        "the run must close with a successful RunDone event"
    );
}

#[test]
fn all_override_includes_disabled_patches_in_dependency_order() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        all: true,
        ..Default::default()
    };
    let outcome = driver(&fx, &vcs, &sink).apply(&sel).unwrap();

    assert_eq!(applied_order(&outcome), vec!["alpha", "bravo", "charlie"]);
    assert!(fx.tree_file("src/charlie.h").contains("#define CHARLIE 1"));
}

#[test]
fn category_filter_selects_only_that_categorys_enabled_patches() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        category: Some("core".into()),
        ..Default::default()
    };
    let outcome = driver(&fx, &vcs, &sink).apply(&sel).unwrap();
    assert_eq!(applied_order(&outcome), vec!["alpha", "bravo"]);

    // The extras category has no enabled patch, so there is nothing to do.
    let empty = ApplySelection {
        category: Some("extras".into()),
        ..Default::default()
    };
    let outcome = driver(&fx, &vcs, &sink).apply(&empty).unwrap();
    assert!(outcome.results.is_empty());
}

#[test]
fn explicit_selection_forces_a_disabled_patch_with_its_prerequisites() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        patches: vec!["charlie".into()],
        ..Default::default()
    };
    let outcome = driver(&fx, &vcs, &sink).apply(&sel).unwrap();

    // The disabled root is forced; its prerequisite still comes first.
    assert_eq!(applied_order(&outcome), vec!["alpha", "charlie"]);
    assert_eq!(outcome.results[1].outcome, Outcome::Applied);
}

#[test]
fn unknown_selection_ids_abort_before_any_mutation() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        patches: vec!["ghost".into()],
        ..Default::default()
    };
    let err = driver(&fx, &vcs, &sink).apply(&sel).unwrap_err();
    assert_eq!(err.kind(), patchforge::error::Kind::Config);
    assert!(vcs.calls().is_empty(), "no vcs call may have happened");
    assert!(fx.tree_file("src/alpha.h").is_empty());
}

#[test]
fn unknown_category_is_a_config_error() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        category: Some("nope".into()),
        ..Default::default()
    };
    let err = driver(&fx, &vcs, &sink).apply(&sel).unwrap_err();
    assert!(err.to_string().contains("unknown category 'nope'"));
}

#[test]
fn dry_run_reports_would_apply_without_touching_the_tree() {
    let fx = Fixture::new();
    let vcs = FakeVcs::default();
    let sink = VecSink::default();

    let sel = ApplySelection {
        dry_run: true,
        ..Default::default()
    };
    let outcome = driver(&fx, &vcs, &sink).apply(&sel).unwrap();

    assert!(outcome.ok());
    assert!(fx.tree_file("src/alpha.h").is_empty());
    assert!(
        vcs.calls().iter().all(|c| c.starts_with("check:")),
        "dry run must never reach the real apply: {:?}",
        vcs.calls()
    );
}
