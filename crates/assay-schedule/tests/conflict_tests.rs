use assay_declaration::{AdditionalRequirement, Declaration, Evaluation, Observation, VariablePaths};
use assay_procedure::{Conductor, Procedure};
use assay_schedule::{Conflicts, FileSystemStore, NoStorage, Products};
use assay_test_utils::{
    instruction, path, scheduler_with, FailingStorage, Lab, MemoryStorage, RecordingConductor, Timeline,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn lab() -> Lab {
    Lab::new(Evaluation::Parallel, Duration::ZERO)
}

fn compare(previous: &Procedure, next: &Procedure) -> Conflicts {
    Conflicts::compare(&Products::from_procedure(previous), next, &NoStorage)
}

/// Top-level instructions reading the `link` of the paths in their `links`
/// variable; `Value::Null` means no links
fn chain(links: [(&str, Value); 3]) -> Procedure {
    let timeline = Timeline::new();
    let link = Observation::<Value>::define("link");
    let linker: Arc<dyn Conductor> = Arc::new(RecordingConductor::new(
        "linker",
        Declaration::new()
            .with_production(&link)
            .with_additional(AdditionalRequirement::new(&link, VariablePaths::new("links"))),
        &timeline,
    ));
    let instructions = links.into_iter().map(|(id, from)| {
        let instruction = instruction(id, linker.clone());
        if from.is_null() {
            instruction
        } else {
            instruction.with_variable("links", from)
        }
    });
    Procedure::define("chain").unwrap().with_instructions(instructions).unwrap()
}

#[tokio::test]
async fn conducted_procedure_is_conflict_free_against_itself() {
    let lab = lab();
    let procedure = lab.procedure();
    let schedule = scheduler_with(lab.environment(), 4).schedule(&procedure).unwrap();
    assert!(schedule.conduct().await.unwrap().is_success());

    let conflicts = schedule.compare(&procedure, &NoStorage);

    assert!(conflicts.is_conflict_free());
    assert_eq!(conflicts.changes().count(), 4);
    assert!(conflicts.changes().all(|change| change.current().is_some() && change.scheduled().is_some()));
}

#[test]
fn changed_instruction_propagates_through_additional_requirement() {
    let lab = lab();
    let previous = lab.procedure();
    let next = previous
        .with_instruction_at(
            &path("/chamber"),
            instruction("b1", lab.measure.clone()).with_variable("gain", json!(2)),
        )
        .unwrap();

    let conflicts = compare(&previous, &next);

    let b1 = conflicts.change(&path("/chamber/b1")).unwrap();
    assert!(b1.conflicting_instruction());
    assert!(b1.is_conflicting());

    let fit = conflicts.change(&path("/chamber/b2/fit")).unwrap();
    assert!(!fit.conflicting_instruction());
    assert!(fit.is_conflicting());
    assert_eq!(fit.conflicting_dependencies(), &[path("/chamber/b1")]);

    assert!(!conflicts.change(&path("/chamber/b2")).unwrap().is_conflicting());
    assert!(!conflicts.change(&path("/chamber")).unwrap().is_conflicting());
    assert_eq!(
        conflicts.conflicting_paths(),
        vec![&path("/chamber/b1"), &path("/chamber/b2/fit")]
    );
}

#[test]
fn propagation_requires_prior_conductor_to_offer_production() {
    let lab = lab();
    let next = lab.procedure();
    // previously /chamber/b1 was bound to a conductor without the reference
    let previous = next
        .with_instruction_at(&path("/chamber"), instruction("b1", lab.chamber.clone()))
        .unwrap();

    let conflicts = compare(&previous, &next);

    assert!(conflicts.change(&path("/chamber/b1")).unwrap().is_conflicting());
    let fit = conflicts.change(&path("/chamber/b2/fit")).unwrap();
    assert!(!fit.is_conflicting());
    assert!(fit.conflicting_dependencies().is_empty());
}

#[test]
fn conflicts_propagate_transitively() {
    let previous = chain([("x", Value::Null), ("y", json!("../x")), ("z", json!("../y"))]);
    let next = previous.with_instruction(
        previous
            .instruction(&path("/x"))
            .unwrap()
            .with_variable("gain", json!(3)),
    );

    let conflicts = compare(&previous, &next);

    assert_eq!(
        conflicts.conflicting_paths(),
        vec![&path("/x"), &path("/y"), &path("/z")]
    );
    assert_eq!(
        conflicts.change(&path("/z")).unwrap().conflicting_dependencies(),
        &[path("/y")]
    );
}

#[test]
fn cyclic_additional_requirements_terminate() {
    let procedure = chain([("x", json!("../z")), ("y", json!("../x")), ("z", json!("../y"))]);
    assert!(compare(&procedure, &procedure).is_conflict_free());

    let next = procedure.with_instruction(
        procedure
            .instruction(&path("/y"))
            .unwrap()
            .with_variable("gain", json!(1)),
    );
    let conflicts = compare(&procedure, &next);
    assert_eq!(
        conflicts.conflicting_paths(),
        vec![&path("/x"), &path("/y"), &path("/z")]
    );
}

#[test]
fn whole_cycle_conflicts_when_it_depends_on_conflicting_path() {
    let procedure = chain([("x", json!(["../y", "../z"])), ("y", json!("../x")), ("z", Value::Null)]);
    let next = procedure.with_instruction(
        procedure
            .instruction(&path("/z"))
            .unwrap()
            .with_variable("gain", json!(2)),
    );

    let conflicts = compare(&procedure, &next);

    assert_eq!(
        conflicts.conflicting_paths(),
        vec![&path("/x"), &path("/y"), &path("/z")]
    );
    let y = conflicts.change(&path("/y")).unwrap();
    assert!(!y.conflicting_instruction());
    assert_eq!(y.conflicting_dependencies(), &[path("/x")]);
    assert_eq!(
        conflicts.change(&path("/x")).unwrap().conflicting_dependencies(),
        &[path("/y"), path("/z")]
    );
}

#[test]
fn self_reference_is_ignored() {
    let procedure = chain([("x", json!(".")), ("y", json!("../x")), ("z", Value::Null)]);
    let next = procedure.with_instruction(
        procedure
            .instruction(&path("/z"))
            .unwrap()
            .with_variable("gain", json!(2)),
    );

    let conflicts = compare(&procedure, &next);

    assert_eq!(conflicts.conflicting_paths(), vec![&path("/z")]);
    assert!(conflicts.change(&path("/x")).unwrap().conflicting_dependencies().is_empty());
}

#[test]
fn removed_instruction_conflicts() {
    let lab = lab();
    let previous = lab.procedure();
    let next = previous.without_instruction_at(&path("/chamber/b2/fit")).unwrap();

    let conflicts = compare(&previous, &next);

    let fit = conflicts.change(&path("/chamber/b2/fit")).unwrap();
    assert!(fit.scheduled().is_none());
    assert!(fit.current().is_some());
    assert!(fit.is_conflicting());
    assert!(!fit.conflicting_resources());
    assert_eq!(conflicts.conflicting_paths(), vec![&path("/chamber/b2/fit")]);
}

#[test]
fn added_instruction_conflicts_only_with_stale_resources() {
    let lab = lab();
    let previous = lab.procedure();
    let next = previous
        .with_instruction_at(&path("/chamber"), instruction("b3", lab.measure.clone()))
        .unwrap();

    assert!(compare(&previous, &next).is_conflict_free());

    let storage = MemoryStorage::new();
    storage.persist(&path("/chamber/b3"), "spectrum.json");
    let conflicts = Conflicts::compare(&Products::from_procedure(&previous), &next, &storage);

    let b3 = conflicts.change(&path("/chamber/b3")).unwrap();
    assert!(b3.current().is_none());
    assert!(b3.conflicting_resources());
    assert!(!b3.storage_unreadable());
    assert!(b3.is_conflicting());
}

#[test]
fn persisted_files_of_removed_instruction_conflict() {
    let root = tempfile::tempdir().unwrap();
    let store = FileSystemStore::new(root.path());
    store.persist(&path("/chamber/b2/fit"), "fit.json", b"{}").unwrap();

    let lab = lab();
    let previous = lab.procedure();
    let next = previous.without_instruction_at(&path("/chamber/b2/fit")).unwrap();
    let conflicts = Conflicts::compare(&Products::from_procedure(&previous), &next, &store);

    let fit = conflicts.change(&path("/chamber/b2/fit")).unwrap();
    assert!(fit.conflicting_resources());
    assert!(fit.is_conflicting());
}

#[test]
fn unreadable_storage_counts_as_conflicting() {
    let lab = lab();
    let previous = lab.procedure();
    let next = previous
        .with_instruction_at(&path("/chamber"), instruction("b3", lab.measure.clone()))
        .and_then(|procedure| procedure.with_instruction_at(&path("/chamber"), instruction("b4", lab.measure.clone())))
        .unwrap();
    let storage = FailingStorage::new()
        .failing_at(path("/chamber/b3"))
        .failing_entries_at(path("/chamber/b4"));

    let conflicts = Conflicts::compare(&Products::from_procedure(&previous), &next, &storage);

    for added in ["/chamber/b3", "/chamber/b4"] {
        let change = conflicts.change(&path(added)).unwrap();
        assert!(change.storage_unreadable(), "{added}");
        assert!(change.is_conflicting(), "{added}");
    }
    assert!(!conflicts.is_conflict_free());
}

#[test]
fn storage_not_consulted_for_kept_instructions() {
    let lab = lab();
    let procedure = lab.procedure();
    let storage = FailingStorage::new().failing_at(path("/chamber/b1"));

    let conflicts = Conflicts::compare(&Products::from_procedure(&procedure), &procedure, &storage);

    assert!(conflicts.is_conflict_free());
}

#[test]
fn change_summary_names_reasons() {
    let lab = lab();
    let previous = lab.procedure();
    let next = previous
        .with_instruction_at(
            &path("/chamber"),
            instruction("b1", lab.measure.clone()).with_variable("gain", json!(2)),
        )
        .unwrap();

    let conflicts = compare(&previous, &next);

    assert_eq!(
        conflicts.change(&path("/chamber/b1")).unwrap().summary(),
        "modified, conflicting: instruction"
    );
    assert_eq!(
        conflicts.change(&path("/chamber/b2/fit")).unwrap().summary(),
        "unchanged, conflicting: dependencies /chamber/b1"
    );
    assert_eq!(conflicts.change(&path("/chamber")).unwrap().summary(), "unchanged");
}
