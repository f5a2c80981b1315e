use assay_declaration::{
    AdditionalRequirement, Declaration, Evaluation, ExperimentPath, Observation, Preparation,
    Requirement, VariablePaths,
};
use assay_procedure::{
    ConductError, Conductor, DependencyKind, ExecutionContext, Instruction, Procedure,
    ProcedureDependencies, ProcedureError,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug)]
struct Declared {
    id: &'static str,
    declaration: Declaration,
}

#[async_trait]
impl Conductor for Declared {
    fn id(&self) -> &str {
        self.id
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    async fn conduct(&self, _context: &dyn ExecutionContext) -> Result<(), ConductError> {
        Ok(())
    }
}

struct Kit {
    chamber: Arc<dyn Conductor>,
    measure: Arc<dyn Conductor>,
    analyse: Arc<dyn Conductor>,
}

fn kit(evaluation: Evaluation) -> Kit {
    let vacuum = Preparation::<()>::define("vacuum", evaluation);
    let spectrum = Observation::<Vec<f64>>::define("spectrum");
    let reference = Observation::<f64>::define("reference");

    Kit {
        chamber: Arc::new(Declared {
            id: "chamber",
            declaration: Declaration::new().with_production(&vacuum),
        }),
        measure: Arc::new(Declared {
            id: "measure",
            declaration: Declaration::new()
                .with_requirement(Requirement::condition(&vacuum))
                .with_production(&spectrum)
                .with_production(&reference),
        }),
        analyse: Arc::new(Declared {
            id: "analyse",
            declaration: Declaration::new()
                .with_requirement(Requirement::result(&spectrum))
                .with_additional(AdditionalRequirement::new(&reference, VariablePaths::new("references"))),
        }),
    }
}

fn path(s: &str) -> ExperimentPath {
    s.parse().unwrap()
}

fn instruction(id: &str, conductor: &Arc<dyn Conductor>) -> Instruction {
    Instruction::define(id, Arc::clone(conductor)).unwrap()
}

fn procedure(kit: &Kit) -> Procedure {
    Procedure::define("run").unwrap().with_instruction(
        instruction("chamber", &kit.chamber)
            .with_child(instruction("b1", &kit.measure))
            .with_child(instruction("b2", &kit.measure).with_child(
                instruction("fit", &kit.analyse).with_variable("references", json!(["../../b1"])),
            ))
            .with_child(instruction("b3", &kit.measure)),
    )
}

fn position(order: &[ExperimentPath], s: &str) -> usize {
    order.iter().position(|p| p == &path(s)).unwrap()
}

#[test]
fn condition_and_result_edges_target_parent() {
    let dependencies = ProcedureDependencies::analyze(&procedure(&kit(Evaluation::Parallel))).unwrap();

    let incoming = dependencies.dependencies_of(&path("/chamber/b2/fit"));
    let kinds: Vec<(String, DependencyKind)> = incoming
        .iter()
        .map(|d| (d.dependency.to_string(), d.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("/chamber/b2".to_string(), DependencyKind::Result),
            ("/chamber/b1".to_string(), DependencyKind::Additional),
        ]
    );
    assert_eq!(dependencies.dependencies_of(&path("/chamber/b1")).len(), 1);
}

#[test]
fn ordered_condition_chains_consumers() {
    let dependencies = ProcedureDependencies::analyze(&procedure(&kit(Evaluation::Ordered))).unwrap();

    let ordering: Vec<(String, String)> = dependencies
        .iter()
        .filter(|d| d.kind == DependencyKind::Ordering)
        .map(|d| (d.dependency.to_string(), d.dependent.to_string()))
        .collect();
    assert_eq!(
        ordering,
        vec![
            ("/chamber/b1".to_string(), "/chamber/b2".to_string()),
            ("/chamber/b2".to_string(), "/chamber/b3".to_string()),
        ]
    );

    let order = dependencies.order();
    assert!(position(order, "/chamber") < position(order, "/chamber/b1"));
    assert!(position(order, "/chamber/b1") < position(order, "/chamber/b2"));
    assert!(position(order, "/chamber/b2") < position(order, "/chamber/b3"));
}

#[test]
fn unordered_condition_has_no_ordering_edges() {
    let dependencies = ProcedureDependencies::analyze(&procedure(&kit(Evaluation::Unordered))).unwrap();
    assert!(dependencies.iter().all(|d| d.kind != DependencyKind::Ordering));
}

#[test]
fn missing_parent_production_is_unresolved() {
    let kit = kit(Evaluation::Parallel);
    let procedure = Procedure::define("run")
        .unwrap()
        .with_instruction(instruction("alone", &kit.measure));

    let error = ProcedureDependencies::analyze(&procedure).unwrap_err();
    assert!(matches!(error, ProcedureError::UnresolvedRequirement { .. }));
}

#[test]
fn additional_requirement_on_missing_instruction() {
    let kit = kit(Evaluation::Parallel);
    let procedure = procedure(&kit);
    let fit = procedure
        .instruction(&path("/chamber/b2/fit"))
        .unwrap()
        .with_variable("references", json!(["../../missing"]));
    let procedure = procedure.with_instruction_at(&path("/chamber/b2"), fit).unwrap();

    let error = ProcedureDependencies::analyze(&procedure).unwrap_err();
    assert!(error.to_string().contains("/chamber/missing"));
}

#[test]
fn transitive_dependents() {
    let dependencies = ProcedureDependencies::analyze(&procedure(&kit(Evaluation::Parallel))).unwrap();
    let dependents: Vec<String> = dependencies
        .transitive_dependents(&path("/chamber/b1"))
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(dependents, vec!["/chamber/b2/fit"]);
}
