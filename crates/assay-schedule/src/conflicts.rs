//! Conflict detection between a schedule and a new procedure
//!
//! [`Conflicts::compare`] produces one [`Change`] for every path present in
//! the previous products or the target procedure. A change conflicts when:
//! - the instructions differ in conductor or configuration
//! - persisted resources exist where one side has no instruction, or the
//!   storage cannot be read
//! - an additional requirement of the new instruction resolves to a
//!   conflicting path whose previous conductor offers the required production
//!
//! The comparison reads its inputs only and is final once computed.

use crate::products::{Products, ScheduledInstruction};
use crate::storage::StorageLocator;
use assay_declaration::ExperimentPath;
use assay_procedure::{Instruction, Procedure};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Difference at one path
#[derive(Debug, Clone)]
pub struct Change {
    path: ExperimentPath,
    current: Option<ScheduledInstruction>,
    scheduled: Option<Instruction>,
    conflicting_instruction: bool,
    conflicting_resources: bool,
    storage_unreadable: bool,
    conflicting_dependencies: Vec<ExperimentPath>,
    conflicting: bool,
}

impl Change {
    /// Absolute path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ExperimentPath {
        &self.path
    }

    /// Instruction previously scheduled at this path
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&ScheduledInstruction> {
        self.current.as_ref()
    }

    /// Instruction in the target procedure at this path
    #[inline]
    #[must_use]
    pub fn scheduled(&self) -> Option<&Instruction> {
        self.scheduled.as_ref()
    }

    /// Instructions differ in conductor or configuration, or one is missing
    #[inline]
    #[must_use]
    pub fn conflicting_instruction(&self) -> bool {
        self.conflicting_instruction
    }

    /// Persisted resources would be orphaned or overwritten
    #[inline]
    #[must_use]
    pub fn conflicting_resources(&self) -> bool {
        self.conflicting_resources
    }

    /// Storage could not be read; counted as conflicting resources
    #[inline]
    #[must_use]
    pub fn storage_unreadable(&self) -> bool {
        self.storage_unreadable
    }

    /// Conflicting paths reached through additional requirements
    #[inline]
    #[must_use]
    pub fn conflicting_dependencies(&self) -> &[ExperimentPath] {
        &self.conflicting_dependencies
    }

    /// Check if the change conflicts
    #[inline]
    #[must_use]
    pub fn is_conflicting(&self) -> bool {
        self.conflicting
    }

    /// Short description of the change
    #[must_use]
    pub fn summary(&self) -> String {
        let kind = match (&self.current, &self.scheduled) {
            (Some(_), None) => "removed",
            (None, Some(_)) => "added",
            _ if self.conflicting_instruction => "modified",
            _ => "unchanged",
        };

        let mut reasons = Vec::new();
        if self.conflicting_instruction {
            reasons.push("instruction".to_string());
        }
        if self.storage_unreadable {
            reasons.push("storage unreadable".to_string());
        } else if self.conflicting_resources {
            reasons.push("persisted resources".to_string());
        }
        if !self.conflicting_dependencies.is_empty() {
            let paths: Vec<String> = self.conflicting_dependencies.iter().map(ToString::to_string).collect();
            reasons.push(format!("dependencies {}", paths.join(", ")));
        }

        if self.conflicting {
            format!("{kind}, conflicting: {}", reasons.join("; "))
        } else {
            kind.to_string()
        }
    }
}

/// Per-path comparison of previous products and a target procedure
#[derive(Debug, Clone)]
pub struct Conflicts {
    changes: BTreeMap<ExperimentPath, Change>,
}

impl Conflicts {
    /// Compare previous products against a target procedure
    ///
    /// Storage failures are not propagated; they mark the change as
    /// conflicting. An additional requirement resolving to the instruction's
    /// own path is ignored here, while dependency analysis rejects it as a
    /// cycle.
    #[must_use]
    pub fn compare(current: &Products, target: &Procedure, storage: &dyn StorageLocator) -> Self {
        let scheduled: BTreeMap<ExperimentPath, &Instruction> = target.instructions().into_iter().collect();
        let paths: BTreeSet<&ExperimentPath> = current.paths().chain(scheduled.keys()).collect();

        let mut changes: BTreeMap<ExperimentPath, Change> = paths
            .into_iter()
            .map(|path| {
                let change = direct_change(path, current.get(path), scheduled.get(path).copied(), storage);
                (path.clone(), change)
            })
            .collect();

        let dependencies: BTreeMap<ExperimentPath, BTreeSet<ExperimentPath>> = scheduled
            .iter()
            .map(|(path, instruction)| (path.clone(), offered_dependencies(path, instruction, current)))
            .collect();

        let direct: BTreeMap<ExperimentPath, bool> = changes
            .iter()
            .map(|(path, change)| (path.clone(), change.conflicting))
            .collect();
        let resolved = propagate(&direct, &dependencies);

        for (path, change) in &mut changes {
            change.conflicting = resolved.get(path).copied().unwrap_or(change.conflicting);
            change.conflicting_dependencies = dependencies
                .get(path)
                .into_iter()
                .flatten()
                .filter(|dependency| resolved.get(*dependency).copied().unwrap_or(false))
                .cloned()
                .collect();
        }

        let conflicting = changes.values().filter(|change| change.conflicting).count();
        tracing::debug!(
            procedure = target.id(),
            changes = changes.len(),
            conflicting,
            "compared procedure against products"
        );
        Self { changes }
    }

    /// Every change in path order
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    /// Change at a path
    #[must_use]
    pub fn change(&self, path: &ExperimentPath) -> Option<&Change> {
        self.changes.get(path)
    }

    /// Paths whose change conflicts
    #[must_use]
    pub fn conflicting_paths(&self) -> Vec<&ExperimentPath> {
        self.changes
            .values()
            .filter(|change| change.is_conflicting())
            .map(Change::path)
            .collect()
    }

    /// Check if no change conflicts
    #[must_use]
    pub fn is_conflict_free(&self) -> bool {
        self.changes.values().all(|change| !change.is_conflicting())
    }
}

fn direct_change(
    path: &ExperimentPath,
    current: Option<&ScheduledInstruction>,
    scheduled: Option<&Instruction>,
    storage: &dyn StorageLocator,
) -> Change {
    let conflicting_instruction = match (current, scheduled) {
        (Some(current), Some(scheduled)) => !current.instruction().is_equivalent(scheduled),
        (Some(_), None) => true,
        (None, _) => false,
    };

    let (conflicting_resources, storage_unreadable) = if current.is_none() || scheduled.is_none() {
        persisted_resources(path, storage)
    } else {
        (false, false)
    };

    Change {
        path: path.clone(),
        current: current.cloned(),
        scheduled: scheduled.cloned(),
        conflicting_instruction,
        conflicting_resources,
        storage_unreadable,
        conflicting_dependencies: Vec::new(),
        conflicting: conflicting_instruction || conflicting_resources,
    }
}

/// Returns (resources present, storage unreadable)
fn persisted_resources(path: &ExperimentPath, storage: &dyn StorageLocator) -> (bool, bool) {
    match storage.location(path) {
        Ok(mut resources) => match resources.next() {
            None => (false, false),
            Some(Ok(_)) => (true, false),
            Some(Err(error)) => {
                tracing::warn!(path = %path, %error, "cannot read persisted resource, treating as conflicting");
                (true, true)
            }
        },
        Err(error) => {
            tracing::warn!(path = %path, %error, "cannot read storage location, treating as conflicting");
            (true, true)
        }
    }
}

/// Additional dependency paths whose previous conductor offers the production
fn offered_dependencies(path: &ExperimentPath, instruction: &Instruction, current: &Products) -> BTreeSet<ExperimentPath> {
    instruction
        .conductor()
        .declaration()
        .additional_requirements()
        .iter()
        .flat_map(|requirement| {
            requirement
                .resolved_dependencies(path, instruction.variables())
                .filter(|dependency| {
                    current
                        .get(dependency)
                        .is_some_and(|previous| previous.conductor().declaration().offers(requirement.production()))
                })
                .collect::<Vec<_>>()
        })
        .filter(|dependency| dependency != path)
        .collect()
}

/// Propagate conflicts from dependencies to dependents
///
/// Paths on one dependency cycle share a verdict. Components come out of
/// `tarjan_scc` dependencies first, so every component sees the final
/// verdict of everything it depends on.
fn propagate(
    direct: &BTreeMap<ExperimentPath, bool>,
    dependencies: &BTreeMap<ExperimentPath, BTreeSet<ExperimentPath>>,
) -> BTreeMap<ExperimentPath, bool> {
    let mut graph: DiGraph<&ExperimentPath, ()> = DiGraph::new();
    let nodes: BTreeMap<&ExperimentPath, NodeIndex> = direct.keys().map(|path| (path, graph.add_node(path))).collect();
    for (path, targets) in dependencies {
        let Some(&dependent) = nodes.get(path) else {
            continue;
        };
        for target in targets {
            if let Some(&dependency) = nodes.get(target) {
                graph.add_edge(dependent, dependency, ());
            }
        }
    }

    let mut resolved: BTreeMap<ExperimentPath, bool> = BTreeMap::new();
    for component in tarjan_scc(&graph) {
        let conflicting = component.iter().any(|&node| {
            let path = graph[node];
            direct.get(path).copied().unwrap_or(false)
                || graph
                    .neighbors(node)
                    .any(|dependency| resolved.get(graph[dependency]).copied().unwrap_or(false))
        });
        for &node in &component {
            resolved.insert(graph[node].clone(), conflicting);
        }
    }
    resolved
}
