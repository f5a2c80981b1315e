//! Dependency analysis of a procedure
//!
//! Builds the directed graph of instruction dependencies:
//! - condition and result edges from a parent to the children requiring it
//! - ordering edges between consecutive consumers of an ORDERED condition
//! - additional edges from lazily resolved requirement paths
//!
//! Edges point from dependency to dependent, so a topological order runs
//! every instruction after everything it requires.

use crate::error::ProcedureError;
use crate::instruction::Instruction;
use crate::procedure::Procedure;
use assay_declaration::{AnyProduction, Evaluation, ExperimentPath, Requirement};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashSet};

/// Why one instruction depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Dependent runs under a condition of the dependency
    Condition,
    /// Dependent consumes a result of the dependency
    Result,
    /// Dependent follows the dependency under an ORDERED condition
    Ordering,
    /// Dependent consumes a result through an additional requirement
    Additional,
}

impl DependencyKind {
    /// Check if the dependent needs the dependency's outputs
    ///
    /// Ordering edges only sequence execution.
    #[inline]
    #[must_use]
    pub fn consumes_output(self) -> bool {
        !matches!(self, Self::Ordering)
    }
}

/// Edge of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Instruction depended upon
    pub dependency: ExperimentPath,
    /// Instruction that depends
    pub dependent: ExperimentPath,
    /// Kind of edge
    pub kind: DependencyKind,
    /// Production carried by the edge
    pub production: AnyProduction,
}

/// Dependency graph of a procedure
#[derive(Debug, Clone)]
pub struct ProcedureDependencies {
    graph: DiGraph<ExperimentPath, Dependency>,
    nodes: BTreeMap<ExperimentPath, NodeIndex>,
    order: Vec<ExperimentPath>,
}

impl ProcedureDependencies {
    /// Analyse a procedure
    ///
    /// # Errors
    /// - [`ProcedureError::UnresolvedRequirement`] if a requirement targets an
    ///   instruction or production that does not exist
    /// - [`ProcedureError::DependencyCycle`] if dependencies are cyclic
    pub fn analyze(procedure: &Procedure) -> Result<Self, ProcedureError> {
        let instructions = procedure.instructions();

        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for (path, _) in &instructions {
            nodes.insert(path.clone(), graph.add_node(path.clone()));
        }

        let mut analysis = Analysis {
            procedure,
            graph,
            nodes,
            seen: HashSet::new(),
        };
        for (path, instruction) in &instructions {
            analysis.parent_edges(path, instruction)?;
            analysis.additional_edges(path, instruction)?;
        }

        let Analysis { graph, nodes, .. } = analysis;
        let order = toposort(&graph, None)
            .map_err(|cycle| ProcedureError::DependencyCycle(graph[cycle.node_id()].clone()))?
            .into_iter()
            .map(|index| graph[index].clone())
            .collect();

        tracing::debug!(
            procedure = procedure.id(),
            instructions = nodes.len(),
            edges = graph.edge_count(),
            "analysed procedure dependencies"
        );
        Ok(Self { graph, nodes, order })
    }

    /// Instructions in an order respecting every dependency
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[ExperimentPath] {
        &self.order
    }

    /// Check if a path is part of the analysis
    #[must_use]
    pub fn contains(&self, path: &ExperimentPath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Edges into an instruction
    #[must_use]
    pub fn dependencies_of(&self, path: &ExperimentPath) -> Vec<&Dependency> {
        self.edges(path, Direction::Incoming)
    }

    /// Edges out of an instruction
    #[must_use]
    pub fn dependents_of(&self, path: &ExperimentPath) -> Vec<&Dependency> {
        self.edges(path, Direction::Outgoing)
    }

    /// Every edge
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.graph.edge_weights()
    }

    /// Every instruction transitively depending on `path`
    #[must_use]
    pub fn transitive_dependents(&self, path: &ExperimentPath) -> Vec<ExperimentPath> {
        let Some(&start) = self.nodes.get(path) else {
            return Vec::new();
        };
        let mut dfs = petgraph::visit::Dfs::new(&self.graph, start);
        let mut dependents = Vec::new();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                dependents.push(self.graph[index].clone());
            }
        }
        dependents.sort();
        dependents
    }

    fn edges(&self, path: &ExperimentPath, direction: Direction) -> Vec<&Dependency> {
        let Some(&index) = self.nodes.get(path) else {
            return Vec::new();
        };
        let mut edges: Vec<&Dependency> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| edge.weight())
            .collect();
        // petgraph lists edges newest first
        edges.reverse();
        edges
    }
}

struct Analysis<'a> {
    procedure: &'a Procedure,
    graph: DiGraph<ExperimentPath, Dependency>,
    nodes: BTreeMap<ExperimentPath, NodeIndex>,
    seen: HashSet<(NodeIndex, NodeIndex, DependencyKind)>,
}

impl Analysis<'_> {
    fn add_edge(&mut self, dependency: &ExperimentPath, dependent: &ExperimentPath, kind: DependencyKind, production: &AnyProduction) {
        let (Some(&from), Some(&to)) = (self.nodes.get(dependency), self.nodes.get(dependent)) else {
            return;
        };
        if self.seen.insert((from, to, kind)) {
            self.graph.add_edge(
                from,
                to,
                Dependency {
                    dependency: dependency.clone(),
                    dependent: dependent.clone(),
                    kind,
                    production: production.clone(),
                },
            );
        }
    }

    fn parent_edges(&mut self, path: &ExperimentPath, instruction: &Instruction) -> Result<(), ProcedureError> {
        let requirement = instruction.conductor().declaration().requirement();
        let (production, kind) = match requirement {
            Requirement::None => return Ok(()),
            Requirement::Condition(condition) => (condition.production(), DependencyKind::Condition),
            Requirement::Result(result) => (result.production(), DependencyKind::Result),
        };

        let unresolved = |reason: &str| ProcedureError::UnresolvedRequirement {
            path: path.clone(),
            production: production.id().to_string(),
            reason: reason.to_string(),
        };

        let parent_path = path
            .parent()
            .filter(|parent| !parent.is_empty())
            .ok_or_else(|| unresolved("top-level instructions have no parent"))?;
        let parent = self
            .procedure
            .instruction(&parent_path)
            .ok_or_else(|| unresolved("parent instruction not found"))?;
        if !parent.conductor().declaration().offers(production) {
            return Err(unresolved("parent does not offer this production"));
        }

        self.add_edge(&parent_path, path, kind, production);

        if production.evaluation() == Some(Evaluation::Ordered) {
            let previous = parent
                .children()
                .take_while(|sibling| sibling.id() != instruction.id())
                .filter(|sibling| sibling.conductor().declaration().requirement().production() == Some(production))
                .last();
            if let Some(previous) = previous {
                self.add_edge(&parent_path.resolve(previous.id()), path, DependencyKind::Ordering, production);
            }
        }

        Ok(())
    }

    fn additional_edges(&mut self, path: &ExperimentPath, instruction: &Instruction) -> Result<(), ProcedureError> {
        for requirement in instruction.conductor().declaration().additional_requirements() {
            let production = requirement.production();
            for dependency in requirement.dependencies(path, instruction.variables()) {
                let unresolved = |reason: String| ProcedureError::UnresolvedRequirement {
                    path: path.clone(),
                    production: production.id().to_string(),
                    reason,
                };

                let dependency = dependency
                    .resolve_against(path)
                    .map_err(|error| unresolved(error.to_string()))?;
                if &dependency == path {
                    return Err(ProcedureError::DependencyCycle(path.clone()));
                }
                let target = self
                    .procedure
                    .instruction(&dependency)
                    .ok_or_else(|| unresolved(format!("no instruction at '{dependency}'")))?;
                if !target.conductor().declaration().offers(production) {
                    return Err(unresolved(format!("'{dependency}' does not offer this production")));
                }

                self.add_edge(&dependency, path, DependencyKind::Additional, production);
            }
        }
        Ok(())
    }
}
