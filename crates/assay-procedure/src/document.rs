//! Persisted procedure documents
//!
//! A document is the logical record of a procedure: ids, conductor ids,
//! variables and children. Byte encoding is left to a serde codec chosen by
//! the host.

use crate::error::ProcedureError;
use crate::instruction::Instruction;
use crate::procedure::Procedure;
use crate::registry::ConductorRegistry;
use assay_declaration::{ExperimentPath, Variables};
use serde::{Deserialize, Serialize};

/// Persisted form of a procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDocument {
    pub id: String,
    #[serde(default)]
    pub instructions: Vec<InstructionDocument>,
}

/// Persisted form of an instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionDocument {
    pub id: String,
    pub conductor: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<InstructionDocument>,
}

impl InstructionDocument {
    fn from_instruction(instruction: &Instruction) -> Self {
        Self {
            id: instruction.id().to_string(),
            conductor: instruction.conductor().id().to_string(),
            variables: instruction.variables().clone(),
            children: instruction.children().map(Self::from_instruction).collect(),
        }
    }

    fn to_instruction(&self, path: &ExperimentPath, registry: &dyn ConductorRegistry) -> Result<Instruction, ProcedureError> {
        let conductor = registry
            .conductor(&self.conductor)
            .ok_or_else(|| ProcedureError::UnknownConductor {
                path: path.clone(),
                conductor: self.conductor.clone(),
            })?;

        let children = self
            .children
            .iter()
            .map(|child| child.to_instruction(&path.resolve(child.id.as_str()), registry))
            .collect::<Result<Vec<_>, _>>()?;

        Instruction::define(self.id.as_str(), conductor)?
            .with_variables(self.variables.clone())
            .with_children(children)
            .map_err(|error| match error {
                ProcedureError::DuplicateId { id, .. } => ProcedureError::DuplicateId {
                    parent: path.clone(),
                    id,
                },
                other => other,
            })
    }
}

impl Procedure {
    /// Persisted form of this procedure
    #[must_use]
    pub fn to_document(&self) -> ProcedureDocument {
        ProcedureDocument {
            id: self.id().to_string(),
            instructions: self
                .independent_instructions()
                .map(InstructionDocument::from_instruction)
                .collect(),
        }
    }

    /// Rebuild a procedure, binding conductors through a registry
    ///
    /// # Errors
    /// - [`ProcedureError::UnknownConductor`] if a conductor id is not registered
    /// - [`ProcedureError::DuplicateId`] if siblings share an id
    /// - [`ProcedureError::Path`] if an id is invalid
    pub fn from_document(document: &ProcedureDocument, registry: &dyn ConductorRegistry) -> Result<Self, ProcedureError> {
        let root = ExperimentPath::define_absolute();
        let instructions = document
            .instructions
            .iter()
            .map(|instruction| instruction.to_instruction(&root.resolve(instruction.id.as_str()), registry))
            .collect::<Result<Vec<_>, _>>()?;

        let procedure = Self::define(document.id.as_str())?.with_instructions(instructions)?;
        tracing::debug!(procedure = procedure.id(), instructions = procedure.len(), "loaded procedure document");
        Ok(procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::Conductor;
    use crate::context::ExecutionContext;
    use crate::error::ConductError;
    use crate::registry::ConductorCatalog;
    use assay_declaration::Declaration;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Named {
        id: &'static str,
        declaration: Declaration,
    }

    #[async_trait]
    impl Conductor for Named {
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

    fn catalog() -> ConductorCatalog {
        let catalog = ConductorCatalog::new();
        for id in ["sample", "acquire"] {
            catalog
                .register(Arc::new(Named {
                    id,
                    declaration: Declaration::new(),
                }))
                .unwrap();
        }
        catalog
    }

    fn document() -> ProcedureDocument {
        serde_json::from_value(json!({
            "id": "run",
            "instructions": [{
                "id": "s1",
                "conductor": "sample",
                "variables": { "mass": 1.5 },
                "children": [
                    { "id": "a1", "conductor": "acquire" },
                    { "id": "a2", "conductor": "acquire", "variables": { "scans": 3 } }
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn document_round_trip() {
        let procedure = Procedure::from_document(&document(), &catalog()).unwrap();
        assert_eq!(procedure.paths().len(), 3);

        let a2 = procedure.instruction(&"/s1/a2".parse().unwrap()).unwrap();
        assert_eq!(a2.conductor().id(), "acquire");
        assert_eq!(a2.variables().value("scans"), Some(&json!(3)));

        assert_eq!(procedure.to_document(), document());
    }

    #[test]
    fn unknown_conductor() {
        let mut document = document();
        document.instructions[0].children[1].conductor = "missing".into();

        let error = Procedure::from_document(&document, &catalog()).unwrap_err();
        match error {
            ProcedureError::UnknownConductor { path, conductor } => {
                assert_eq!(path.to_string(), "/s1/a2");
                assert_eq!(conductor, "missing");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn duplicate_sibling_ids() {
        let mut document = document();
        document.instructions[0].children[1].id = "a1".into();

        let error = Procedure::from_document(&document, &catalog()).unwrap_err();
        assert!(matches!(error, ProcedureError::DuplicateId { ref id, .. } if id == "a1"));
        assert!(error.to_string().contains("/s1"));
    }
}
