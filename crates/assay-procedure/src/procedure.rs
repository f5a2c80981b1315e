//! Procedure trees
//!
//! A [`Procedure`] is a root id plus the ordered top-level instructions.
//! Instructions are addressed by absolute [`ExperimentPath`]s from the root;
//! there are no parent pointers.

use crate::error::ProcedureError;
use crate::instruction::{unique_children, upsert, Instruction};
use assay_declaration::{validate_id, ExperimentPath};

/// Immutable tree of instructions
#[derive(Debug, Clone)]
pub struct Procedure {
    id: String,
    instructions: im::Vector<Instruction>,
}

impl Procedure {
    /// Create an empty procedure
    ///
    /// # Errors
    /// Returns [`ProcedureError::Path`] if the id is not a valid path segment
    pub fn define(id: impl Into<String>) -> Result<Self, ProcedureError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self {
            id,
            instructions: im::Vector::new(),
        })
    }

    fn with_top_level(&self, instructions: im::Vector<Instruction>) -> Self {
        Self {
            id: self.id.clone(),
            instructions,
        }
    }

    /// Procedure id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rename the procedure
    ///
    /// # Errors
    /// Returns [`ProcedureError::Path`] if the id is not a valid path segment
    pub fn with_id(&self, id: impl Into<String>) -> Result<Self, ProcedureError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self {
            id,
            instructions: self.instructions.clone(),
        })
    }

    /// Top-level instructions in order
    pub fn independent_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    /// Instruction at an absolute path
    ///
    /// Relative paths without ancestor steps are read from the root.
    #[must_use]
    pub fn instruction(&self, path: &ExperimentPath) -> Option<&Instruction> {
        if path.ancestor_depth() > 0 {
            return None;
        }
        let mut ids = path.ids();
        let first = ids.next()?;
        self.instructions
            .iter()
            .find(|instruction| instruction.id() == first)?
            .descendant(ids)
    }

    /// Check if an instruction exists at a path
    #[must_use]
    pub fn contains(&self, path: &ExperimentPath) -> bool {
        self.instruction(path).is_some()
    }

    /// Every instruction with its absolute path, depth first in sibling order
    #[must_use]
    pub fn instructions(&self) -> Vec<(ExperimentPath, &Instruction)> {
        fn visit<'a>(
            path: ExperimentPath,
            instruction: &'a Instruction,
            out: &mut Vec<(ExperimentPath, &'a Instruction)>,
        ) {
            out.push((path.clone(), instruction));
            for child in instruction.children() {
                visit(path.resolve(child.id()), child, out);
            }
        }

        let mut out = Vec::new();
        let root = ExperimentPath::define_absolute();
        for instruction in &self.instructions {
            visit(root.resolve(instruction.id()), instruction, &mut out);
        }
        out
    }

    /// Every absolute instruction path, depth first in sibling order
    #[must_use]
    pub fn paths(&self) -> Vec<ExperimentPath> {
        self.instructions().into_iter().map(|(path, _)| path).collect()
    }

    /// Number of instructions in the whole tree
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions().len()
    }

    /// Check if there are no instructions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Add a top-level instruction, replacing any with the same id in place
    #[must_use]
    pub fn with_instruction(&self, instruction: Instruction) -> Self {
        let mut instructions = self.instructions.clone();
        upsert(&mut instructions, instruction);
        self.with_top_level(instructions)
    }

    /// Remove a top-level instruction
    #[must_use]
    pub fn without_instruction(&self, id: &str) -> Self {
        let mut instructions = self.instructions.clone();
        instructions.retain(|instruction| instruction.id() != id);
        self.with_top_level(instructions)
    }

    /// Replace all top-level instructions
    ///
    /// # Errors
    /// Returns [`ProcedureError::DuplicateId`] if two instructions share an id
    pub fn with_instructions(&self, instructions: impl IntoIterator<Item = Instruction>) -> Result<Self, ProcedureError> {
        let instructions = unique_children(&ExperimentPath::define_absolute(), instructions)?;
        Ok(self.with_top_level(instructions))
    }

    /// Add an instruction under the instruction at `parent`
    ///
    /// The root path adds a top-level instruction. A child with the same id
    /// is replaced in place.
    ///
    /// # Errors
    /// Returns [`ProcedureError::NoSuchInstruction`] if `parent` does not exist
    pub fn with_instruction_at(&self, parent: &ExperimentPath, instruction: Instruction) -> Result<Self, ProcedureError> {
        if parent.is_empty() && parent.ancestor_depth() == 0 {
            return Ok(self.with_instruction(instruction));
        }
        self.update_at(parent, |node| node.with_child(instruction))
    }

    /// Remove the instruction at a path, with its subtree
    ///
    /// # Errors
    /// Returns [`ProcedureError::NoSuchInstruction`] if nothing is at `path`
    pub fn without_instruction_at(&self, path: &ExperimentPath) -> Result<Self, ProcedureError> {
        let (Some(id), Some(parent)) = (path.id(), path.parent()) else {
            return Err(ProcedureError::NoSuchInstruction(path.clone()));
        };
        if !self.contains(path) {
            return Err(ProcedureError::NoSuchInstruction(path.clone()));
        }
        if parent.is_empty() {
            return Ok(self.without_instruction(id));
        }
        self.update_at(&parent, |node| node.without_child(id))
    }

    /// Replace the instruction at a non-root path with an edited copy
    fn update_at(
        &self,
        path: &ExperimentPath,
        edit: impl FnOnce(&Instruction) -> Instruction,
    ) -> Result<Self, ProcedureError> {
        let missing = || ProcedureError::NoSuchInstruction(path.clone());
        if path.ancestor_depth() > 0 {
            return Err(missing());
        }

        let mut ids = path.ids();
        let first = ids.next().ok_or_else(missing)?;
        let top = self
            .instructions
            .iter()
            .find(|instruction| instruction.id() == first)
            .ok_or_else(missing)?;

        // spine[0] is top level, spine[last] is the edited node
        let mut spine = vec![top.clone()];
        for id in ids {
            let next = spine
                .last()
                .and_then(|node| node.child(id))
                .cloned()
                .ok_or_else(missing)?;
            spine.push(next);
        }

        let mut rebuilt = edit(&spine.pop().ok_or_else(missing)?);
        while let Some(ancestor) = spine.pop() {
            rebuilt = ancestor.with_child(rebuilt);
        }
        Ok(self.with_instruction(rebuilt))
    }
}
