//! Immutable instruction nodes
//!
//! An [`Instruction`] is a configured node bound to a conductor, with an
//! ordered list of uniquely identified children. Every edit returns a new
//! instruction; unchanged subtrees are shared between the old and new value.

use crate::conductor::Conductor;
use crate::error::ProcedureError;
use assay_declaration::{validate_id, ExperimentPath, Variables};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Node {
    id: String,
    variables: Variables,
    conductor: Arc<dyn Conductor>,
    children: im::Vector<Instruction>,
}

/// Configured node of a procedure tree
#[derive(Clone)]
pub struct Instruction {
    node: Arc<Node>,
}

impl Instruction {
    /// Create a leaf instruction with empty variables
    ///
    /// # Errors
    /// Returns [`ProcedureError::Path`] if the id is not a valid path segment
    pub fn define(id: impl Into<String>, conductor: Arc<dyn Conductor>) -> Result<Self, ProcedureError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self {
            node: Arc::new(Node {
                id,
                variables: Variables::new(),
                conductor,
                children: im::Vector::new(),
            }),
        })
    }

    fn edit(&self, change: impl FnOnce(&mut Node)) -> Self {
        let mut node = (*self.node).clone();
        change(&mut node);
        Self { node: Arc::new(node) }
    }

    /// Instruction id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.node.id
    }

    /// Configuration state
    #[inline]
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.node.variables
    }

    /// Bound conductor
    #[inline]
    #[must_use]
    pub fn conductor(&self) -> &Arc<dyn Conductor> {
        &self.node.conductor
    }

    /// Children in order
    pub fn children(&self) -> impl Iterator<Item = &Instruction> {
        self.node.children.iter()
    }

    /// Child with the given id
    #[must_use]
    pub fn child(&self, id: &str) -> Option<&Instruction> {
        self.node.children.iter().find(|child| child.id() == id)
    }

    /// Number of children
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.node.children.len()
    }

    /// Descendant reached by following ids
    pub fn descendant<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> Option<&Instruction> {
        match ids.next() {
            None => Some(self),
            Some(id) => self.child(id)?.descendant(ids),
        }
    }

    /// Change the id
    ///
    /// # Errors
    /// Returns [`ProcedureError::Path`] if the id is not a valid path segment
    pub fn with_id(&self, id: impl Into<String>) -> Result<Self, ProcedureError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(self.edit(|node| node.id = id))
    }

    /// Replace the configuration state
    #[must_use]
    pub fn with_variables(&self, variables: Variables) -> Self {
        self.edit(|node| node.variables = variables)
    }

    /// Set one variable
    #[must_use]
    pub fn with_variable(&self, id: impl Into<String>, value: Value) -> Self {
        let variables = self.node.variables.with_value(id, value);
        self.with_variables(variables)
    }

    /// Rebind to another conductor
    #[must_use]
    pub fn with_conductor(&self, conductor: Arc<dyn Conductor>) -> Self {
        self.edit(|node| node.conductor = conductor)
    }

    /// Add a child, replacing any child with the same id in place
    #[must_use]
    pub fn with_child(&self, child: Instruction) -> Self {
        self.edit(|node| upsert(&mut node.children, child))
    }

    /// Remove the child with the given id
    #[must_use]
    pub fn without_child(&self, id: &str) -> Self {
        self.edit(|node| node.children.retain(|child| child.id() != id))
    }

    /// Replace all children
    ///
    /// # Errors
    /// Returns [`ProcedureError::DuplicateId`] if two children share an id
    pub fn with_children(&self, children: impl IntoIterator<Item = Instruction>) -> Result<Self, ProcedureError> {
        let children = unique_children(&ExperimentPath::define_relative().resolve(self.id()), children)?;
        Ok(self.edit(|node| node.children = children))
    }

    /// Check if two nodes are configured alike
    ///
    /// Compares id, conductor id and variables; children are not compared.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
            || (self.id() == other.id()
                && self.conductor().id() == other.conductor().id()
                && self.variables() == other.variables())
    }
}

pub(crate) fn upsert(children: &mut im::Vector<Instruction>, child: Instruction) {
    match children.iter().position(|existing| existing.id() == child.id()) {
        Some(index) => {
            children.set(index, child);
        }
        None => children.push_back(child),
    }
}

pub(crate) fn unique_children(
    parent: &ExperimentPath,
    children: impl IntoIterator<Item = Instruction>,
) -> Result<im::Vector<Instruction>, ProcedureError> {
    let mut unique = im::Vector::new();
    for child in children {
        if unique.iter().any(|existing: &Instruction| existing.id() == child.id()) {
            return Err(ProcedureError::DuplicateId {
                parent: parent.clone(),
                id: child.id().to_string(),
            });
        }
        unique.push_back(child);
    }
    Ok(unique)
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("id", &self.node.id)
            .field("conductor", &self.node.conductor.id())
            .field("variables", &self.node.variables)
            .field("children", &self.node.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::error::ConductError;
    use assay_declaration::Declaration;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Idle {
        declaration: Declaration,
    }

    #[async_trait]
    impl Conductor for Idle {
        fn id(&self) -> &str {
            "idle"
        }

        fn declaration(&self) -> &Declaration {
            &self.declaration
        }

        async fn conduct(&self, _context: &dyn ExecutionContext) -> Result<(), ConductError> {
            Ok(())
        }
    }

    fn leaf(id: &str) -> Instruction {
        Instruction::define(id, Arc::new(Idle::default())).unwrap()
    }

    #[test]
    fn define_validates_id() {
        assert!(Instruction::define("a/b", Arc::new(Idle::default())).is_err());
        assert!(Instruction::define("..", Arc::new(Idle::default())).is_err());
    }

    #[test]
    fn with_child_returns_new_value() {
        let parent = leaf("parent");
        let edited = parent.with_child(leaf("a"));

        assert_eq!(parent.child_count(), 0);
        assert_eq!(edited.child_count(), 1);
        assert!(edited.child("a").is_some());
    }

    #[test]
    fn replacing_child_keeps_position() {
        let parent = leaf("p").with_child(leaf("a")).with_child(leaf("b")).with_child(leaf("c"));
        let edited = parent.with_child(leaf("b").with_variable("x", json!(1)));

        let ids: Vec<&str> = edited.children().map(Instruction::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(edited.child("b").unwrap().variables().value("x"), Some(&json!(1)));
    }

    #[test]
    fn without_child_removes() {
        let parent = leaf("p").with_child(leaf("a")).with_child(leaf("b"));
        let without = parent.without_child("a");
        let ids: Vec<&str> = without.children().map(Instruction::id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn with_children_rejects_duplicates() {
        let result = leaf("p").with_children([leaf("a"), leaf("a")]);
        assert!(matches!(result, Err(ProcedureError::DuplicateId { id, .. }) if id == "a"));
    }

    #[test]
    fn descendant_follows_ids() {
        let tree = leaf("p").with_child(leaf("a").with_child(leaf("b")));
        assert_eq!(tree.descendant(["a", "b"].into_iter()).map(Instruction::id), Some("b"));
        assert!(tree.descendant(["b"].into_iter()).is_none());
    }

    #[test]
    fn equivalence_ignores_children() {
        let a = leaf("x").with_variable("v", json!(1));
        let b = leaf("x").with_variable("v", json!(1)).with_child(leaf("c"));
        let c = leaf("x").with_variable("v", json!(2));

        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }
}
