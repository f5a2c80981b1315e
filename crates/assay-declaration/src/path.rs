//! Experiment paths for addressing nodes of a procedure tree
//!
//! Provides [`ExperimentPath`] for hierarchical addressing of instructions and
//! [`ProductPath`] for addressing a single production of the instruction at a
//! path.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Separator between path segments
pub const SEPARATOR: &str = "/";
/// Segment referring to the current node
pub const SELF: &str = ".";
/// Segment referring to the parent node
pub const PARENT: &str = "..";

/// Where a path is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Anchor {
    /// Anchored at the procedure root
    Absolute,
    /// Anchored at some node, after climbing the given number of ancestors
    Relative(usize),
}

/// Path within an experiment procedure tree
///
/// A path is a sequence of instruction ids, anchored either at the root of
/// the procedure (absolute) or at some node after climbing a number of
/// ancestor steps (relative). Paths carry no reference to any live node.
///
/// # Ordering
/// Relative paths with more ancestor steps sort first, then shallower
/// relative paths, then absolute paths. Paths with the same anchor compare
/// component-wise by id, with a proper prefix sorting before its extensions.
///
/// # Examples
/// - `/sample/stage` → absolute, ids `["sample", "stage"]`
/// - `../../spectrum` → relative, two ancestor steps, ids `["spectrum"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentPath {
    anchor: Anchor,
    ids: Vec<String>,
}

impl ExperimentPath {
    /// Empty absolute path (the procedure root)
    #[inline]
    #[must_use]
    pub fn define_absolute() -> Self {
        Self {
            anchor: Anchor::Absolute,
            ids: Vec::new(),
        }
    }

    /// Empty relative path (the current node)
    #[inline]
    #[must_use]
    pub fn define_relative() -> Self {
        Self::define_ancestor(0)
    }

    /// Empty relative path climbing the given number of ancestors
    #[inline]
    #[must_use]
    pub fn define_ancestor(ancestors: usize) -> Self {
        Self {
            anchor: Anchor::Relative(ancestors),
            ids: Vec::new(),
        }
    }

    /// Append a child id, returning new path
    #[inline]
    #[must_use]
    pub fn resolve(&self, id: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.ids.push(id.into());
        path
    }

    /// Append multiple child ids
    #[must_use]
    pub fn resolve_all<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = self.clone();
        path.ids.extend(ids.into_iter().map(Into::into));
        path
    }

    /// Get parent path
    ///
    /// Removes the last id. At the root of a relative path the ancestor step
    /// count is incremented instead; the root of an absolute path has no
    /// parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.ids.is_empty() {
            match self.anchor {
                Anchor::Absolute => None,
                Anchor::Relative(ancestors) => Some(Self::define_ancestor(ancestors + 1)),
            }
        } else {
            Some(Self {
                anchor: self.anchor,
                ids: self.ids[..self.ids.len() - 1].to_vec(),
            })
        }
    }

    /// Number of ancestor steps (always zero for absolute paths)
    #[inline]
    #[must_use]
    pub fn ancestor_depth(&self) -> usize {
        match self.anchor {
            Anchor::Absolute => 0,
            Anchor::Relative(ancestors) => ancestors,
        }
    }

    /// Iterator over ids from root to leaf
    ///
    /// The iterator is cheap to clone, so the sequence can be restarted.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.ids.iter().map(String::as_str)
    }

    /// Number of ids
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if there are no ids
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Last id (if any)
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    /// Check if path is anchored at the procedure root
    #[inline]
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.anchor == Anchor::Absolute
    }

    /// Resolve another path against this one
    ///
    /// An absolute `other` is returned unchanged. A relative `other` climbs
    /// its ancestor steps from this path then appends its ids.
    ///
    /// # Errors
    /// Returns [`PathError::OverResolved`] if `other` climbs past the root of
    /// this absolute path
    pub fn resolve_path(&self, other: &Self) -> Result<Self, PathError> {
        let climb = match other.anchor {
            Anchor::Absolute => return Ok(other.clone()),
            Anchor::Relative(ancestors) => ancestors,
        };

        if climb > self.ids.len() {
            return match self.anchor {
                Anchor::Absolute => Err(PathError::OverResolved {
                    path: other.to_string(),
                    base: self.to_string(),
                }),
                Anchor::Relative(ancestors) => Ok(Self {
                    anchor: Anchor::Relative(ancestors + climb - self.ids.len()),
                    ids: other.ids.clone(),
                }),
            };
        }

        let mut ids = self.ids[..self.ids.len() - climb].to_vec();
        ids.extend(other.ids.iter().cloned());
        Ok(Self {
            anchor: self.anchor,
            ids,
        })
    }

    /// Rebase this path onto an absolute path
    ///
    /// # Errors
    /// - [`PathError::NotAbsolute`] if `base` is relative
    /// - [`PathError::OverResolved`] if this path climbs past the root
    pub fn resolve_against(&self, base: &Self) -> Result<Self, PathError> {
        if !base.is_absolute() {
            return Err(PathError::NotAbsolute(base.to_string()));
        }
        base.resolve_path(self)
    }

    /// Interpret this path from the procedure root
    ///
    /// # Errors
    /// Returns [`PathError::OverResolved`] if the path has ancestor steps
    pub fn to_absolute(&self) -> Result<Self, PathError> {
        self.resolve_against(&Self::define_absolute())
    }

    /// Express this path relative to `base`
    ///
    /// # Errors
    /// Returns [`PathError::IncompatibleAnchors`] if the two paths are not
    /// anchored at the same place
    pub fn relative_to(&self, base: &Self) -> Result<Self, PathError> {
        if self.anchor != base.anchor {
            return Err(PathError::IncompatibleAnchors {
                path: self.to_string(),
                base: base.to_string(),
            });
        }

        let common = self
            .ids
            .iter()
            .zip(&base.ids)
            .take_while(|(a, b)| a == b)
            .count();

        Ok(Self {
            anchor: Anchor::Relative(base.ids.len() - common),
            ids: self.ids[common..].to_vec(),
        })
    }

    /// Check if this path is a strict ancestor of another
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.anchor == other.anchor
            && self.ids.len() < other.ids.len()
            && self.ids[..] == other.ids[..self.ids.len()]
    }
}

impl Ord for ExperimentPath {
    fn cmp(&self, other: &Self) -> Ordering {
        let anchors = match (self.anchor, other.anchor) {
            (Anchor::Absolute, Anchor::Absolute) => Ordering::Equal,
            (Anchor::Absolute, Anchor::Relative(_)) => Ordering::Greater,
            (Anchor::Relative(_), Anchor::Absolute) => Ordering::Less,
            (Anchor::Relative(a), Anchor::Relative(b)) => b.cmp(&a),
        };
        anchors.then_with(|| self.ids.cmp(&other.ids))
    }
}

impl PartialOrd for ExperimentPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ExperimentPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.anchor {
            Anchor::Absolute => write!(f, "{SEPARATOR}{}", self.ids.join(SEPARATOR)),
            Anchor::Relative(0) if self.ids.is_empty() => f.write_str(SELF),
            Anchor::Relative(ancestors) => {
                let segments: Vec<&str> = std::iter::repeat(PARENT)
                    .take(ancestors)
                    .chain(self.ids())
                    .collect();
                f.write_str(&segments.join(SEPARATOR))
            }
        }
    }
}

impl FromStr for ExperimentPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, rest) = match s.strip_prefix(SEPARATOR) {
            Some(rest) => (Self::define_absolute(), rest),
            None => (Self::define_relative(), s),
        };

        rest.split(SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .try_fold(start, |path, segment| match segment {
                SELF => Ok(path),
                PARENT => path.parent().ok_or_else(|| PathError::OverResolved {
                    path: s.to_string(),
                    base: SEPARATOR.to_string(),
                }),
                id => Ok(path.resolve(id)),
            })
    }
}

impl Default for ExperimentPath {
    fn default() -> Self {
        Self::define_absolute()
    }
}

impl Serialize for ExperimentPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExperimentPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

/// Check that an id can name an instruction
///
/// # Errors
/// Returns [`PathError::InvalidId`] for empty ids, ids containing the
/// separator, and the reserved segments `.` and `..`
pub fn validate_id(id: &str) -> Result<(), PathError> {
    if id.is_empty() || id.contains(SEPARATOR) || id == SELF || id == PARENT {
        Err(PathError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

/// Address of a production of the instruction at a path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductPath {
    experiment: ExperimentPath,
    production: String,
}

impl ProductPath {
    /// Separator between the experiment path and the production id
    pub const PRODUCTION_SEPARATOR: char = '#';

    /// Create new product path
    #[inline]
    #[must_use]
    pub fn define(experiment: ExperimentPath, production: impl Into<String>) -> Self {
        Self {
            experiment,
            production: production.into(),
        }
    }

    /// Path of the producing instruction
    #[inline]
    #[must_use]
    pub fn experiment_path(&self) -> &ExperimentPath {
        &self.experiment
    }

    /// Id of the production
    #[inline]
    #[must_use]
    pub fn production_id(&self) -> &str {
        &self.production
    }

    /// Rebase the experiment path onto an absolute path
    ///
    /// # Errors
    /// See [`ExperimentPath::resolve_against`]
    pub fn resolve_against(&self, base: &ExperimentPath) -> Result<Self, PathError> {
        Ok(Self {
            experiment: self.experiment.resolve_against(base)?,
            production: self.production.clone(),
        })
    }
}

impl Display for ProductPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.experiment,
            Self::PRODUCTION_SEPARATOR,
            self.production
        )
    }
}

impl FromStr for ProductPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (experiment, production) = s
            .rsplit_once(Self::PRODUCTION_SEPARATOR)
            .filter(|(_, production)| !production.is_empty())
            .ok_or_else(|| PathError::MissingProduction(s.to_string()))?;
        Ok(Self::define(experiment.parse()?, production))
    }
}

/// Errors related to experiment paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Relative path climbs past the root
    #[error("path '{path}' climbs past the root of '{base}'")]
    OverResolved { path: String, base: String },

    /// Expected an absolute path
    #[error("path '{0}' is not absolute")]
    NotAbsolute(String),

    /// Paths anchored at different places
    #[error("path '{path}' is not anchored like '{base}'")]
    IncompatibleAnchors { path: String, base: String },

    /// Id cannot name an instruction
    #[error("invalid id: '{0}'")]
    InvalidId(String),

    /// Product path without a production id
    #[error("product path '{0}' has no production id")]
    MissingProduction(String),
}
