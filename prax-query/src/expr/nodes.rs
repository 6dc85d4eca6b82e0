//! Projection and shaper extension nodes of the IR.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::Expr;
use crate::types::TypeRef;

/// A path of member names through nested record construction.
///
/// The empty path is the projection root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionMember(Vec<SmolStr>);

impl ProjectionMember {
    /// The root member.
    pub fn root() -> Self {
        Self(vec![])
    }

    /// Build a member from names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// A new member nested one level deeper.
    pub fn append(&self, name: impl Into<SmolStr>) -> Self {
        let mut names = self.0.clone();
        names.push(name.into());
        Self(names)
    }

    /// Push a name in place.
    pub fn push(&mut self, name: impl Into<SmolStr>) {
        self.0.push(name.into());
    }

    /// Pop the innermost name.
    pub fn pop(&mut self) -> Option<SmolStr> {
        self.0.pop()
    }

    /// Check if this is the root member.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Member names, outermost first.
    pub fn names(&self) -> &[SmolStr] {
        &self.0
    }

    /// Innermost name.
    pub fn last(&self) -> Option<&SmolStr> {
        self.0.last()
    }
}

impl fmt::Display for ProjectionMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        let names: Vec<&str> = self.0.iter().map(SmolStr::as_str).collect();
        f.write_str(&names.join("."))
    }
}

/// What a projection binding points at. Exactly one target by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingTarget {
    /// Position in the projection list.
    Index(usize),
    /// Member path mapped to a projection entry.
    Member(ProjectionMember),
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{}]", i),
            Self::Member(m) => write!(f, "{{{}}}", m),
        }
    }
}

/// Placeholder for a value read from the query's projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionBinding {
    /// Projection entry the value comes from.
    pub target: BindingTarget,
    /// Type of the bound value.
    pub ty: TypeRef,
}

impl ProjectionBinding {
    /// Bind by member path.
    pub fn member(member: ProjectionMember, ty: TypeRef) -> Self {
        Self {
            target: BindingTarget::Member(member),
            ty,
        }
    }

    /// Bind by projection index.
    pub fn index(index: usize, ty: TypeRef) -> Self {
        Self {
            target: BindingTarget::Index(index),
            ty,
        }
    }
}

impl fmt::Display for ProjectionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.ty)
    }
}

/// Direct reference to a stored field, by document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Element names from the document root.
    pub path: Vec<SmolStr>,
    /// Mapped property the field stores, if any.
    pub property: Option<SmolStr>,
    /// Type of the field.
    pub ty: TypeRef,
}

impl FieldRef {
    /// Dotted document path.
    pub fn dotted(&self) -> String {
        dotted(&self.path)
    }
}

/// Reference to an embedded or root document holding an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityProjection {
    /// Entity type stored in the document.
    pub entity_type: SmolStr,
    /// Element names from the document root; empty for the root itself.
    pub path: Vec<SmolStr>,
}

/// Reference to an embedded array of owned entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectArrayProjection {
    /// Element entity type.
    pub entity_type: SmolStr,
    /// Element names from the document root.
    pub path: Vec<SmolStr>,
    /// Navigation holding the array.
    pub navigation: SmolStr,
}

/// Where a structural shaper finds its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueBuffer {
    /// A projection entry of the result document.
    Binding(ProjectionBinding),
    /// A sub-document of the enclosing entity's document.
    Nested {
        /// Element name in the parent document.
        element: SmolStr,
    },
    /// The current element of an enclosing collection shaper.
    CurrentElement,
}

/// Shapes an entity instance out of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralShaper {
    /// Declared entity type.
    pub entity_type: SmolStr,
    /// Source document.
    pub value_buffer: ValueBuffer,
    /// Whether a missing document yields null.
    pub nullable: bool,
}

/// Shapes a sequence of owned entities out of an embedded array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionShaper {
    /// Element entity type.
    pub entity_type: SmolStr,
    /// Source array.
    pub value_buffer: ValueBuffer,
    /// Shaper run once per element, against [`ValueBuffer::CurrentElement`].
    pub element: Box<Expr>,
    /// Navigation that owns the array, if any.
    pub navigation: Option<SmolStr>,
}

/// Loads a navigation after its principal entity has been shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeExpr {
    /// Shaper of the principal entity.
    pub entity: Box<Expr>,
    /// Principal entity type.
    pub entity_type: SmolStr,
    /// Navigation being loaded.
    pub navigation: SmolStr,
    /// Shaper of the related data.
    pub related: Box<Expr>,
}

/// Reads one mapped property of the entity being materialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueBufferRead {
    /// Entity type declaring the property.
    pub entity_type: SmolStr,
    /// Property name.
    pub property: SmolStr,
    /// Property type.
    pub ty: TypeRef,
}

/// One property assignment of a materializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRead {
    /// Property name.
    pub property: SmolStr,
    /// Value expression, normally a [`Expr::ValueBufferRead`].
    pub read: Expr,
}

/// Materializer for one concrete type of a hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeVariant {
    /// Concrete entity type.
    pub entity_type: SmolStr,
    /// Discriminator value selecting this variant.
    pub discriminator: Option<SmolStr>,
    /// Property reads, base type properties first.
    pub reads: Vec<PropertyRead>,
}

/// Expanded form of a [`StructuralShaper`] with explicit property reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materialize {
    /// Declared entity type.
    pub entity_type: SmolStr,
    /// Source document.
    pub value_buffer: ValueBuffer,
    /// Whether a missing document yields null.
    pub nullable: bool,
    /// Element holding the discriminator, for hierarchies.
    pub discriminator_element: Option<SmolStr>,
    /// One variant per concrete type; the declared type comes first.
    pub variants: Vec<MaterializeVariant>,
}

/// Join element names with dots.
pub fn dotted(path: &[SmolStr]) -> String {
    let names: Vec<&str> = path.iter().map(SmolStr::as_str).collect();
    names.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_push_pop() {
        let mut member = ProjectionMember::root();
        assert!(member.is_root());
        member.push("Info");
        let nested = member.append("Title");
        assert_eq!(nested.to_string(), "Info.Title");
        assert_eq!(member.pop().as_deref(), Some("Info"));
        assert_eq!(member.to_string(), "<root>");
    }

    #[test]
    fn test_binding_display() {
        let binding = ProjectionBinding::index(2, TypeRef::Unknown);
        assert_eq!(binding.to_string(), "[2]: ?");
    }
}
