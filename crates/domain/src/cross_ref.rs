//! Entity cross-references (spec.md §3, §4.4 "Cross-reference build").

use crate::primitives::{EntityId, FileId};
use serde::{Deserialize, Serialize};

/// The kind of entity a caller or callee component refers to.
///
/// Using an enum instead of three nullable foreign-key columns makes the
/// spec's CHECK constraint ("exactly one caller/callee component is
/// non-null") a structural property of the type rather than a runtime
/// invariant that must be separately validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    /// References a class.
    Class(EntityId),
    /// References a method.
    Method(EntityId),
    /// References a function.
    Function(EntityId),
}

impl EntityRef {
    /// Returns the wrapped entity id regardless of kind.
    #[must_use]
    pub const fn entity_id(self) -> EntityId {
        match self {
            Self::Class(id) | Self::Method(id) | Self::Function(id) => id,
        }
    }
}

/// The relationship a call-site record establishes between caller and
/// callee (spec.md §3 `ref_kind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// A direct function/method call.
    Call,
    /// A class instantiation (`Widget()`).
    Instantiation,
    /// An attribute access (`obj.attr`).
    Attribute,
    /// A base-class relationship (`class Foo(Bar)`).
    Inherit,
}

/// A resolved cross-reference between a caller entity and a callee entity
/// (spec.md §4.4 "Cross-reference build").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCrossRef {
    /// Exactly one caller-side entity.
    pub caller: EntityRef,
    /// Exactly one callee-side entity.
    pub callee: EntityRef,
    /// Nature of the reference.
    pub ref_kind: RefKind,
    /// File containing the call site.
    pub file_id: FileId,
    /// Line of the call site; must fall within the caller's span (checked
    /// by the resolver, not by this type, since the caller's span lives
    /// on a different entity record).
    pub line: u32,
}

impl EntityCrossRef {
    /// Construct a cross-reference. `caller`/`callee` being [`EntityRef`]
    /// values (not raw nullable ids) already guarantees exactly one
    /// component on each side.
    #[must_use]
    pub const fn new(
        caller: EntityRef,
        callee: EntityRef,
        ref_kind: RefKind,
        file_id: FileId,
        line: u32,
    ) -> Self {
        Self {
            caller,
            callee,
            ref_kind,
            file_id,
            line,
        }
    }
}

/// One unresolved call site, as the parser yields it (spec.md §4.4 "Parser
/// contract"): `(target_kind, target_name, owner_class?, line)`. Resolving
/// this into an [`EntityCrossRef`] requires looking up entities by name
/// across the project, which the parser — given only one file's source
/// text — cannot do; that resolution happens inside
/// `StoragePort::index_file`, in the same transaction that persists this
/// file's structural entities (spec.md §8: "Cross-reference build observes
/// the artifacts it just wrote because it runs inside the same atomic
/// update as the artifact writes").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteRecord {
    /// Nature of the reference.
    pub target_kind: RefKind,
    /// Simple or qualified name of the callee.
    pub target_name: String,
    /// Owning class of the callee, when known (`self.method()` style
    /// calls, or a base-class name for `Inherit`).
    pub owner_class: Option<String>,
    /// Line of the call site in the caller's file.
    pub line: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_id() -> FileId {
        FileId::new(1).expect("valid file id")
    }

    #[test]
    fn entity_ref_exposes_its_id_regardless_of_variant() {
        let id = EntityId::new(5).expect("valid entity id");
        assert_eq!(EntityRef::Method(id).entity_id(), id);
        assert_eq!(EntityRef::Function(id).entity_id(), id);
        assert_eq!(EntityRef::Class(id).entity_id(), id);
    }

    #[test]
    fn cross_ref_round_trips_through_serde_json() {
        let caller = EntityRef::Method(EntityId::new(1).expect("valid entity id"));
        let callee = EntityRef::Function(EntityId::new(2).expect("valid entity id"));
        let cross_ref = EntityCrossRef::new(caller, callee, RefKind::Call, file_id(), 42);

        let serialized = serde_json::to_string(&cross_ref).expect("serializes");
        let deserialized: EntityCrossRef =
            serde_json::from_str(&serialized).expect("deserializes");
        assert_eq!(cross_ref, deserialized);
    }
}
