//! Structural entities extracted by the parser (spec.md §3, §4.4).

use crate::primitives::{EntityId, FileId};
use crate::spans::LineSpan;
use serde::{Deserialize, Serialize};

/// A class definition owned directly by a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntity {
    /// Row identifier, assigned by the Storage Engine.
    pub id: EntityId,
    /// Owning file.
    pub file_id: FileId,
    /// Simple name.
    pub name: String,
    /// Fully-qualified name (module path + name).
    pub qualified_name: String,
    /// Line span in the owning file's authoritative source.
    pub span: LineSpan,
    /// Docstring, if present.
    pub docstring: Option<String>,
}

/// A method definition, owned by exactly one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntity {
    /// Row identifier, assigned by the Storage Engine.
    pub id: EntityId,
    /// Owning file (denormalized for query convenience).
    pub file_id: FileId,
    /// Owning class.
    pub class_id: EntityId,
    /// Simple name.
    pub name: String,
    /// Fully-qualified name.
    pub qualified_name: String,
    /// Line span in the owning file.
    pub span: LineSpan,
    /// Docstring, if present.
    pub docstring: Option<String>,
}

/// A top-level function definition, owned directly by a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntity {
    /// Row identifier, assigned by the Storage Engine.
    pub id: EntityId,
    /// Owning file.
    pub file_id: FileId,
    /// Simple name.
    pub name: String,
    /// Fully-qualified name.
    pub qualified_name: String,
    /// Line span in the owning file.
    pub span: LineSpan,
    /// Docstring, if present.
    pub docstring: Option<String>,
}

/// An import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntity {
    /// Row identifier, assigned by the Storage Engine.
    pub id: EntityId,
    /// Owning file.
    pub file_id: FileId,
    /// Imported module path.
    pub module: String,
    /// Imported name, for `from module import name` forms.
    pub name: Option<String>,
    /// Line of the import statement.
    pub start_line: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> LineSpan {
        LineSpan::new(3, 9).expect("valid span")
    }

    fn file_id() -> FileId {
        FileId::new(1).expect("valid file id")
    }

    #[test]
    fn method_entity_carries_owning_class_and_file() {
        let class_id = EntityId::new(10).expect("valid entity id");
        let method = MethodEntity {
            id: EntityId::new(11).expect("valid entity id"),
            file_id: file_id(),
            class_id,
            name: "run".to_owned(),
            qualified_name: "pkg.Widget.run".to_owned(),
            span: span(),
            docstring: None,
        };
        assert_eq!(method.class_id, class_id);
        assert_eq!(method.span.start_line(), 3);
    }

    #[test]
    fn import_entity_allows_missing_name_for_bare_module_import() {
        let import = ImportEntity {
            id: EntityId::new(21).expect("valid entity id"),
            file_id: file_id(),
            module: "os".to_owned(),
            name: None,
            start_line: 1,
        };
        assert!(import.name.is_none());
    }
}
