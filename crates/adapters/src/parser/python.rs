//! Tree-sitter Python parser adapter (spec.md §4.4).
//!
//! Net-new — the teacher has no structural-code-parsing adapter; this
//! walks a `tree-sitter-python` parse tree directly, in the same style
//! `crates/adapters/src/splitter.rs` uses `tree-sitter` for chunk-span
//! discovery.

use pyindex_domain::{
    CallSiteRecord, ClassEntity, ConcreteTreeRecord, EntityId, FileId, FunctionEntity,
    ImportEntity, LineSpan, MethodEntity, RefKind, SyntaxTreeRecord,
};
use pyindex_ports::{BoxFuture, ParsedFile, ParserPort};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use tree_sitter::{Node, Parser};

/// Parses Python source with `tree-sitter-python` into the structural
/// entities and unresolved call sites spec.md §4.4 names.
#[derive(Debug, Default)]
pub struct TreeSitterPythonParser;

impl TreeSitterPythonParser {
    /// Construct the parser. Stateless; a fresh `tree_sitter::Parser` is
    /// built per call since `tree_sitter::Parser` is not `Sync`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ParserPort for TreeSitterPythonParser {
    fn parse(
        &self,
        _ctx: &RequestContext,
        file_id: FileId,
        source_text: &str,
    ) -> BoxFuture<'_, Result<ParsedFile>> {
        let source_text = source_text.to_owned();
        Box::pin(async move { parse_source(file_id, &source_text) })
    }
}

fn parse_source(file_id: FileId, source_text: &str) -> Result<ParsedFile> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::internal(),
                format!("failed to load tree-sitter-python grammar: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;

    let tree = parser.parse(source_text, None).ok_or_else(|| {
        ErrorEnvelope::expected(ErrorCode::parse_error(), "tree-sitter produced no parse tree")
    })?;

    let mut walker = Walker::new(file_id, source_text);
    walker.walk_block(tree.root_node(), None);

    let has_docstring = walker.classes.iter().any(|c| c.docstring.is_some())
        || walker.methods.iter().any(|m| m.docstring.is_some())
        || walker.functions.iter().any(|f| f.docstring.is_some());
    let lines = u32::try_from(source_text.lines().count()).unwrap_or(u32::MAX);

    let serialized = tree.root_node().to_sexp().into_bytes();
    let tree_record = SyntaxTreeRecord::new(file_id, serialized);
    let concrete_record = ConcreteTreeRecord::new(file_id, source_text.to_owned());

    Ok(ParsedFile {
        tree: tree_record,
        concrete_tree: concrete_record,
        classes: walker.classes,
        methods: walker.methods,
        functions: walker.functions,
        imports: walker.imports,
        call_sites: walker.call_sites,
        has_docstring,
        lines,
    })
}

struct Walker<'src> {
    file_id: FileId,
    source: &'src str,
    next_id: i64,
    classes: Vec<ClassEntity>,
    methods: Vec<MethodEntity>,
    functions: Vec<FunctionEntity>,
    imports: Vec<ImportEntity>,
    call_sites: Vec<CallSiteRecord>,
}

impl<'src> Walker<'src> {
    fn new(file_id: FileId, source: &'src str) -> Self {
        Self {
            file_id,
            source,
            next_id: 1,
            classes: Vec::new(),
            methods: Vec::new(),
            functions: Vec::new(),
            imports: Vec::new(),
            call_sites: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> EntityId {
        loop {
            let id = self.next_id.max(1);
            self.next_id = id.wrapping_add(1);
            if let Ok(entity_id) = EntityId::new(id) {
                return entity_id;
            }
        }
    }

    fn text(&self, node: Node<'_>) -> &'src str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn span(node: Node<'_>) -> Option<LineSpan> {
        let start = u32::try_from(node.start_position().row).ok()? + 1;
        let end = u32::try_from(node.end_position().row).ok()? + 1;
        LineSpan::new(start, end).ok()
    }

    /// Walk every statement in a block (module body, class body, function
    /// body), tracking the enclosing class when present so
    /// `function_definition` nodes become methods instead of functions.
    fn walk_block(&mut self, node: Node<'_>, enclosing_class: Option<(EntityId, String)>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk_statement(child, enclosing_class.clone());
        }
    }

    fn walk_statement(&mut self, node: Node<'_>, enclosing_class: Option<(EntityId, String)>) {
        match node.kind() {
            "class_definition" => self.walk_class(node),
            "function_definition" => self.walk_function(node, enclosing_class),
            "import_statement" => self.walk_import_statement(node),
            "import_from_statement" => self.walk_import_from_statement(node),
            _ => {
                self.collect_call_sites(node, enclosing_class.as_ref().map(|(_, name)| name.as_str()));
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.walk_statement(child, enclosing_class.clone());
                }
            },
        }
    }

    fn walk_class(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(span) = Self::span(node) else { return };
        let name = self.text(name_node).to_owned();
        let id = self.alloc_id();
        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| self.leading_docstring(body));

        if let Some(bases) = node.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            for base in bases.children(&mut cursor) {
                if base.kind() == "identifier" {
                    self.call_sites.push(CallSiteRecord {
                        target_kind: RefKind::Inherit,
                        target_name: self.text(base).to_owned(),
                        owner_class: None,
                        line: span.start_line(),
                    });
                }
            }
        }

        self.classes.push(ClassEntity {
            id,
            file_id: self.file_id,
            name: name.clone(),
            qualified_name: name.clone(),
            span,
            docstring,
        });

        if let Some(body) = node.child_by_field_name("body") {
            self.walk_block(body, Some((id, name)));
        }
    }

    fn walk_function(&mut self, node: Node<'_>, enclosing_class: Option<(EntityId, String)>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(span) = Self::span(node) else { return };
        let name = self.text(name_node).to_owned();
        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| self.leading_docstring(body));

        if let Some((class_id, class_name)) = enclosing_class {
            let id = self.alloc_id();
            self.methods.push(MethodEntity {
                id,
                file_id: self.file_id,
                class_id,
                name: name.clone(),
                qualified_name: format!("{class_name}.{name}"),
                span,
                docstring,
            });
            if let Some(body) = node.child_by_field_name("body") {
                self.collect_call_sites(body, Some(class_name.as_str()));
            }
        } else {
            let id = self.alloc_id();
            self.functions.push(FunctionEntity {
                id,
                file_id: self.file_id,
                name: name.clone(),
                qualified_name: name.clone(),
                span,
                docstring,
            });
            if let Some(body) = node.child_by_field_name("body") {
                self.collect_call_sites(body, None);
            }
        }
    }

    fn leading_docstring(&self, body: Node<'_>) -> Option<String> {
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string_node = first.named_child(0)?;
        if string_node.kind() != "string" {
            return None;
        }
        Some(strip_string_literal(self.text(string_node)))
    }

    fn walk_import_statement(&mut self, node: Node<'_>) {
        let Some(span) = Self::span(node) else { return };
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let module = match child.kind() {
                "dotted_name" => self.text(child).to_owned(),
                "aliased_import" => child
                    .child_by_field_name("name")
                    .map(|inner| self.text(inner).to_owned())
                    .unwrap_or_default(),
                _ => continue,
            };
            if module.is_empty() {
                continue;
            }
            let id = self.alloc_id();
            self.imports.push(ImportEntity {
                id,
                file_id: self.file_id,
                module,
                name: None,
                start_line: span.start_line(),
            });
        }
    }

    fn walk_import_from_statement(&mut self, node: Node<'_>) {
        let Some(span) = Self::span(node) else { return };
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = self.text(module_node).to_owned();

        let mut cursor = node.walk();
        let mut any_name = false;
        for child in node.named_children(&mut cursor) {
            if child == module_node {
                continue;
            }
            let imported_name = match child.kind() {
                "dotted_name" | "identifier" => Some(self.text(child).to_owned()),
                "aliased_import" => child
                    .child_by_field_name("name")
                    .map(|inner| self.text(inner).to_owned()),
                "wildcard_import" => Some("*".to_owned()),
                _ => None,
            };
            if let Some(name) = imported_name {
                any_name = true;
                let id = self.alloc_id();
                self.imports.push(ImportEntity {
                    id,
                    file_id: self.file_id,
                    module: module.clone(),
                    name: Some(name),
                    start_line: span.start_line(),
                });
            }
        }
        if !any_name {
            let id = self.alloc_id();
            self.imports.push(ImportEntity {
                id,
                file_id: self.file_id,
                module,
                name: None,
                start_line: span.start_line(),
            });
        }
    }

    /// Recursively gather call/attribute sites under `node`, without
    /// descending into nested `class_definition`/`function_definition`
    /// bodies — those are walked separately so their call sites attribute
    /// to the right enclosing scope.
    fn collect_call_sites(&mut self, node: Node<'_>, owner_class: Option<&str>) {
        if matches!(node.kind(), "class_definition" | "function_definition") {
            return;
        }

        if node.kind() == "call" {
            if let Some(function_node) = node.child_by_field_name("function") {
                let line = u32::try_from(node.start_position().row).unwrap_or(0) + 1;
                match function_node.kind() {
                    "identifier" => {
                        let name = self.text(function_node).to_owned();
                        let kind = if name.chars().next().is_some_and(char::is_uppercase) {
                            RefKind::Instantiation
                        } else {
                            RefKind::Call
                        };
                        self.call_sites.push(CallSiteRecord {
                            target_kind: kind,
                            target_name: name,
                            owner_class: None,
                            line,
                        });
                    },
                    "attribute" => {
                        if let Some(attr) = function_node.child_by_field_name("attribute") {
                            let object_is_self = function_node
                                .child_by_field_name("object")
                                .map(|object| self.text(object))
                                == Some("self");
                            self.call_sites.push(CallSiteRecord {
                                target_kind: RefKind::Call,
                                target_name: self.text(attr).to_owned(),
                                owner_class: if object_is_self {
                                    owner_class.map(str::to_owned)
                                } else {
                                    None
                                },
                                line,
                            });
                        }
                    },
                    _ => {},
                }
            }
        } else if node.kind() == "attribute" && node.parent().map(|p| p.kind()) != Some("call") {
            if let Some(attr) = node.child_by_field_name("attribute") {
                let object_is_self =
                    node.child_by_field_name("object").map(|object| self.text(object)) == Some("self");
                if object_is_self {
                    let line = u32::try_from(node.start_position().row).unwrap_or(0) + 1;
                    self.call_sites.push(CallSiteRecord {
                        target_kind: RefKind::Attribute,
                        target_name: self.text(attr).to_owned(),
                        owner_class: owner_class.map(str::to_owned),
                        line,
                    });
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_call_sites(child, owner_class);
        }
    }
}

/// Strip the surrounding quotes (`"""`, `'''`, `"`, `'`) from a raw
/// tree-sitter `string` node's text, trimming whitespace afterward.
fn strip_string_literal(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim().to_owned();
        }
    }
    trimmed.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_shared::RequestContext;

    fn file_id() -> FileId {
        FileId::new(1).expect("valid file id")
    }

    #[tokio::test]
    async fn extracts_class_method_and_docstring() {
        let parser = TreeSitterPythonParser::new();
        let ctx = RequestContext::new_request();
        let source = "class Greeter:\n    \"\"\"Greets people.\"\"\"\n\n    def greet(self, name):\n        \"\"\"Say hello.\"\"\"\n        return f\"hello {name}\"\n";

        let parsed = parser.parse(&ctx, file_id(), source).await.expect("parse");
        assert_eq!(parsed.classes.len(), 1);
        assert_eq!(parsed.classes[0].name, "Greeter");
        assert_eq!(parsed.classes[0].docstring.as_deref(), Some("Greets people."));
        assert_eq!(parsed.methods.len(), 1);
        assert_eq!(parsed.methods[0].name, "greet");
        assert!(parsed.has_docstring);
    }

    #[tokio::test]
    async fn extracts_top_level_function_and_call_site() {
        let parser = TreeSitterPythonParser::new();
        let ctx = RequestContext::new_request();
        let source = "def helper():\n    pass\n\ndef main():\n    helper()\n";

        let parsed = parser.parse(&ctx, file_id(), source).await.expect("parse");
        assert_eq!(parsed.functions.len(), 2);
        assert!(parsed
            .call_sites
            .iter()
            .any(|site| site.target_name == "helper" && site.target_kind == RefKind::Call));
    }

    #[tokio::test]
    async fn extracts_imports() {
        let parser = TreeSitterPythonParser::new();
        let ctx = RequestContext::new_request();
        let source = "import os\nfrom collections import OrderedDict\n";

        let parsed = parser.parse(&ctx, file_id(), source).await.expect("parse");
        assert!(parsed.imports.iter().any(|import| import.module == "os"));
        assert!(parsed
            .imports
            .iter()
            .any(|import| import.module == "collections" && import.name.as_deref() == Some("OrderedDict")));
    }

    #[tokio::test]
    async fn extracts_inheritance_as_call_site() {
        let parser = TreeSitterPythonParser::new();
        let ctx = RequestContext::new_request();
        let source = "class Base:\n    pass\n\nclass Derived(Base):\n    pass\n";

        let parsed = parser.parse(&ctx, file_id(), source).await.expect("parse");
        assert!(parsed
            .call_sites
            .iter()
            .any(|site| site.target_name == "Base" && site.target_kind == RefKind::Inherit));
    }

    #[tokio::test]
    async fn recognizes_capitalized_call_as_instantiation() {
        let parser = TreeSitterPythonParser::new();
        let ctx = RequestContext::new_request();
        let source = "class Widget:\n    pass\n\ndef build():\n    return Widget()\n";

        let parsed = parser.parse(&ctx, file_id(), source).await.expect("parse");
        assert!(parsed
            .call_sites
            .iter()
            .any(|site| site.target_name == "Widget" && site.target_kind == RefKind::Instantiation));
    }
}
