use crate::db::GraphStore;
use crate::error::Result;
use crate::indexer::builtins;
use crate::indexer::parse::ParsedSource;
use crate::model::{EdgeKind, IndexedFile, Label, NodeId, NodeKey, Span};
use crate::util;
use std::iter::Peekable;
use std::str::Chars;
use tree_sitter::Node;

/// Lexical position of the walk. Entering a class body resets the enclosing
/// function; entering a function body resets the enclosing class.
#[derive(Clone, Copy, Default)]
struct Context {
    in_class: bool,
    function: Option<NodeId>,
}

struct Extractor<'a> {
    store: &'a GraphStore,
    source: &'a str,
    file: &'a str,
    file_id: NodeId,
}

/// Walk one parsed file and upsert every entity and relationship it
/// declares. Each upsert stands alone: a failure part-way leaves earlier
/// writes in place.
pub fn extract_entities(
    store: &GraphStore,
    parsed: &ParsedSource,
    file: &str,
) -> Result<IndexedFile> {
    let file_id = store.merge_node(NodeKey::File { path: file }, None)?;
    let extractor = Extractor {
        store,
        source: &parsed.source,
        file,
        file_id,
    };
    extractor.walk(parsed.root(), Context::default())?;
    Ok(IndexedFile::indexed(file.to_string()))
}

impl Extractor<'_> {
    fn walk(&self, node: Node<'_>, ctx: Context) -> Result<()> {
        match node.kind() {
            "class_definition" => return self.handle_class(node, ctx),
            "function_definition" => {
                return self.handle_function(node, ctx);
            }
            "import_statement" => self.handle_import(node)?,
            "import_from_statement" => self.handle_from_import(node)?,
            "call" => self.handle_call(node, ctx)?,
            _ => {}
        }
        self.walk_children(node, ctx)
    }

    fn walk_children(&self, node: Node<'_>, ctx: Context) -> Result<()> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, ctx)?;
        }
        Ok(())
    }

    fn handle_class(&self, node: Node<'_>, ctx: Context) -> Result<()> {
        let Some(name_node) = node.child_by_field_name("name") else {
            return self.walk_children(node, ctx);
        };
        let name = node_text(name_node, self.source);
        let class_id = self.store.merge_node(
            NodeKey::Scoped {
                label: Label::Class,
                name: &name,
                file: self.file,
            },
            Some(span(node)),
        )?;
        self.store
            .merge_edge(self.file_id, EdgeKind::Contains, class_id)?;

        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if base.kind() != "identifier" {
                    continue;
                }
                let base_name = node_text(base, self.source);
                let base_id = self.store.merge_node(
                    NodeKey::Global {
                        label: Label::Class,
                        name: &base_name,
                    },
                    None,
                )?;
                self.store
                    .merge_edge(class_id, EdgeKind::InheritsFrom, base_id)?;
            }
            self.walk(superclasses, ctx)?;
        }

        let body = node.child_by_field_name("body");
        if let Some(body) = body {
            self.attach_docstring(class_id, body)?;
            let inner = Context {
                in_class: true,
                function: None,
            };
            self.walk_children(body, inner)?;
        }
        Ok(())
    }

    fn handle_function(&self, node: Node<'_>, ctx: Context) -> Result<()> {
        let Some(name_node) = node.child_by_field_name("name") else {
            return self.walk_children(node, ctx);
        };
        let name = node_text(name_node, self.source);
        let label = if ctx.in_class {
            Label::Method
        } else {
            Label::Function
        };
        let function_id = self.store.merge_node(
            NodeKey::Scoped {
                label,
                name: &name,
                file: self.file,
            },
            Some(span(node)),
        )?;
        self.store
            .merge_edge(self.file_id, EdgeKind::Contains, function_id)?;

        if let Some(parameters) = node.child_by_field_name("parameters") {
            for param in positional_parameters(parameters, self.source) {
                let param_id = self.store.merge_node(
                    NodeKey::Global {
                        label: Label::Parameter,
                        name: &param,
                    },
                    None,
                )?;
                self.store
                    .merge_edge(function_id, EdgeKind::HasParameter, param_id)?;
            }
        }

        if let Some(parent) = node.parent()
            && parent.kind() == "decorated_definition"
        {
            let mut cursor = parent.walk();
            for decorator in parent.named_children(&mut cursor) {
                if decorator.kind() != "decorator" {
                    continue;
                }
                let Some(dec_name) = decorator_name(decorator, self.source) else {
                    continue;
                };
                let dec_id = self.store.merge_node(
                    NodeKey::Global {
                        label: Label::Decorator,
                        name: &dec_name,
                    },
                    None,
                )?;
                self.store
                    .merge_edge(function_id, EdgeKind::DecoratedBy, dec_id)?;
            }
        }

        // Defaults and annotations evaluate in the enclosing scope.
        for field in ["parameters", "return_type"] {
            if let Some(child) = node.child_by_field_name(field) {
                self.walk(child, ctx)?;
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.attach_docstring(function_id, body)?;
            let inner = Context {
                in_class: false,
                function: Some(function_id),
            };
            self.walk_children(body, inner)?;
        }
        Ok(())
    }

    fn handle_import(&self, node: Node<'_>) -> Result<()> {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let module = match name.kind() {
                "dotted_name" => Some(node_text(name, self.source)),
                "aliased_import" => name
                    .child_by_field_name("name")
                    .map(|dotted| node_text(dotted, self.source)),
                _ => None,
            };
            if let Some(module) = module {
                self.record_import(&module)?;
            }
        }
        Ok(())
    }

    fn handle_from_import(&self, node: Node<'_>) -> Result<()> {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return Ok(());
        };
        let module = match module_node.kind() {
            "dotted_name" => Some(node_text(module_node, self.source)),
            // `from ..pkg import x` keeps `pkg`; `from . import x` names no module.
            "relative_import" => {
                let mut cursor = module_node.walk();
                let dotted = module_node
                    .named_children(&mut cursor)
                    .find(|child| child.kind() == "dotted_name");
                dotted.map(|dotted| node_text(dotted, self.source))
            }
            _ => None,
        };
        match module {
            Some(module) => self.record_import(&module),
            None => Ok(()),
        }
    }

    fn record_import(&self, module: &str) -> Result<()> {
        if module.is_empty() || builtins::is_excluded_import(module) {
            return Ok(());
        }
        let import_id = self.store.merge_node(
            NodeKey::Global {
                label: Label::Import,
                name: module,
            },
            None,
        )?;
        let module_id = self.store.merge_node(
            NodeKey::Global {
                label: Label::Module,
                name: module,
            },
            None,
        )?;
        self.store
            .merge_edge(self.file_id, EdgeKind::Imports, import_id)?;
        self.store
            .merge_edge(import_id, EdgeKind::DependsOn, module_id)?;
        Ok(())
    }

    fn handle_call(&self, node: Node<'_>, ctx: Context) -> Result<()> {
        let Some(caller_id) = ctx.function else {
            return Ok(());
        };
        let Some(callee) = node
            .child_by_field_name("function")
            .filter(|func| func.kind() == "identifier")
        else {
            return Ok(());
        };
        let callee = node_text(callee, self.source);
        if builtins::is_builtin(&callee) {
            return Ok(());
        }
        let callee_id = self.store.merge_node(
            NodeKey::Global {
                label: Label::Function,
                name: &callee,
            },
            None,
        )?;
        self.store
            .merge_edge(caller_id, EdgeKind::Calls, callee_id)?;
        self.store
            .merge_edge(caller_id, EdgeKind::DependsOn, callee_id)?;
        Ok(())
    }

    fn attach_docstring(&self, owner: NodeId, body: Node<'_>) -> Result<()> {
        let Some(raw) = extract_docstring(body, self.source) else {
            return Ok(());
        };
        let text = util::clean_docstring(&raw);
        if text.is_empty() {
            return Ok(());
        }
        let doc_id = self.store.create_node(Label::Docstring, &text)?;
        self.store
            .merge_edge(owner, EdgeKind::DocumentedBy, doc_id)
    }
}

/// Names a call may bind by position: everything before `*`, `*args` or a
/// keyword-only marker, minus anything before a positional-only `/`.
fn positional_parameters(parameters: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = parameters.walk();
    for param in parameters.named_children(&mut cursor) {
        match param.kind() {
            "identifier" => names.push(node_text(param, source)),
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = param.child_by_field_name("name") {
                    names.push(node_text(name, source));
                }
            }
            "typed_parameter" => match param.named_child(0) {
                Some(inner) if inner.kind() == "identifier" => {
                    names.push(node_text(inner, source));
                }
                Some(inner) if inner.kind() == "list_splat_pattern" => break,
                _ => {}
            },
            "positional_separator" => names.clear(),
            "list_splat_pattern" | "keyword_separator" => break,
            _ => {}
        }
    }
    names
}

fn decorator_name(decorator: Node<'_>, source: &str) -> Option<String> {
    let expr = decorator.named_child(0)?;
    match expr.kind() {
        "identifier" => Some(node_text(expr, source)),
        "attribute" => expr
            .child_by_field_name("attribute")
            .map(|attr| node_text(attr, source)),
        _ => None,
    }
}

fn span(node: Node<'_>) -> Span {
    Span {
        start: node.start_position().row as i64 + 1,
        end: node.end_position().row as i64 + 1,
    }
}

fn node_text(node: Node<'_>, source: &str) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    source.get(start..end).unwrap_or("").trim().to_string()
}

/// Value of the string literal opening `body`, if any. Implicitly
/// concatenated literals are joined.
fn extract_docstring(body: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    match expr.kind() {
        "string" => string_value(expr, source),
        "concatenated_string" => {
            let mut cursor = expr.walk();
            let mut joined = String::new();
            for part in expr.named_children(&mut cursor) {
                match part.kind() {
                    "string" => joined.push_str(&string_value(part, source)?),
                    "comment" => {}
                    _ => return None,
                }
            }
            Some(joined)
        }
        _ => None,
    }
}

fn string_value(string_node: Node<'_>, source: &str) -> Option<String> {
    if is_interpolated(string_node, source) {
        return None;
    }
    let text = node_text(string_node, source);
    let (prefix, body) = split_string_literal(&text)?;
    // Python reads source with universal newlines.
    let body = body.replace("\r\n", "\n").replace('\r', "\n");
    if prefix.chars().any(|ch| ch.eq_ignore_ascii_case(&'r')) {
        Some(body)
    } else {
        Some(decode_escapes(&body))
    }
}

fn is_interpolated(string_node: Node<'_>, source: &str) -> bool {
    let mut cursor = string_node.walk();
    let has_interpolation = string_node
        .named_children(&mut cursor)
        .any(|child| child.kind() == "interpolation");
    has_interpolation
        || node_text(string_node, source)
            .chars()
            .take_while(|ch| ch.is_ascii_alphabetic())
            .any(|ch| ch.eq_ignore_ascii_case(&'f') || ch.eq_ignore_ascii_case(&'b'))
}

/// Split a literal into its prefix letters and the text between the quotes.
fn split_string_literal(raw: &str) -> Option<(&str, &str)> {
    let trimmed = raw.trim();
    let prefix_len = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_alphabetic())
        .map(|(offset, _)| offset)?;
    let (prefix, rest) = trimmed.split_at(prefix_len);
    for quote in ["'''", "\"\"\"", "\"", "'"] {
        if rest.len() >= quote.len() * 2 && rest.starts_with(quote) && rest.ends_with(quote) {
            return Some((prefix, &rest[quote.len()..rest.len() - quote.len()]));
        }
    }
    None
}

/// Decode the backslash escapes of a non-raw literal. Unknown or malformed
/// escapes, `\N{...}` included, are kept verbatim.
fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\n' => {}
            '\\' | '\'' | '"' => out.push(escape),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let digits = format!("{escape}{}", take_digits(&mut chars, 8, 2));
                push_code_point(&mut out, &digits, 8);
            }
            'x' | 'u' | 'U' => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits = take_digits(&mut chars, 16, width);
                if digits.len() == width {
                    push_code_point(&mut out, &digits, 16);
                } else {
                    out.push('\\');
                    out.push(escape);
                    out.push_str(&digits);
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

fn take_digits(chars: &mut Peekable<Chars<'_>>, radix: u32, max: usize) -> String {
    let mut digits = String::new();
    while digits.len() < max {
        match chars.peek() {
            Some(&ch) if ch.is_digit(radix) => {
                digits.push(ch);
                chars.next();
            }
            _ => break,
        }
    }
    digits
}

fn push_code_point(out: &mut String, digits: &str, radix: u32) {
    let ch = u32::from_str_radix(digits, radix)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    out.push(ch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parse::parse_source;
    use std::path::Path;

    fn params_of(src: &str) -> Vec<String> {
        let parsed = parse_source(Path::new("t.py"), src.to_string()).unwrap();
        let func = parsed.root().named_child(0).unwrap();
        let params = func.child_by_field_name("parameters").unwrap();
        positional_parameters(params, &parsed.source)
    }

    #[test]
    fn positional_parameters_skip_special_forms() {
        assert_eq!(params_of("def f(a, b=1, *args, c, **kw): pass\n"), ["a", "b"]);
        assert_eq!(params_of("def f(a, /, b, *, c): pass\n"), ["b"]);
        assert_eq!(
            params_of("def f(self, x: int, y: str = 'a', *rest: int): pass\n"),
            ["self", "x", "y"]
        );
        assert!(params_of("def f(**kw): pass\n").is_empty());
    }

    #[test]
    fn split_handles_prefixes_and_triple_quotes() {
        assert_eq!(split_string_literal("\"\"\"doc\"\"\""), Some(("", "doc")));
        assert_eq!(split_string_literal("r'raw'"), Some(("r", "raw")));
        assert_eq!(split_string_literal("'''x'''"), Some(("", "x")));
        assert_eq!(split_string_literal("noquotes"), None);
    }

    #[test]
    fn escapes_decode_like_python() {
        assert_eq!(decode_escapes(r#"a\tb \"q\" \'s\' \\"#), "a\tb \"q\" 's' \\");
        assert_eq!(
            decode_escapes(r"\x41é\U0001F600\101\0"),
            "A\u{e9}\u{1F600}A\0"
        );
        assert_eq!(decode_escapes("line \\\nnext"), "line next");
        assert_eq!(decode_escapes(r"\d \N{DASH} \x4"), r"\d \N{DASH} \x4");
        assert_eq!(decode_escapes(r"\ud800"), "\u{FFFD}");
        assert_eq!(decode_escapes("trailing \\"), "trailing \\");
    }

    #[test]
    fn decorator_names_resolve_bare_and_attribute() {
        let src = "@cache\n@app.route\n@wrap(1)\ndef f(): pass\n";
        let parsed = parse_source(Path::new("t.py"), src.to_string()).unwrap();
        let decorated = parsed.root().named_child(0).unwrap();
        let mut cursor = decorated.walk();
        let names: Vec<_> = decorated
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "decorator")
            .filter_map(|n| decorator_name(n, &parsed.source))
            .collect();
        assert_eq!(names, ["cache", "route"]);
    }
}
