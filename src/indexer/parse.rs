use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

/// A successfully parsed Python source file.
pub struct ParsedSource {
    pub source: String,
    pub tree: Tree,
}

impl ParsedSource {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Number of named syntax nodes in the tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.tree.walk();
        loop {
            if cursor.node().is_named() {
                count += 1;
            }
            if cursor.goto_first_child() || cursor.goto_next_sibling() {
                continue;
            }
            loop {
                if !cursor.goto_parent() {
                    return count;
                }
                if cursor.goto_next_sibling() {
                    break;
                }
            }
        }
    }
}

fn new_parser(file: &Path) -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|err| Error::Parse {
            file: file.to_path_buf(),
            reason: format!("load python grammar: {err}"),
        })?;
    Ok(parser)
}

/// Parse `source`; trees containing error or missing nodes are rejected.
pub fn parse_source(file: &Path, source: String) -> Result<ParsedSource> {
    let mut parser = new_parser(file)?;
    let tree = parser.parse(&source, None).ok_or_else(|| Error::Parse {
        file: file.to_path_buf(),
        reason: "parser produced no tree".to_string(),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        let reason = match first_error(root) {
            Some(node) if node.is_missing() => format!(
                "missing {} at line {}, column {}",
                node.kind(),
                node.start_position().row + 1,
                node.start_position().column + 1
            ),
            Some(node) => format!(
                "invalid syntax at line {}, column {}",
                node.start_position().row + 1,
                node.start_position().column + 1
            ),
            None => "invalid syntax".to_string(),
        };
        return Err(Error::Parse {
            file: file.to_path_buf(),
            reason,
        });
    }
    Ok(ParsedSource { source, tree })
}

/// Read `path` and parse it. Non-UTF-8 content is a parse error.
pub fn read_and_parse(path: &Path) -> Result<ParsedSource> {
    let bytes = fs::read(path).map_err(|source| Error::Io {
        file: path.to_path_buf(),
        source,
    })?;
    let source = String::from_utf8(bytes).map_err(|err| Error::Parse {
        file: path.to_path_buf(),
        reason: format!("source is not valid UTF-8: {err}"),
    })?;
    parse_source(path, source)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_source_parses() {
        let parsed = parse_source(Path::new("a.py"), "def f(x):\n    return x\n".into()).unwrap();
        assert_eq!(parsed.root().kind(), "module");
        assert!(parsed.node_count() >= 5);
    }

    #[test]
    fn broken_source_is_parse_error() {
        let err = parse_source(Path::new("bad.py"), "def f(:\n".into())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "parse_error");
        assert!(err.to_string().contains("bad.py"));
    }

    #[test]
    fn empty_source_is_valid() {
        let parsed = parse_source(Path::new("empty.py"), String::new()).unwrap();
        assert_eq!(parsed.node_count(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_and_parse(Path::new("/definitely/not/here.py"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn non_utf8_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.py");
        std::fs::write(&path, b"x = '\xff\xfe'\n").unwrap();
        let err = read_and_parse(&path).err().unwrap();
        assert_eq!(err.kind(), "parse_error");
    }
}
