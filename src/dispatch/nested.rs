//! Brace-nested command expansion.
//!
//! A doubled command sigil opens a mini-language where `{...}` groups are
//! resolved inside-out: each comma-separated alternative in a group is run
//! as a sub-command, its reply text (or the literal itself when nothing
//! answers) standing in for the group. Sibling alternatives expand
//! positionally, so `a{1,2,3}b` yields `a1b`, `a2b`, `a3b`.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

/// Scan errors, counting how unbalanced the braces were.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("missing {0} closing brace(s)")]
    MissingClosing(usize),
    #[error("missing {0} opening brace(s)")]
    MissingOpening(usize),
}

/// One node of the scanned tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text between braces.
    Leaf(String),
    /// A `{...}` group.
    Group(Vec<Node>),
}

/// Runs one expanded sub-command and returns its non-empty reply texts.
#[async_trait]
pub trait SubExecutor: Sync {
    async fn run(&self, command: &str) -> Vec<String>;
}

/// Scan brace-structured text into a tree.
///
/// A backslash escapes the following `{`, `}` or `\` and is deleted; before
/// any other character it stays literal. Unbalanced input is rejected with
/// a count of the missing braces.
pub fn scan(input: &str) -> Result<Vec<Node>, ScanError> {
    check_balance(input)?;

    let mut stack: Vec<Vec<Node>> = vec![Vec::new()];
    let mut buf = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ ('{' | '}' | '\\')) => buf.push(next),
                Some(next) => {
                    buf.push('\\');
                    buf.push(next);
                }
                None => buf.push('\\'),
            },
            '{' => {
                flush(&mut stack, &mut buf);
                stack.push(Vec::new());
            }
            '}' => {
                flush(&mut stack, &mut buf);
                // Balance was checked up front; a lone frame means a bug.
                let group = stack.pop().unwrap_or_default();
                match stack.last_mut() {
                    Some(parent) => parent.push(Node::Group(group)),
                    None => return Err(ScanError::MissingOpening(1)),
                }
            }
            _ => buf.push(c),
        }
    }

    flush(&mut stack, &mut buf);
    Ok(stack.pop().unwrap_or_default())
}

fn flush(stack: &mut Vec<Vec<Node>>, buf: &mut String) {
    if buf.is_empty() {
        return;
    }
    if let Some(frame) = stack.last_mut() {
        frame.push(Node::Leaf(std::mem::take(buf)));
    }
}

fn check_balance(input: &str) -> Result<(), ScanError> {
    let mut depth: usize = 0;
    let mut missing_open = 0;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    missing_open += 1;
                } else {
                    depth -= 1;
                }
            }
            _ => {}
        }
    }
    if missing_open > 0 {
        Err(ScanError::MissingOpening(missing_open))
    } else if depth > 0 {
        Err(ScanError::MissingClosing(depth))
    } else {
        Ok(())
    }
}

enum Column {
    Literal(String),
    Alts(Vec<String>),
}

/// Expand a scanned tree into the command lines to run, innermost groups
/// first, siblings zipped positionally.
pub async fn expand(nodes: &[Node], exec: &dyn SubExecutor) -> Vec<String> {
    expand_level(nodes, exec).await
}

fn expand_level<'a>(nodes: &'a [Node], exec: &'a dyn SubExecutor) -> BoxFuture<'a, Vec<String>> {
    Box::pin(async move {
        let mut columns = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Leaf(text) => columns.push(Column::Literal(text.clone())),
                Node::Group(children) => {
                    columns.push(Column::Alts(resolve_group(children, exec).await));
                }
            }
        }

        let width = columns
            .iter()
            .map(|c| match c {
                Column::Alts(alts) => alts.len(),
                Column::Literal(_) => 1,
            })
            .max()
            .unwrap_or(0)
            .max(1);

        (0..width)
            .map(|n| {
                columns
                    .iter()
                    .map(|c| match c {
                        Column::Literal(text) => text.as_str(),
                        Column::Alts(alts) => alts.get(n).map(String::as_str).unwrap_or(""),
                    })
                    .collect()
            })
            .collect()
    })
}

/// Resolve a group into its alternatives: expand its children, split on
/// commas, and run each piece. Replies replace the piece; a piece nothing
/// answers stands in literally.
fn resolve_group<'a>(children: &'a [Node], exec: &'a dyn SubExecutor) -> BoxFuture<'a, Vec<String>> {
    Box::pin(async move {
        let mut alts = Vec::new();
        for command in expand_level(children, exec).await {
            for piece in command.split(',') {
                let replies = exec.run(piece).await;
                if replies.is_empty() {
                    alts.push(piece.to_string());
                } else {
                    alts.extend(replies);
                }
            }
        }
        alts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapExecutor(HashMap<&'static str, Vec<&'static str>>);

    #[async_trait]
    impl SubExecutor for MapExecutor {
        async fn run(&self, command: &str) -> Vec<String> {
            self.0
                .get(command)
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        }
    }

    fn silent() -> MapExecutor {
        MapExecutor(HashMap::new())
    }

    #[test]
    fn test_scan_flat() {
        assert_eq!(
            scan("plain text").unwrap(),
            vec![Node::Leaf("plain text".to_string())]
        );
    }

    #[test]
    fn test_scan_nested() {
        let tree = scan("a{b{c}d}e").unwrap();
        assert_eq!(
            tree,
            vec![
                Node::Leaf("a".to_string()),
                Node::Group(vec![
                    Node::Leaf("b".to_string()),
                    Node::Group(vec![Node::Leaf("c".to_string())]),
                    Node::Leaf("d".to_string()),
                ]),
                Node::Leaf("e".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_escapes() {
        assert_eq!(
            scan(r"a\{b\}c\\d").unwrap(),
            vec![Node::Leaf(r"a{b}c\d".to_string())]
        );
        // Backslash before anything else stays literal
        assert_eq!(
            scan(r"a\nb").unwrap(),
            vec![Node::Leaf(r"a\nb".to_string())]
        );
    }

    #[test]
    fn test_scan_unbalanced() {
        assert_eq!(scan("a{b{c}"), Err(ScanError::MissingClosing(1)));
        assert_eq!(scan("{{"), Err(ScanError::MissingClosing(2)));
        assert_eq!(scan("a}b}"), Err(ScanError::MissingOpening(2)));
        // Escaped braces do not count
        assert!(scan(r"\{\}").is_ok());
    }

    #[tokio::test]
    async fn test_expand_zips_alternatives() {
        let tree = scan("a{1,2,3}b").unwrap();
        let out = expand(&tree, &silent()).await;
        assert_eq!(out, vec!["a1b", "a2b", "a3b"]);
    }

    #[tokio::test]
    async fn test_expand_short_group_pads_empty() {
        let tree = scan("{1,2,3}x{8,9}").unwrap();
        let out = expand(&tree, &silent()).await;
        assert_eq!(out, vec!["1x8", "2x9", "3x"]);
    }

    #[tokio::test]
    async fn test_expand_replaces_with_replies() {
        let exec = MapExecutor(HashMap::from([
            ("echo hi", vec!["hi"]),
            ("rev ab", vec!["ba"]),
        ]));
        let tree = scan("say {echo hi} and {rev ab}").unwrap();
        let out = expand(&tree, &exec).await;
        assert_eq!(out, vec!["say hi and ba"]);
    }

    #[tokio::test]
    async fn test_expand_multi_reply_fans_out() {
        let exec = MapExecutor(HashMap::from([("list", vec!["one", "two"])]));
        let tree = scan("got {list}").unwrap();
        let out = expand(&tree, &exec).await;
        assert_eq!(out, vec!["got one", "got two"]);
    }

    #[tokio::test]
    async fn test_expand_innermost_first() {
        let exec = MapExecutor(HashMap::from([
            ("inner", vec!["X"]),
            ("wrap X", vec!["Y"]),
        ]));
        let tree = scan("{wrap {inner}}!").unwrap();
        let out = expand(&tree, &exec).await;
        assert_eq!(out, vec!["Y!"]);
    }
}
