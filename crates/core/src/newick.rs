//! Species tree in Newick form.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Leaf order follows a
//! post-order traversal, which is the order the experiment's `sequences`
//! attribute is written in.

use crate::error::{CactusError, CactusResult};
use std::fmt;

/// Index of a node in a [`SpeciesTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
struct Node {
    name: Option<String>,
    branch_length: Option<f64>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Rooted species tree
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl SpeciesTree {
    /// Parse a Newick string such as `((human:0.006,chimp:0.006)hc:0.1,mouse:0.3);`
    pub fn parse(newick: &str) -> CactusResult<Self> {
        let mut parser = Parser {
            input: newick.as_bytes(),
            pos: 0,
            nodes: Vec::new(),
        };
        parser.skip_whitespace();
        let root = parser.tree()?;
        parser.skip_whitespace();
        if parser.peek() == Some(b';') {
            parser.pos += 1;
            parser.skip_whitespace();
        }
        if parser.pos != parser.input.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            nodes: parser.nodes,
            root,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, internal ones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].name.as_deref()
    }

    pub fn branch_length(&self, node: NodeId) -> Option<f64> {
        self.nodes[node.0].branch_length
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node.0].children.is_empty()
    }

    /// All nodes, children before their parent, siblings left to right
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        // (node, children already pushed)
        let mut stack = vec![(self.root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
            } else {
                stack.push((node, true));
                for child in self.children(node).iter().rev() {
                    stack.push((*child, false));
                }
            }
        }
        order
    }

    /// Leaves in post-order
    pub fn leaves(&self) -> Vec<NodeId> {
        self.post_order()
            .into_iter()
            .filter(|node| self.is_leaf(*node))
            .collect()
    }

    /// Leaf names in post-order; unnamed leaves are reported as empty strings
    pub fn leaf_names(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .map(|node| self.name(node).unwrap_or(""))
            .collect()
    }

    /// Look up a node by name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name.as_deref() == Some(name))
            .map(NodeId)
    }

    /// Re-root the tree above an outgroup leaf.
    ///
    /// The new root has two children: the previous root and a leaf called
    /// `name` at branch length `distance`.
    pub fn add_outgroup(&mut self, name: &str, distance: f64) -> CactusResult<NodeId> {
        if self.find(name).is_some() {
            return Err(CactusError::InvalidInput(format!(
                "outgroup '{}' is already in the species tree",
                name
            )));
        }

        let old_root = self.root;
        let outgroup = NodeId(self.nodes.len());
        let new_root = NodeId(self.nodes.len() + 1);

        self.nodes.push(Node {
            name: Some(name.to_string()),
            branch_length: Some(distance),
            parent: Some(new_root),
            children: Vec::new(),
        });
        self.nodes.push(Node {
            name: None,
            branch_length: None,
            parent: None,
            children: vec![old_root, outgroup],
        });
        self.nodes[old_root.0].parent = Some(new_root);
        self.root = new_root;

        Ok(outgroup)
    }

    /// Serialize to Newick, terminated with `;`
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        enum Visit {
            Enter(NodeId),
            Exit(NodeId),
            Comma,
        }

        let mut stack = vec![Visit::Enter(node)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(node) if self.is_leaf(node) => self.write_suffix(node, out),
                Visit::Enter(node) => {
                    out.push('(');
                    stack.push(Visit::Exit(node));
                    for (i, child) in self.children(node).iter().enumerate().rev() {
                        stack.push(Visit::Enter(*child));
                        if i > 0 {
                            stack.push(Visit::Comma);
                        }
                    }
                }
                Visit::Exit(node) => {
                    out.push(')');
                    self.write_suffix(node, out);
                }
                Visit::Comma => out.push(','),
            }
        }
    }

    /// Label and branch length written after a node's children
    fn write_suffix(&self, node: NodeId, out: &mut String) {
        if let Some(name) = self.name(node) {
            write_label(name, out);
        }
        if let Some(length) = self.branch_length(node) {
            out.push(':');
            out.push_str(&length.to_string());
        }
    }
}

impl fmt::Display for SpeciesTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_newick())
    }
}

impl std::str::FromStr for SpeciesTree {
    type Err = CactusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

const RESERVED: &[u8] = b"(),:;[]'";

fn write_label(name: &str, out: &mut String) {
    let needs_quotes = name
        .bytes()
        .any(|b| RESERVED.contains(&b) || b.is_ascii_whitespace());
    if needs_quotes {
        out.push('\'');
        out.push_str(&name.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(name);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> CactusError {
        CactusError::Newick {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn new_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: None,
            branch_length: None,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    /// Parse one tree, descending with an explicit cursor so nesting depth is
    /// bounded by memory rather than the call stack
    fn tree(&mut self) -> CactusResult<NodeId> {
        let root = self.new_node(None);
        let mut current = root;

        loop {
            self.skip_whitespace();
            if self.peek() == Some(b'(') {
                self.pos += 1;
                current = self.new_node(Some(current));
                continue;
            }
            self.suffix(current)?;

            // Close finished subtrees until a sibling starts or the root ends
            loop {
                let Some(parent) = self.nodes[current.0].parent else {
                    return Ok(root);
                };
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        current = self.new_node(Some(parent));
                        break;
                    }
                    Some(b')') => {
                        self.pos += 1;
                        current = parent;
                        self.suffix(current)?;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
    }

    /// Optional label and `:length` following a node
    fn suffix(&mut self, node: NodeId) -> CactusResult<()> {
        self.skip_whitespace();
        self.nodes[node.0].name = self.label()?;
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.nodes[node.0].branch_length = Some(self.number()?);
        }
        Ok(())
    }

    fn label(&mut self) -> CactusResult<Option<String>> {
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            let mut label = Vec::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted label")),
                    Some(b'\'') if self.input.get(self.pos + 1) == Some(&b'\'') => {
                        label.push(b'\'');
                        self.pos += 2;
                    }
                    Some(b'\'') => {
                        self.pos += 1;
                        break;
                    }
                    Some(b) => {
                        label.push(b);
                        self.pos += 1;
                    }
                }
            }
            return Ok(Some(String::from_utf8_lossy(&label).into_owned()));
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !RESERVED.contains(&b) && !b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&self.input[start..self.pos]).into_owned(),
        ))
    }

    fn number(&mut self) -> CactusResult<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid branch length"))?;
        text.parse::<f64>()
            .map_err(|_| self.error("invalid branch length"))
    }
}
