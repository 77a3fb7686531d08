//! Arena entries of the dump tree and their wire-record framing.
//!
//! The serialized trace is a sequence of newline-delimited records that a
//! client renderer reconstructs purely from open/close ordering:
//!
//! - section open `{"cmd": 1, "name": …}` / close `{"cmd": 2}`
//! - section-info open `{"cmd": 3}` / close `{"cmd": 4}`
//! - block `{"cmd": 6, …}`, a single self-contained record
//!
//! Nodes accumulate content while open and emit their closing terminator
//! exactly once. A closed node silently drops further appends.

use std::fmt;

use super::format::{content_hash, json_string};

/// Closed set of node variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The implicit top of every tree; terminator-less.
    Root,
    /// Named structural container.
    Section,
    /// Unnamed auxiliary container nested inside a section.
    SectionInfo,
    /// Leaf carrying a rendered payload and an identity hash.
    Block,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Root => "root",
            NodeKind::Section => "section",
            NodeKind::SectionInfo => "section-info",
            NodeKind::Block => "block",
        };
        f.write_str(label)
    }
}

/// Options for block creation.
#[derive(Debug, Clone, Default)]
pub struct BlockOptions {
    /// Arena index of the parent node; 0 attaches to the root.
    pub parent: usize,
    /// Explicit identity hash. Empty means "derive from the payload".
    pub id: String,
    /// Marks the block as an error in the rendered trace.
    pub is_error: bool,
    /// Key/value pairs rendered as the block footer.
    pub footer: Vec<(String, String)>,
}

/// One entry in a trace session's node arena.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    content: String,
    parent: Option<usize>,
    closed: bool,
    hash: String,
}

impl Node {
    pub fn root() -> Self {
        Self {
            kind: NodeKind::Root,
            content: String::new(),
            parent: None,
            closed: false,
            hash: String::new(),
        }
    }

    pub fn section(title: &str, parent: usize) -> Self {
        Self {
            kind: NodeKind::Section,
            content: format!("{{\"cmd\": 1, \"name\": {}}}\n", json_string(title)),
            parent: Some(parent),
            closed: false,
            hash: String::new(),
        }
    }

    pub fn section_info(parent: usize) -> Self {
        Self {
            kind: NodeKind::SectionInfo,
            content: "{\"cmd\": 3}\n".to_string(),
            parent: Some(parent),
            closed: false,
            hash: String::new(),
        }
    }

    /// Create a block leaf. The identity hash is the caller-supplied id
    /// when one is given, otherwise a digest of the payload. The record
    /// stays open so footer fragments can be appended before close.
    pub fn block(title: &str, payload: &str, options: &BlockOptions) -> Self {
        let hash = if options.id.is_empty() {
            content_hash(payload)
        } else {
            options.id.clone()
        };
        let content = format!(
            "{{\"cmd\": 6, \"name\": {}, \"mime\": \"text/json\", \"html\": {}, \"hash\": {} ",
            json_string(title),
            json_string(payload),
            json_string(&hash),
        );
        Self {
            kind: NodeKind::Block,
            content,
            parent: Some(options.parent),
            closed: false,
            hash,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Blocks are leaves; nothing may be parented under them.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Block
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Append content to a still-open node. Dropped once closed.
    pub fn append(&mut self, text: &str) {
        if !self.closed {
            self.content.push_str(text);
        }
    }

    /// Close the node and return its finalized payload (accumulated
    /// content plus the variant terminator). Idempotent: a second call
    /// returns an empty string so the payload can never reach a parent
    /// twice.
    pub fn close(&mut self) -> String {
        if self.closed {
            return String::new();
        }
        self.closed = true;
        let mut payload = std::mem::take(&mut self.content);
        payload.push_str(self.terminator());
        payload
    }

    fn terminator(&self) -> &'static str {
        match self.kind {
            NodeKind::Root => "",
            NodeKind::Section => "{\"cmd\": 2}\n",
            NodeKind::SectionInfo => "{\"cmd\": 4}\n",
            NodeKind::Block => "}\n",
        }
    }
}

/// Wire fragment appended to an open block record before its terminator:
/// the error flag first, then the footer object.
pub fn footer_fragment(footer: &[(String, String)], is_error: bool) -> String {
    let mut out = String::new();
    if is_error {
        out.push_str(", \"isError\": true");
    }
    if !footer.is_empty() {
        out.push_str(", \"footer\": {");
        for (i, (key, value)) in footer.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&json_string(key));
            out.push_str(": ");
            out.push_str(&json_string(value));
        }
        out.push('}');
    }
    out
}
