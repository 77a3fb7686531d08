//! Per-request trace session: node arena, breakpoint halt, completion signal.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TraceError;

use super::node::{footer_fragment, BlockOptions, Node, NodeKind};
use super::timer::{TimerResult, Timers};

/// Breakpoint prefix meaning "skip the first match, halt at the next".
pub const SKIP_PREFIX: &str = "-";

/// Owner of every node and timer produced while one request is traced.
///
/// A session is created per incoming request, shared between the
/// originating task and the background task running the wrapped handler,
/// and discarded once the response is sent. All structural mutation is
/// serialized under a single per-tree lock; every mutator is a guarded
/// no-op once the session is inactive or closed.
pub struct TraceSession {
    active: bool,
    query_hash: String,
    timers: Timers,
    notifier: Mutex<Option<oneshot::Sender<()>>>,
    inner: Mutex<TreeInner>,
}

struct TreeInner {
    nodes: Vec<Node>,
    /// Root-level output buffer; receives payloads of parentless nodes.
    out: String,
    closed: bool,
    /// Breakpoint skip state: 0 halts on the first match, 1 skips one
    /// match (bumped to 2 by that match), 2 halts unconditionally.
    skip: u8,
    halted_at: String,
}

impl TraceSession {
    /// Create a session. `breakpoint` is the raw query value: `<hash>`
    /// halts on the first matching block, `-<hash>` on the second, empty
    /// requests no halt.
    pub fn new(active: bool, breakpoint: &str) -> Self {
        let (query_hash, skip) = match breakpoint.strip_prefix(SKIP_PREFIX) {
            Some(rest) => (rest.to_string(), 1),
            None => (breakpoint.to_string(), 0),
        };
        Self {
            active,
            query_hash,
            timers: Timers::new(),
            notifier: Mutex::new(None),
            inner: Mutex::new(TreeInner {
                nodes: vec![Node::root()],
                out: String::new(),
                closed: false,
                skip,
                halted_at: String::new(),
            }),
        }
    }

    /// Shared always-inactive session, handed to instrumented handlers
    /// when the middleware is not installed so their calls degrade to
    /// no-ops.
    pub fn disabled() -> Arc<TraceSession> {
        static DISABLED: OnceLock<Arc<TraceSession>> = OnceLock::new();
        DISABLED
            .get_or_init(|| Arc::new(TraceSession::new(false, "")))
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Identity hash of the block the session halted at, if it halted.
    pub fn halted_at(&self) -> Option<String> {
        let inner = self.inner.lock();
        if inner.halted_at.is_empty() {
            None
        } else {
            Some(inner.halted_at.clone())
        }
    }

    /// Install the one-shot completion sender for this request.
    pub fn set_notifier(&self, tx: oneshot::Sender<()>) {
        *self.notifier.lock() = Some(tx);
    }

    /// Fire the completion signal. Both normal completion and the halt
    /// path call this; whichever comes first wins and the other is a
    /// no-op.
    pub fn notify_done(&self) {
        if let Some(tx) = self.notifier.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Open a named section under `parent`. Returns the new node index,
    /// or the sentinel 0 when the session is inactive or closed.
    pub fn start_section(&self, title: &str, parent: usize) -> usize {
        if !self.active {
            return 0;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        inner.add_node(Node::section(title, parent))
    }

    pub fn end_section(&self, index: usize) -> Result<(), TraceError> {
        if !self.active {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.close_node(index, Some(NodeKind::Section))
    }

    pub fn start_section_info(&self, parent: usize) -> usize {
        if !self.active {
            return 0;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        inner.add_node(Node::section_info(parent))
    }

    pub fn end_section_info(&self, index: usize) -> Result<(), TraceError> {
        if !self.active {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.close_node(index, Some(NodeKind::SectionInfo))
    }

    /// Open a block that will receive its footer later via
    /// [`end_block`](Self::end_block). The breakpoint check runs against
    /// the new block before this returns.
    pub fn start_block(&self, title: &str, payload: &str, options: &BlockOptions) -> usize {
        if !self.active {
            return 0;
        }
        let (index, hash) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return 0;
            }
            let node = Node::block(title, payload, options);
            let hash = node.hash().to_string();
            (inner.add_node(node), hash)
        };
        self.check_halt(&hash);
        index
    }

    /// Append the footer fragment of `options` and close the block.
    pub fn end_block(&self, index: usize, options: &BlockOptions) -> Result<(), TraceError> {
        if !self.active {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        match inner.nodes.get_mut(index) {
            Some(node) => node.append(&footer_fragment(&options.footer, options.is_error)),
            None => return Err(TraceError::InvalidIndex(index)),
        }
        inner.close_node(index, Some(NodeKind::Block))
    }

    /// Add a complete block in one step: create, attach footer, close.
    pub fn add_block(&self, title: &str, payload: &str, options: &BlockOptions) {
        if !self.active {
            return;
        }
        let hash = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            let node = Node::block(title, payload, options);
            let hash = node.hash().to_string();
            let index = inner.add_node(node);
            inner.nodes[index].append(&footer_fragment(&options.footer, options.is_error));
            // Infallible: the index was just handed out and no kind is
            // being asserted.
            let _ = inner.close_node(index, None);
            hash
        };
        self.check_halt(&hash);
    }

    /// Attach an ad-hoc debug value to the deepest still-open container
    /// node, tagged with the caller's source location and type.
    #[track_caller]
    pub fn dump<T: std::fmt::Debug>(&self, value: &T) {
        if !self.active {
            return;
        }
        let location = std::panic::Location::caller();
        let info = format!(
            "<pre class=\"dumpheader\">{}:{}</pre>\
             <div class=\"dumpcell\"><div class=\"dumptype\">{}</div>\
             <pre class=\"dumparea\">{}</pre></div>",
            location.file(),
            location.line(),
            // Rust type names carry angle brackets; they must not read as
            // markup in the rendered trace.
            super::format::escape_html(std::any::type_name::<T>()),
            super::format::escape_html(&format!("{value:#?}")),
        );
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        for node in inner.nodes.iter_mut().rev() {
            if node.is_closed() || node.is_leaf() {
                continue;
            }
            node.append(&info);
            break;
        }
    }

    /// Close every still-open node in reverse creation order, append the
    /// halt notice, and seal the tree. Children finalize into parents
    /// before parents finalize into grandparents, so the output stays
    /// well-formed even when halted mid-flight.
    pub fn close_all(&self) {
        if !self.active {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.close_all();
    }

    /// Serialize the tree. A closed tree returns its accumulated
    /// root-level buffer; an open one force-closes the root and returns
    /// its payload. Terminal operation of a trace session.
    pub fn render(&self) -> String {
        let mut inner = self.inner.lock();
        if inner.closed {
            return inner.out.clone();
        }
        inner.nodes[0].close()
    }

    pub fn start_timer(&self, name: &str) -> u32 {
        self.timers.start(name)
    }

    pub fn stop_timer(&self, name: &str) {
        self.timers.stop(name)
    }

    /// Read-only snapshot of all timers, running ones included.
    pub fn durations(&self) -> Vec<TimerResult> {
        self.timers.results()
    }

    /// Breakpoint check for a freshly added block. Runs outside the tree
    /// lock: a halt re-enters `close_all`, which takes it.
    fn check_halt(&self, hash: &str) {
        let halt = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if inner.skip == 2 {
                true
            } else if !self.query_hash.is_empty() && self.query_hash == hash {
                if inner.skip == 0 {
                    true
                } else {
                    // Skip consumed: the next match halts via the
                    // unconditional path.
                    inner.skip += 1;
                    false
                }
            } else {
                false
            }
        };
        if halt {
            self.inner.lock().halted_at = hash.to_string();
            self.close_all();
            self.notify_done();
        }
    }
}

impl TreeInner {
    fn add_node(&mut self, node: Node) -> usize {
        if let Some(parent) = node.parent() {
            let parent_node = self
                .nodes
                .get(parent)
                .unwrap_or_else(|| panic!("dump tree parent index {parent} out of range"));
            if parent_node.is_leaf() {
                panic!("cannot attach a child to a block node");
            }
            if parent_node.is_closed() {
                panic!("cannot attach a child to a closed node");
            }
        }
        let index = self.nodes.len();
        self.nodes.push(node);
        index
    }

    fn close_node(&mut self, index: usize, expected: Option<NodeKind>) -> Result<(), TraceError> {
        let (kind, closed, parent) = {
            let node = self
                .nodes
                .get(index)
                .ok_or(TraceError::InvalidIndex(index))?;
            (node.kind(), node.is_closed(), node.parent())
        };
        if let Some(expected) = expected {
            if kind != expected {
                return Err(TraceError::KindMismatch {
                    index,
                    expected,
                    found: kind,
                });
            }
        }
        if closed {
            return Ok(());
        }
        let payload = self.nodes[index].close();
        match parent {
            Some(parent) => self.nodes[parent].append(&payload),
            None => self.out.push_str(&payload),
        }
        Ok(())
    }

    fn close_all(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            // Only an out-of-range index can fail here.
            let _ = self.close_node(index, None);
        }
        let notice = halt_notice(&self.halted_at);
        self.out.push_str(&notice);
        self.closed = true;
    }
}

/// Fragment appended after a halt: names the halted hash and carries the
/// two continuation tokens, "stop at next match" (`-<hash>`) and "clear
/// the breakpoint" (empty).
fn halt_notice(hash: &str) -> String {
    format!(
        "<div class=\"navbox haltbox\">\
         <div class=\"info\">Dump halted at \"{hash}\"</div>\
         <div class=\"\">\
         <button onclick=\"reload('{SKIP_PREFIX}{hash}')\">STOP AT NEXT</button>\
         <button onclick=\"reload('')\">CONTINUE</button>\
         </div></div>"
    )
}
