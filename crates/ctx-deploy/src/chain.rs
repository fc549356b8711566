//! Handler and phase chains
//!
//! Handlers and phases belong to the deployment, not to contexts. Snapshots
//! only carry [`ChainDescriptor`]s; on restore they are resolved back to live
//! nodes through a per-flow [`HandlerIndex`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ctx_codec::{read_list, write_list, CodecError, FormatHeader, RecordReader, RecordWriter, WireRecord};
use serde::{Deserialize, Serialize};

use crate::self_managed::SelfManagedData;

/// Kind tag carried by every phase
pub const PHASE_KIND: &str = "phase";

/// Stable symbolic handler identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerKind(String);

impl HandlerKind {
    /// Create a kind
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Kind shared by all phases
    #[inline]
    #[must_use]
    pub fn phase() -> Self {
        Self::new(PHASE_KIND)
    }

    /// Kind as a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A deployed message handler
pub trait Handler: Send + Sync + fmt::Debug {
    /// Symbolic kind
    fn kind(&self) -> &HandlerKind;

    /// Logical name, unique per kind within a flow
    fn name(&self) -> &str;

    /// Self-managed data capability, if the handler keeps per-message state
    fn self_managed(&self) -> Option<&dyn SelfManagedData> {
        None
    }
}

/// Named group of chain nodes
#[derive(Debug)]
pub struct Phase {
    name: String,
    kind: HandlerKind,
    children: Vec<ChainNode>,
}

impl Phase {
    /// Create an empty phase
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HandlerKind::phase(),
            children: Vec::new(),
        }
    }

    /// Append a handler
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.children.push(ChainNode::Handler(handler));
        self
    }

    /// Append a nested phase
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.children.push(ChainNode::Phase(Arc::new(phase)));
        self
    }

    /// Phase name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct children
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[ChainNode] {
        &self.children
    }
}

/// Lookup key of a live chain node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    /// Symbolic kind
    pub kind: HandlerKind,
    /// Logical name
    pub name: String,
}

impl HandlerKey {
    /// Create a key
    #[must_use]
    pub fn new(kind: HandlerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Entry of an execution chain
#[derive(Debug, Clone)]
pub enum ChainNode {
    /// Leaf handler
    Handler(Arc<dyn Handler>),
    /// Phase grouping
    Phase(Arc<Phase>),
}

impl ChainNode {
    /// Symbolic kind
    #[must_use]
    pub fn kind(&self) -> &HandlerKind {
        match self {
            Self::Handler(h) => h.kind(),
            Self::Phase(p) => &p.kind,
        }
    }

    /// Logical name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Handler(h) => h.name(),
            Self::Phase(p) => &p.name,
        }
    }

    /// Whether this node is a phase
    #[inline]
    #[must_use]
    pub fn is_phase(&self) -> bool {
        matches!(self, Self::Phase(_))
    }

    /// Lookup key
    #[must_use]
    pub fn key(&self) -> HandlerKey {
        HandlerKey::new(self.kind().clone(), self.name())
    }

    fn address(&self) -> usize {
        match self {
            Self::Handler(h) => Arc::as_ptr(h).cast::<()>() as usize,
            Self::Phase(p) => Arc::as_ptr(p) as usize,
        }
    }

    /// Whether both refer to the same live instance
    #[must_use]
    pub fn same_instance(&self, other: &ChainNode) -> bool {
        self.kind() == other.kind() && self.address() == other.address()
    }

    /// Descriptor of this node and, for phases, its children
    #[must_use]
    pub fn describe(&self) -> ChainDescriptor {
        match self {
            Self::Handler(h) => ChainDescriptor::handler(h.kind().clone(), h.name()),
            Self::Phase(p) => ChainDescriptor {
                kind: p.kind.clone(),
                name: p.name.clone(),
                phase: true,
                children: describe(&p.children),
            },
        }
    }
}

/// Snapshot form of a chain node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// Symbolic kind
    pub kind: HandlerKind,
    /// Logical name
    pub name: String,
    /// Whether the node was a phase
    pub phase: bool,
    /// Child descriptors of a phase
    pub children: Vec<ChainDescriptor>,
}

impl ChainDescriptor {
    /// Descriptor of a leaf handler
    #[must_use]
    pub fn handler(kind: HandlerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            phase: false,
            children: Vec::new(),
        }
    }

    /// Lookup key
    #[must_use]
    pub fn key(&self) -> HandlerKey {
        HandlerKey::new(self.kind.clone(), self.name.clone())
    }
}

impl WireRecord for ChainDescriptor {
    const HEADER: FormatHeader = FormatHeader::new(0x4348_0000_0000_0001, 1);

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(self.kind.as_str())?;
        writer.write_str(&self.name)?;
        writer.write_bool(self.phase);
        write_list(writer, &self.children)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        Ok(Self {
            kind: HandlerKind::new(reader.read_str()?),
            name: reader.read_str()?,
            phase: reader.read_bool()?,
            children: read_list(reader)?,
        })
    }
}

fn flatten_into(nodes: &[ChainNode], leaves_only: bool, out: &mut Vec<ChainNode>) {
    for node in nodes {
        match node {
            ChainNode::Handler(_) => {
                if !out.iter().any(|seen| seen.same_instance(node)) {
                    out.push(node.clone());
                }
            }
            ChainNode::Phase(phase) => {
                if !leaves_only && !out.iter().any(|seen| seen.same_instance(node)) {
                    out.push(node.clone());
                }
                flatten_into(&phase.children, leaves_only, out);
            }
        }
    }
}

/// Unique handlers and phases, depth-first, first occurrence wins
#[must_use]
pub fn flatten_chain(nodes: &[ChainNode]) -> Vec<ChainNode> {
    let mut out = Vec::new();
    flatten_into(nodes, false, &mut out);
    out
}

/// Unique leaf handlers, depth-first, first occurrence wins
#[must_use]
pub fn flatten_handlers(nodes: &[ChainNode]) -> Vec<ChainNode> {
    let mut out = Vec::new();
    flatten_into(nodes, true, &mut out);
    out
}

/// Descriptors for a chain, preserving nesting
#[must_use]
pub fn describe(nodes: &[ChainNode]) -> Vec<ChainDescriptor> {
    nodes.iter().map(ChainNode::describe).collect()
}

/// Find a leaf handler by kind and name, recursing into phases
#[must_use]
pub fn find_handler(nodes: &[ChainNode], kind: &HandlerKind, name: &str) -> Option<Arc<dyn Handler>> {
    nodes.iter().find_map(|node| match node {
        ChainNode::Handler(h) if h.kind() == kind && h.name() == name => Some(Arc::clone(h)),
        ChainNode::Handler(_) => None,
        ChainNode::Phase(p) => find_handler(&p.children, kind, name),
    })
}

/// Map from [`HandlerKey`] to live node for one flow
#[derive(Debug, Clone, Default)]
pub struct HandlerIndex {
    entries: HashMap<HandlerKey, ChainNode>,
}

impl HandlerIndex {
    /// Index every handler and phase reachable from `nodes`
    #[must_use]
    pub fn build(nodes: &[ChainNode]) -> Self {
        let mut entries = HashMap::new();
        for node in flatten_chain(nodes) {
            entries.entry(node.key()).or_insert(node);
        }
        Self { entries }
    }

    /// Live node for `key`
    #[must_use]
    pub fn get(&self, key: &HandlerKey) -> Option<&ChainNode> {
        self.entries.get(key)
    }

    /// Number of indexed nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live nodes for `descriptors`, in order; unknown descriptors are skipped
    #[must_use]
    pub fn resolve(&self, descriptors: &[ChainDescriptor]) -> Vec<ChainNode> {
        descriptors
            .iter()
            .filter_map(|descriptor| {
                let found = self.get(&descriptor.key()).cloned();
                if found.is_none() {
                    tracing::debug!(
                        kind = %descriptor.kind,
                        name = %descriptor.name,
                        "dropping chain entry with no live counterpart"
                    );
                }
                found
            })
            .collect()
    }
}
