//! Path-based subscriptions over a Reader's node sequence.
//!
//! Listeners register an ordered list of [`PathStep`] matchers. During a
//! single synchronous walk, a matching self-contained element fires its
//! callback immediately; a matching open element starts recording, and its
//! callback fires at the closing tag with the fully populated subtree.

use crate::WbxmlError;
use crate::reader::{Attribute, ElementKind, Extension, Node, ProcessingInstruction, Reader, TagRef};
use thiserror::Error;

/// Errors escaping a listener callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of [`EventParser::run`]: reader-level parse errors and listener
/// failures stay distinct kinds.
#[derive(Error, Debug)]
pub enum EventParserError {
    #[error(transparent)]
    Parse(#[from] WbxmlError),
    #[error("listener callback failed: {0}")]
    Callback(CallbackError),
}

/// One position matcher within a listener path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// A specific coded tag.
    Code(u16),
    /// Any single tag at this depth.
    Wildcard,
    /// Any of the listed coded tags.
    AnyOf(Vec<u16>),
}

impl PathStep {
    fn matches(&self, tag: &TagRef) -> bool {
        match self {
            PathStep::Wildcard => true,
            PathStep::Code(code) => matches!(tag, TagRef::Coded(c) if c == code),
            PathStep::AnyOf(codes) => matches!(tag, TagRef::Coded(c) if codes.contains(c)),
        }
    }
}

impl From<u16> for PathStep {
    fn from(code: u16) -> Self {
        PathStep::Code(code)
    }
}

/// A subtree copied out of the walk for a listener. Nodes handed to
/// callbacks stay valid only for the callback invocation unless cloned.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedNode {
    pub tag: TagRef,
    pub attributes: Vec<Attribute>,
    pub children: Vec<RecordedItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedItem {
    Node(RecordedNode),
    Text(String),
    Extension(Extension),
    Pi(ProcessingInstruction),
    Opaque(Vec<u8>),
}

type Callback<'h> = Box<dyn FnMut(&RecordedNode) -> std::result::Result<(), CallbackError> + 'h>;
type ErrorHandler<'h> = Box<dyn FnMut(CallbackError) + 'h>;

struct Listener<'h> {
    path: Vec<PathStep>,
    callback: Callback<'h>,
}

struct RecEntry {
    node: RecordedNode,
    matched: bool,
}

/// Walks a Reader's node sequence, dispatching to registered listeners.
#[derive(Default)]
pub struct EventParser<'h> {
    listeners: Vec<Listener<'h>>,
    error_handler: Option<ErrorHandler<'h>>,
}

fn path_matches(steps: &[PathStep], path: &[TagRef]) -> bool {
    steps.len() == path.len() && steps.iter().zip(path).all(|(step, tag)| step.matches(tag))
}

fn dispatch<'h>(
    listeners: &mut [Listener<'h>],
    error_handler: &mut Option<ErrorHandler<'h>>,
    path: &[TagRef],
    node: &RecordedNode,
    first_error: &mut Option<CallbackError>,
) {
    for listener in listeners
        .iter_mut()
        .filter(|l| path_matches(&l.path, path))
    {
        if let Err(e) = (listener.callback)(node) {
            match error_handler {
                Some(handler) => handler(e),
                None if first_error.is_none() => *first_error = Some(e),
                None => {}
            }
        }
    }
}

impl<'h> EventParser<'h> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            error_handler: None,
        }
    }

    /// Register a callback for every element whose tag path matches `path`.
    pub fn add_event_listener(
        &mut self,
        path: Vec<PathStep>,
        callback: impl FnMut(&RecordedNode) -> std::result::Result<(), CallbackError> + 'h,
    ) -> &mut Self {
        self.listeners.push(Listener {
            path,
            callback: Box::new(callback),
        });
        self
    }

    /// Install a handler for callback failures. Without one, `run` returns
    /// the first failure after the walk completes.
    pub fn on_error(&mut self, handler: impl FnMut(CallbackError) + 'h) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// One synchronous pass over the document. Callback failures never abort
    /// the walk; a reader parse error does.
    pub fn run(&mut self, reader: &Reader<'_>) -> std::result::Result<(), EventParserError> {
        let Self {
            listeners,
            error_handler,
        } = self;

        let mut full_path: Vec<TagRef> = Vec::new();
        let mut rec_stack: Vec<RecEntry> = Vec::new();
        let mut first_error: Option<CallbackError> = None;

        for node in reader.document() {
            match node? {
                Node::Element(el) if el.kind == ElementKind::Stag => {
                    full_path.push(el.tag.clone());
                    let matched = listeners.iter().any(|l| path_matches(&l.path, &full_path));
                    if matched || !rec_stack.is_empty() {
                        rec_stack.push(RecEntry {
                            node: RecordedNode {
                                tag: el.tag,
                                attributes: el.attributes,
                                children: Vec::new(),
                            },
                            matched,
                        });
                    }
                }
                Node::Element(el) => {
                    full_path.push(el.tag.clone());
                    let recorded = RecordedNode {
                        tag: el.tag,
                        attributes: el.attributes,
                        children: Vec::new(),
                    };
                    dispatch(listeners, error_handler, &full_path, &recorded, &mut first_error);
                    full_path.pop();
                    if let Some(top) = rec_stack.last_mut() {
                        top.node.children.push(RecordedItem::Node(recorded));
                    }
                }
                Node::EndTag => {
                    // The matched boundary fires against the path before the
                    // closing tag pops it.
                    if let Some(entry) = rec_stack.pop() {
                        if entry.matched {
                            dispatch(
                                listeners,
                                error_handler,
                                &full_path,
                                &entry.node,
                                &mut first_error,
                            );
                        }
                        if let Some(top) = rec_stack.last_mut() {
                            top.node.children.push(RecordedItem::Node(entry.node));
                        }
                    }
                    full_path.pop();
                }
                Node::Text(text) => {
                    if let Some(top) = rec_stack.last_mut() {
                        top.node.children.push(RecordedItem::Text(text));
                    }
                }
                Node::Extension(ext) => {
                    if let Some(top) = rec_stack.last_mut() {
                        top.node.children.push(RecordedItem::Extension(ext));
                    }
                }
                Node::Pi(pi) => {
                    if let Some(top) = rec_stack.last_mut() {
                        top.node.children.push(RecordedItem::Pi(pi));
                    }
                }
                Node::Opaque(bytes) => {
                    if let Some(top) = rec_stack.last_mut() {
                        top.node.children.push(RecordedItem::Opaque(bytes));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(EventParserError::Callback(e)),
            None => Ok(()),
        }
    }
}
