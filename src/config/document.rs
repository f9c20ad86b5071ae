//! Generic configuration node tree.
//!
//! # Responsibilities
//! - Represent a parsed configuration document as a tagged tree
//!   (scalar / mapping / sequence), each node carrying its source line
//! - Preserve mapping entry order and duplicate keys (a repeated `listen`
//!   key is one directive occurrence each)
//! - Adapt the YAML event stream into the tree
//!
//! # Design Decisions
//! - Mappings are ordered key/value pair lists, not hash maps; `get` returns
//!   the first match
//! - The tree is ephemeral: owned by one load, discarded after apply
//! - Parsing proper stays an external capability; the engine only consumes
//!   `ConfigNode`, and the YAML adapter here is a thin event receiver

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::Marker;

use crate::config::error::{ConfigError, ConfigResult};

/// The payload of a configuration node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// A string leaf. All scalar interpretation (numbers, ON/OFF switches)
    /// happens in the directive handlers.
    Scalar(String),
    /// Ordered key/value pairs; duplicate keys are legal and preserved.
    Mapping(Vec<(ConfigNode, ConfigNode)>),
    /// Ordered list of child nodes.
    Sequence(Vec<ConfigNode>),
}

/// One node of the configuration document, tagged with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    pub value: NodeValue,
    /// 1-based line in the source document; 0 for synthesized nodes.
    pub line: usize,
}

impl ConfigNode {
    pub fn scalar(line: usize, value: impl Into<String>) -> Self {
        ConfigNode {
            value: NodeValue::Scalar(value.into()),
            line,
        }
    }

    pub fn mapping(line: usize, entries: Vec<(ConfigNode, ConfigNode)>) -> Self {
        ConfigNode {
            value: NodeValue::Mapping(entries),
            line,
        }
    }

    pub fn sequence(line: usize, items: Vec<ConfigNode>) -> Self {
        ConfigNode {
            value: NodeValue::Sequence(items),
            line,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(ConfigNode, ConfigNode)]> {
        match &self.value {
            NodeValue::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ConfigNode]> {
        match &self.value {
            NodeValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// First value whose key is a scalar equal to `key`.
    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k.as_scalar() == Some(key))
            .map(|(_, v)| v)
    }

    /// Node kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.value {
            NodeValue::Scalar(_) => "scalar",
            NodeValue::Mapping(_) => "mapping",
            NodeValue::Sequence(_) => "sequence",
        }
    }
}

/// Build a node tree from a YAML document.
///
/// Only single-document inputs are accepted; anchors/aliases are rejected
/// rather than silently expanded.
pub fn from_yaml_str(input: &str) -> ConfigResult<ConfigNode> {
    let mut parser = Parser::new_from_str(input);
    let mut builder = TreeBuilder::default();
    parser
        .load(&mut builder, false)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    if let Some(message) = builder.error {
        return Err(ConfigError::Parse(message));
    }
    builder
        .root
        .ok_or_else(|| ConfigError::Parse("empty configuration document".to_string()))
}

/// Event receiver assembling `ConfigNode`s with their source markers.
#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Frame>,
    root: Option<ConfigNode>,
    error: Option<String>,
}

enum Frame {
    Sequence {
        line: usize,
        items: Vec<ConfigNode>,
    },
    Mapping {
        line: usize,
        entries: Vec<(ConfigNode, ConfigNode)>,
        pending_key: Option<ConfigNode>,
    },
}

impl TreeBuilder {
    fn push_node(&mut self, node: ConfigNode) {
        match self.stack.last_mut() {
            Some(Frame::Sequence { items, .. }) => items.push(node),
            Some(Frame::Mapping {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                Some(key) => entries.push((key, node)),
                None => *pending_key = Some(node),
            },
            None => {
                // First completed top-level node wins; a second one means a
                // multi-document stream, which `load(.., false)` already
                // refuses before we get here.
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
        }
    }
}

impl MarkedEventReceiver for TreeBuilder {
    fn on_event(&mut self, event: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }
        match event {
            Event::Scalar(value, ..) => {
                self.push_node(ConfigNode::scalar(mark.line(), value));
            }
            Event::SequenceStart(..) => {
                self.stack.push(Frame::Sequence {
                    line: mark.line(),
                    items: Vec::new(),
                });
            }
            Event::SequenceEnd => {
                if let Some(Frame::Sequence { line, items }) = self.stack.pop() {
                    self.push_node(ConfigNode::sequence(line, items));
                }
            }
            Event::MappingStart(..) => {
                self.stack.push(Frame::Mapping {
                    line: mark.line(),
                    entries: Vec::new(),
                    pending_key: None,
                });
            }
            Event::MappingEnd => {
                if let Some(Frame::Mapping { line, entries, .. }) = self.stack.pop() {
                    self.push_node(ConfigNode::mapping(line, entries));
                }
            }
            Event::Alias(_) => {
                self.error = Some(format!(
                    "line {}: YAML aliases are not supported in configuration documents",
                    mark.line()
                ));
            }
            Event::StreamStart
            | Event::StreamEnd
            | Event::DocumentStart
            | Event::DocumentEnd
            | Event::Nothing => {}
        }
    }
}
