//! Request and response trees
//!
//! Clients talk to the provider by exchanging [`Root`] messages. Each root
//! carries tree items in one of two shapes:
//!
//! - **qualified**: the item has a `path` and addresses the element directly
//! - **relative**: a chain of single-child items, each holding only a
//!   `number`, descends from the root to the element, ending in a command or
//!   in contents to apply
//!
//! Responses use the same types.

use serde::{Deserialize, Serialize};

use crate::path::TreePath;
use crate::types::{
    FunctionContents, MatrixContents, MatrixDisposition, MatrixOperation, NodeContents,
    ParameterContents, Value,
};

/// Command numbers
pub const COMMAND_SUBSCRIBE: u32 = 30;
pub const COMMAND_UNSUBSCRIBE: u32 = 31;
pub const COMMAND_GET_DIRECTORY: u32 = 32;
pub const COMMAND_INVOKE: u32 = 33;

/// Known commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Subscribe,
    Unsubscribe,
    GetDirectory,
    Invoke,
}

impl CommandKind {
    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            COMMAND_SUBSCRIBE => Some(CommandKind::Subscribe),
            COMMAND_UNSUBSCRIBE => Some(CommandKind::Unsubscribe),
            COMMAND_GET_DIRECTORY => Some(CommandKind::GetDirectory),
            COMMAND_INVOKE => Some(CommandKind::Invoke),
            _ => None,
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            CommandKind::Subscribe => COMMAND_SUBSCRIBE,
            CommandKind::Unsubscribe => COMMAND_UNSUBSCRIBE,
            CommandKind::GetDirectory => COMMAND_GET_DIRECTORY,
            CommandKind::Invoke => COMMAND_INVOKE,
        }
    }
}

/// A command addressed to the element above it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<Invocation>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            number: kind.number(),
            invocation: None,
        }
    }

    pub fn invoke(invocation: Invocation) -> Self {
        Self {
            number: COMMAND_INVOKE,
            invocation: Some(invocation),
        }
    }

    /// `None` for unknown command numbers
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_number(self.number)
    }
}

/// Function call request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: u32,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Function call outcome, always echoing the invocation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub invocation_id: u32,
    pub success: bool,
    #[serde(default)]
    pub result: Vec<Value>,
}

impl InvocationResult {
    pub fn success(invocation_id: u32, result: Vec<Value>) -> Self {
        Self {
            invocation_id,
            success: true,
            result,
        }
    }

    pub fn failure(invocation_id: u32) -> Self {
        Self {
            invocation_id,
            success: false,
            result: Vec::new(),
        }
    }
}

/// Connection state or change request for one matrix target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConnection {
    pub target: u32,
    #[serde(default)]
    pub sources: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<MatrixOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<MatrixDisposition>,
    #[serde(default)]
    pub locked: bool,
}

impl MatrixConnection {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            sources: Vec::new(),
            operation: None,
            disposition: None,
            locked: false,
        }
    }

    pub fn request(target: u32, sources: Vec<u32>, operation: MatrixOperation) -> Self {
        Self {
            target,
            sources,
            operation: Some(operation),
            disposition: None,
            locked: false,
        }
    }

    pub fn with_sources(mut self, sources: Vec<u32>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_disposition(mut self, disposition: MatrixDisposition) -> Self {
        self.disposition = Some(disposition);
        self
    }

    /// Requested operation, absolute when unspecified
    pub fn operation(&self) -> MatrixOperation {
        self.operation.unwrap_or_default()
    }
}

/// What a tree item is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Command(Command),
    Node(Option<NodeContents>),
    Parameter(Option<ParameterContents>),
    Matrix {
        contents: Option<MatrixContents>,
        #[serde(default)]
        connections: Vec<MatrixConnection>,
    },
    Function(Option<FunctionContents>),
}

/// One item of a request or response tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<TreePath>,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeItem>,
}

impl TreeItem {
    pub fn new(number: u32, kind: ItemKind) -> Self {
        Self {
            number: Some(number),
            path: None,
            kind,
            children: Vec::new(),
        }
    }

    pub fn qualified(path: TreePath, kind: ItemKind) -> Self {
        Self {
            number: path.last(),
            path: Some(path),
            kind,
            children: Vec::new(),
        }
    }

    pub fn command(command: Command) -> Self {
        Self {
            number: None,
            path: None,
            kind: ItemKind::Command(command),
            children: Vec::new(),
        }
    }

    pub fn node(number: u32) -> Self {
        Self::new(number, ItemKind::Node(None))
    }

    pub fn parameter(number: u32, contents: ParameterContents) -> Self {
        Self::new(number, ItemKind::Parameter(Some(contents)))
    }

    pub fn matrix(number: u32, connections: Vec<MatrixConnection>) -> Self {
        Self::new(
            number,
            ItemKind::Matrix {
                contents: None,
                connections,
            },
        )
    }

    pub fn with_child(mut self, child: TreeItem) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_qualified(&self) -> bool {
        self.path.is_some()
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind, ItemKind::Command(_))
    }

    pub fn as_command(&self) -> Option<&Command> {
        match &self.kind {
            ItemKind::Command(cmd) => Some(cmd),
            _ => None,
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, ItemKind::Parameter(_))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.kind, ItemKind::Matrix { .. })
    }

    /// Value carried by parameter contents, if any
    pub fn parameter_value(&self) -> Option<&Value> {
        match &self.kind {
            ItemKind::Parameter(Some(contents)) => contents.value.as_ref(),
            _ => None,
        }
    }

    /// Connections carried by a matrix item
    pub fn matrix_connections(&self) -> Option<&[MatrixConnection]> {
        match &self.kind {
            ItemKind::Matrix { connections, .. } => Some(connections),
            _ => None,
        }
    }
}

/// Top-level message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(default)]
    pub elements: Vec<TreeItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<InvocationResult>,
}

impl Root {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(element: TreeItem) -> Self {
        Self {
            elements: vec![element],
            results: Vec::new(),
        }
    }

    pub fn with_result(result: InvocationResult) -> Self {
        Self {
            elements: Vec::new(),
            results: vec![result],
        }
    }

    pub fn push(&mut self, element: TreeItem) {
        self.elements.push(element);
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.results.is_empty()
    }

    /// First element, the one a request is about
    pub fn first(&self) -> Option<&TreeItem> {
        self.elements.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kinds() {
        assert_eq!(CommandKind::from_number(32), Some(CommandKind::GetDirectory));
        assert_eq!(CommandKind::from_number(99), None);
        assert_eq!(Command::new(CommandKind::Invoke).number, COMMAND_INVOKE);
    }

    #[test]
    fn test_default_operation_is_absolute() {
        let connection = MatrixConnection::new(3).with_sources(vec![1]);
        assert_eq!(connection.operation(), MatrixOperation::Absolute);
    }

    #[test]
    fn test_qualified_item_takes_number_from_path() {
        let item = TreeItem::qualified(TreePath::parse("1.4").unwrap(), ItemKind::Node(None));
        assert_eq!(item.number, Some(4));
        assert!(item.is_qualified());
    }
}
