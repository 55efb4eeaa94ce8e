//! Elements of the provider tree
//!
//! An [`Element`] owns its children; its path is assigned when it is attached
//! to a [`Tree`](crate::Tree) and kept in sync when subtrees move.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

use crate::message::{ItemKind, MatrixConnection, TreeItem};
use crate::path::TreePath;
use crate::types::{
    FunctionContents, MatrixContents, MatrixOperation, MatrixType, NodeContents,
    ParameterContents, Value,
};
use crate::{Error, Result};

/// Outcome of a function handler
pub type FunctionResult = std::result::Result<Vec<Value>, String>;

/// Server-side implementation of a tree function
pub trait FunctionHandler: Send + Sync {
    fn call(&self, arguments: &[Value]) -> FunctionResult;
}

impl<F> FunctionHandler for F
where
    F: Fn(&[Value]) -> FunctionResult + Send + Sync,
{
    fn call(&self, arguments: &[Value]) -> FunctionResult {
        self(arguments)
    }
}

/// Invocable function element
#[derive(Clone)]
pub struct Function {
    pub contents: FunctionContents,
    name: Option<String>,
    handler: Option<Arc<dyn FunctionHandler>>,
}

impl Function {
    pub fn new(contents: FunctionContents, handler: Arc<dyn FunctionHandler>) -> Self {
        Self {
            contents,
            name: None,
            handler: Some(handler),
        }
    }

    /// A function with a signature but nothing behind it
    pub fn unbound(contents: FunctionContents) -> Self {
        Self {
            contents,
            name: None,
            handler: None,
        }
    }

    /// Record the registry name the handler was bound from
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn handler(&self) -> Option<&Arc<dyn FunctionHandler>> {
        self.handler.as_ref()
    }

    /// Run the handler; handler errors and panics become `InvocationFailure`
    pub fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| Error::InvocationFailure("function has no handler".to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| handler.call(arguments))) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(reason)) => Err(Error::InvocationFailure(reason)),
            Err(_) => Err(Error::InvocationFailure("function handler panicked".to_string())),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("contents", &self.contents)
            .field("name", &self.name)
            .field("bound", &self.handler.is_some())
            .finish()
    }
}

/// Matrix element with its live connection state
#[derive(Debug, Clone)]
pub struct Matrix {
    pub contents: MatrixContents,
    connections: BTreeMap<u32, MatrixConnection>,
    /// Paths of the per-target default source parameters, resolved on first lookup
    pub(crate) default_sources: Option<Vec<TreePath>>,
}

impl Matrix {
    /// Create a matrix with an empty connection for every target
    pub fn new(contents: MatrixContents) -> Self {
        let connections = (0..contents.target_count)
            .map(|t| (t, MatrixConnection::new(t)))
            .collect();
        Self {
            contents,
            connections,
            default_sources: None,
        }
    }

    pub fn matrix_type(&self) -> MatrixType {
        self.contents.matrix_type
    }

    pub fn has_target(&self, target: u32) -> bool {
        target < self.contents.target_count
    }

    pub fn connection(&self, target: u32) -> Option<&MatrixConnection> {
        self.connections.get(&target)
    }

    /// All connections, ordered by target
    pub fn connections(&self) -> impl Iterator<Item = &MatrixConnection> {
        self.connections.values()
    }

    pub fn sources(&self, target: u32) -> &[u32] {
        self.connections
            .get(&target)
            .map(|c| c.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_locked(&self, target: u32) -> bool {
        self.connections
            .get(&target)
            .map(|c| c.locked)
            .unwrap_or(false)
    }

    pub fn set_locked(&mut self, target: u32, locked: bool) {
        if self.has_target(target) {
            self.slot(target).locked = locked;
        }
    }

    /// Replace a target's sources
    pub fn set_sources(&mut self, target: u32, sources: Vec<u32>) {
        if self.has_target(target) {
            self.slot(target).sources = dedup(&sources);
        }
    }

    /// Add sources to a target, keeping existing order
    pub fn connect_sources(&mut self, target: u32, sources: &[u32]) {
        if self.has_target(target) {
            let slot = self.slot(target);
            slot.sources = union(&slot.sources, sources);
        }
    }

    /// Remove the listed sources, or all of them when the list is empty.
    /// Returns whether anything was removed.
    pub fn disconnect_sources(&mut self, target: u32, sources: &[u32]) -> bool {
        if !self.has_target(target) {
            return false;
        }
        let slot = self.slot(target);
        let before = slot.sources.len();
        if sources.is_empty() {
            slot.sources.clear();
        } else {
            slot.sources.retain(|s| !sources.contains(s));
        }
        slot.sources.len() != before
    }

    /// Targets currently carrying `source`
    pub fn source_connections(&self, source: u32) -> Vec<u32> {
        self.connections
            .values()
            .filter(|c| c.sources.contains(&source))
            .map(|c| c.target)
            .collect()
    }

    pub fn total_connections(&self) -> usize {
        self.connections.values().map(|c| c.sources.len()).sum()
    }

    pub fn maximum_connects_per_target(&self) -> usize {
        self.contents
            .maximum_connects_per_target
            .unwrap_or(self.contents.source_count) as usize
    }

    pub fn maximum_total_connects(&self) -> usize {
        self.contents
            .maximum_total_connects
            .map(|n| n as usize)
            .unwrap_or(self.contents.target_count as usize * self.contents.source_count as usize)
    }

    /// Check whether `sources` may be applied to `target` with `operation`
    /// under this matrix's topology and capacity rules
    pub fn can_connect(&self, target: u32, sources: &[u32], operation: MatrixOperation) -> bool {
        if !self.has_target(target) || self.is_locked(target) {
            return false;
        }
        if sources.iter().any(|s| *s >= self.contents.source_count) {
            return false;
        }

        let old = self.sources(target);
        let new = match operation {
            MatrixOperation::Connect => union(old, sources),
            _ => dedup(sources),
        };

        match self.contents.matrix_type {
            MatrixType::OneToN => new.len() <= 1,
            MatrixType::OneToOne => {
                new.len() <= 1
                    && new
                        .iter()
                        .all(|s| self.source_connections(*s).iter().all(|t| *t == target))
            }
            MatrixType::NToN => {
                let total = self.total_connections() - old.len() + new.len();
                new.len() <= self.maximum_connects_per_target()
                    && total <= self.maximum_total_connects()
            }
        }
    }

    /// Check the whole connection state against the topology and capacity
    /// rules, describing the first violation
    pub fn check_connections(&self) -> std::result::Result<(), String> {
        let source_count = self.contents.source_count;
        for connection in self.connections.values() {
            let target = connection.target;
            if let Some(s) = connection.sources.iter().find(|s| **s >= source_count) {
                return Err(format!("target {} carries source {} out of range", target, s));
            }
            let carried = connection.sources.len();
            match self.contents.matrix_type {
                MatrixType::OneToOne | MatrixType::OneToN if carried > 1 => {
                    return Err(format!("target {} carries {} sources", target, carried));
                }
                MatrixType::NToN if carried > self.maximum_connects_per_target() => {
                    return Err(format!(
                        "target {} carries {} sources, at most {} allowed",
                        target,
                        carried,
                        self.maximum_connects_per_target()
                    ));
                }
                _ => {}
            }
        }

        match self.contents.matrix_type {
            MatrixType::OneToOne => {
                let mut holders = BTreeMap::new();
                for connection in self.connections.values() {
                    for s in &connection.sources {
                        if let Some(other) = holders.insert(*s, connection.target) {
                            return Err(format!(
                                "source {} drives targets {} and {}",
                                s, other, connection.target
                            ));
                        }
                    }
                }
            }
            MatrixType::NToN if self.total_connections() > self.maximum_total_connects() => {
                return Err(format!(
                    "{} connections, at most {} allowed",
                    self.total_connections(),
                    self.maximum_total_connects()
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Assign a named contents field, keeping one connection per target
    ///
    /// Shrinking the dimensions drops connections that fall outside them. A
    /// change that would leave the current connections over the new limits
    /// is refused and the matrix is left as it was.
    pub fn set_field(&mut self, key: &str, value: &Value) -> bool {
        let previous = self.clone();
        if !self.contents.set_field(key, value) {
            return false;
        }
        let target_count = self.contents.target_count;
        let source_count = self.contents.source_count;
        self.connections.retain(|t, _| *t < target_count);
        for connection in self.connections.values_mut() {
            connection.sources.retain(|s| *s < source_count);
        }
        for t in 0..target_count {
            self.slot(t);
        }

        if let Err(reason) = self.check_connections() {
            debug!("Refusing matrix {} change: {}", key, reason);
            *self = previous;
            return false;
        }
        true
    }

    fn slot(&mut self, target: u32) -> &mut MatrixConnection {
        self.connections
            .entry(target)
            .or_insert_with(|| MatrixConnection::new(target))
    }
}

fn dedup(sources: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(sources.len());
    for s in sources {
        if !out.contains(s) {
            out.push(*s);
        }
    }
    out
}

fn union(existing: &[u32], added: &[u32]) -> Vec<u32> {
    let mut out = dedup(existing);
    for s in added {
        if !out.contains(s) {
            out.push(*s);
        }
    }
    out
}

/// Variant-specific part of an element
#[derive(Debug, Clone)]
pub enum ElementKind {
    Node(NodeContents),
    Parameter(ParameterContents),
    Matrix(Matrix),
    Function(Function),
}

/// An addressable element of the tree
#[derive(Debug, Clone)]
pub struct Element {
    number: u32,
    path: TreePath,
    kind: ElementKind,
    children: Vec<Element>,
}

impl Element {
    pub fn new(number: u32, kind: ElementKind) -> Self {
        Self {
            number,
            path: TreePath::from(vec![number]),
            kind,
            children: Vec::new(),
        }
    }

    pub fn node(number: u32, contents: NodeContents) -> Self {
        Self::new(number, ElementKind::Node(contents))
    }

    pub fn parameter(number: u32, contents: ParameterContents) -> Self {
        Self::new(number, ElementKind::Parameter(contents))
    }

    pub fn matrix(number: u32, matrix: Matrix) -> Self {
        Self::new(number, ElementKind::Matrix(matrix))
    }

    pub fn function(number: u32, function: Function) -> Self {
        Self::new(number, ElementKind::Function(function))
    }

    /// The tree root: a node at the empty path
    pub(crate) fn root() -> Self {
        Self {
            number: 0,
            path: TreePath::root(),
            kind: ElementKind::Node(NodeContents::default()),
            children: Vec::new(),
        }
    }

    /// Builder form of [`Element::add_child`]
    pub fn with_child(mut self, child: Element) -> Self {
        self.add_child(child);
        self
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &TreePath {
        &self.path
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ElementKind {
        &mut self.kind
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn child(&self, number: u32) -> Option<&Element> {
        self.children.iter().find(|c| c.number == number)
    }

    pub fn child_mut(&mut self, number: u32) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.number == number)
    }

    /// Attach a child, placing it (and its subtree) under this element's path
    pub fn add_child(&mut self, mut child: Element) -> &mut Element {
        child.rebase(self.path.child(child.number));
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Swap out the child with the same number, returning the old one
    pub(crate) fn replace_child(&mut self, mut child: Element) -> Option<Element> {
        let slot = self.children.iter_mut().find(|c| c.number == child.number)?;
        child.rebase(slot.path.clone());
        Some(std::mem::replace(slot, child))
    }

    /// Move this subtree to a new path
    pub(crate) fn rebase(&mut self, path: TreePath) {
        if let Some(number) = path.last() {
            self.number = number;
        }
        for child in &mut self.children {
            child.rebase(path.child(child.number));
        }
        self.path = path;
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, ElementKind::Node(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, ElementKind::Parameter(_))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.kind, ElementKind::Matrix(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ElementKind::Function(_))
    }

    /// Parameters with a stream identifier are not auto-subscribed
    pub fn is_stream(&self) -> bool {
        match &self.kind {
            ElementKind::Parameter(p) => p.stream_identifier.is_some(),
            _ => false,
        }
    }

    /// Parameters and matrices that a directory listing implicitly subscribes to
    pub fn reports_changes(&self) -> bool {
        (self.is_parameter() || self.is_matrix()) && !self.is_stream()
    }

    pub fn as_parameter(&self) -> Option<&ParameterContents> {
        match &self.kind {
            ElementKind::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_parameter_mut(&mut self) -> Option<&mut ParameterContents> {
        match &mut self.kind {
            ElementKind::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match &self.kind {
            ElementKind::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_matrix_mut(&mut self) -> Option<&mut Matrix> {
        match &mut self.kind {
            ElementKind::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            ElementKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Copy of this element without its children
    pub fn shallow(&self) -> Element {
        Element {
            number: self.number,
            path: self.path.clone(),
            kind: self.kind.clone(),
            children: Vec::new(),
        }
    }

    /// Item kind carrying this element's contents
    pub fn item_kind(&self) -> ItemKind {
        match &self.kind {
            ElementKind::Node(c) => ItemKind::Node(Some(c.clone())),
            ElementKind::Parameter(c) => ItemKind::Parameter(Some(c.clone())),
            ElementKind::Matrix(m) => ItemKind::Matrix {
                contents: Some(m.contents.clone()),
                connections: m.connections().cloned().collect(),
            },
            ElementKind::Function(f) => ItemKind::Function(Some(f.contents.clone())),
        }
    }

    /// Item kind with identity only
    pub fn bare_kind(&self) -> ItemKind {
        match &self.kind {
            ElementKind::Node(_) => ItemKind::Node(None),
            ElementKind::Parameter(_) => ItemKind::Parameter(None),
            ElementKind::Matrix(_) => ItemKind::Matrix {
                contents: None,
                connections: Vec::new(),
            },
            ElementKind::Function(_) => ItemKind::Function(None),
        }
    }

    /// Minimal relative form: number and contents, no children
    pub fn to_item(&self) -> TreeItem {
        TreeItem::new(self.number, self.item_kind())
    }

    /// Minimal qualified form: path and contents, no children
    pub fn to_qualified(&self) -> TreeItem {
        TreeItem::qualified(self.path.clone(), self.item_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to_one() -> Matrix {
        Matrix::new(MatrixContents::new(MatrixType::OneToOne, 4, 8))
    }

    #[test]
    fn test_child_paths() {
        let node = Element::node(1, NodeContents::default()).with_child(
            Element::node(2, NodeContents::default())
                .with_child(Element::parameter(3, ParameterContents::new(1.into()))),
        );
        let leaf = &node.children()[0].children()[0];
        assert_eq!(leaf.path().to_string(), "1.2.3");
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut m = Matrix::new(MatrixContents::new(MatrixType::NToN, 2, 4));
        m.connect_sources(0, &[1, 2]);
        m.connect_sources(0, &[2, 3]);
        assert_eq!(m.sources(0), &[1, 2, 3]);
        assert!(m.disconnect_sources(0, &[2]));
        assert!(!m.disconnect_sources(0, &[2]));
        assert_eq!(m.sources(0), &[1, 3]);
        assert!(m.disconnect_sources(0, &[]));
        assert!(m.sources(0).is_empty());
    }

    #[test]
    fn test_one_to_one_can_connect() {
        let mut m = one_to_one();
        m.set_sources(0, vec![5]);
        assert!(!m.can_connect(1, &[5], MatrixOperation::Absolute));
        assert!(m.can_connect(0, &[5], MatrixOperation::Absolute));
        assert!(m.can_connect(1, &[6], MatrixOperation::Absolute));
        assert!(!m.can_connect(1, &[6, 7], MatrixOperation::Absolute));
        assert!(!m.can_connect(1, &[8], MatrixOperation::Absolute));
    }

    #[test]
    fn test_n_to_n_limits() {
        let mut contents = MatrixContents::new(MatrixType::NToN, 3, 4);
        contents.maximum_connects_per_target = Some(2);
        contents.maximum_total_connects = Some(3);
        let mut m = Matrix::new(contents);
        assert!(m.can_connect(0, &[0, 1], MatrixOperation::Absolute));
        assert!(!m.can_connect(0, &[0, 1, 2], MatrixOperation::Absolute));
        m.set_sources(0, vec![0, 1]);
        assert!(m.can_connect(1, &[2], MatrixOperation::Connect));
        m.set_sources(1, vec![2]);
        assert!(!m.can_connect(2, &[3], MatrixOperation::Connect));
        // replacing keeps the total unchanged
        assert!(m.can_connect(0, &[3], MatrixOperation::Absolute));
    }

    #[test]
    fn test_resize_targets() {
        let mut m = one_to_one();
        m.set_sources(3, vec![1]);
        assert!(m.set_field("targetCount", &Value::Integer(2)));
        assert_eq!(m.connections().count(), 2);
        assert!(!m.has_target(3));
        assert!(m.set_field("targetCount", &Value::Integer(6)));
        assert_eq!(m.connections().count(), 6);
        assert!(!m.set_field("colour", &Value::Integer(1)));
        assert!(!m.set_field("targetCount", &Value::from(u32::MAX)));
        assert_eq!(m.contents.target_count, 6);
    }

    #[test]
    fn test_shrink_sources_drops_connections() {
        let mut m = one_to_one();
        m.set_sources(0, vec![1]);
        m.set_sources(1, vec![7]);
        assert!(m.set_field("sourceCount", &Value::Integer(4)));
        assert_eq!(m.sources(0), &[1]);
        assert!(m.sources(1).is_empty());
        assert!(m.check_connections().is_ok());
    }

    #[test]
    fn test_lowered_limits_are_refused() {
        let mut m = Matrix::new(MatrixContents::new(MatrixType::NToN, 4, 4));
        m.set_sources(0, vec![0, 1, 2]);
        assert!(!m.set_field("maximumConnectsPerTarget", &Value::Integer(2)));
        assert!(!m.set_field("maximumTotalConnects", &Value::Integer(2)));
        assert_eq!(m.sources(0), &[0, 1, 2]);
        assert!(m.set_field("maximumTotalConnects", &Value::Integer(3)));
    }

    #[test]
    fn test_locked_target() {
        let mut m = one_to_one();
        m.set_locked(2, true);
        assert!(m.is_locked(2));
        assert!(!m.can_connect(2, &[1], MatrixOperation::Absolute));
    }

    #[test]
    fn test_function_failures() {
        let failing = Function::new(
            FunctionContents::default(),
            Arc::new(|_: &[Value]| -> FunctionResult { Err("boom".to_string()) }),
        );
        assert_eq!(
            failing.invoke(&[]),
            Err(Error::InvocationFailure("boom".to_string()))
        );

        let panicking = Function::new(
            FunctionContents::default(),
            Arc::new(|_: &[Value]| -> FunctionResult { panic!("handler bug") }),
        );
        assert!(matches!(
            panicking.invoke(&[]),
            Err(Error::InvocationFailure(_))
        ));

        assert!(Function::unbound(FunctionContents::default())
            .invoke(&[])
            .is_err());
    }
}
