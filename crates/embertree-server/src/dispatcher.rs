//! Request dispatch
//!
//! A [`Dispatcher`] handles one request (or one administrative operation)
//! while the caller holds the tree lock. It resolves the addressed element,
//! applies commands, value sets and connection changes, answers the
//! requesting client and pushes changes to subscribers.

use dashmap::DashMap;
use embertree_core::{
    codec, matrix, ChangeKind, Command, CommandKind, Element, ElementKind, Error, Invocation,
    InvocationResult, ItemKind, MatrixConnection, Root, RoutingOutcome, Tree, TreeItem, TreePath,
    Value,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::events::{EventBus, MatrixEvent, ServerEvent};
use crate::session::{Session, SessionId};
use crate::subscription::SubscriptionRegistry;

type CoreResult<T> = std::result::Result<T, Error>;

/// Result of a value assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Value assigned and pushed to subscribers
    Applied,
    /// The element carries nothing assignable
    NoContents,
    /// The parameter's access level does not permit writes
    ReadOnly,
    /// Matrix contents have no such field or the value does not fit it
    UnknownField,
}

pub(crate) struct Dispatcher<'a> {
    tree: &'a mut Tree,
    sessions: &'a DashMap<SessionId, Arc<Session>>,
    subscriptions: &'a SubscriptionRegistry,
    events: &'a EventBus,
    client: Option<&'a Session>,
    /// Whether the current request used the qualified form
    qualified: bool,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        tree: &'a mut Tree,
        sessions: &'a DashMap<SessionId, Arc<Session>>,
        subscriptions: &'a SubscriptionRegistry,
        events: &'a EventBus,
        client: Option<&'a Session>,
    ) -> Self {
        Self {
            tree,
            sessions,
            subscriptions,
            events,
            client,
            qualified: false,
        }
    }

    /// Handle a decoded request root, returning the path it resolved to
    pub(crate) fn handle_root(&mut self, root: &Root) -> Option<String> {
        let Some(first) = root.first() else {
            debug!("Ignoring empty request");
            return None;
        };
        self.qualified = first.is_qualified();

        let result = if let Some(path) = &first.path {
            self.handle_qualified(path, first)
                .map(|_| path.to_string())
        } else if let Some(command) = first.as_command() {
            self.handle_command(&TreePath::root(), command)
                .map(|_| "root".to_string())
        } else {
            self.handle_relative(first).map(|path| path.to_string())
        };

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Rejected request: {}", e);
                self.events.emit(ServerEvent::Error(e));
                let minimal = self.tree.minimal();
                self.respond(&minimal);
                None
            }
        }
    }

    fn handle_qualified(&mut self, path: &TreePath, item: &TreeItem) -> CoreResult<()> {
        if self.tree.get(path).is_none() {
            return Err(Error::PathNotFound(path.clone()));
        }

        if let Some(command) = item.as_command() {
            return self.handle_command(path, command);
        }
        if let Some(child) = item.children.first() {
            return match child.as_command() {
                Some(command) => self.handle_command(path, command),
                None => Err(Error::InvalidRequest(format!(
                    "qualified item at {} has a non-command child",
                    path
                ))),
            };
        }
        self.apply_contents(path, item)
    }

    fn handle_relative(&mut self, item: &TreeItem) -> CoreResult<TreePath> {
        let (path, terminal) = self.tree.resolve_relative(item)?;
        match terminal.as_command() {
            Some(command) => self.handle_command(&path, command)?,
            None => self.apply_contents(&path, terminal)?,
        }
        Ok(path)
    }

    /// Apply the contents a request carries for the element at `path`
    fn apply_contents(&mut self, path: &TreePath, item: &TreeItem) -> CoreResult<()> {
        match &item.kind {
            ItemKind::Matrix { connections, .. } if !connections.is_empty() => {
                self.apply_connections(path, connections).map(|_| ())
            }
            ItemKind::Parameter(Some(contents)) if contents.value.is_some() => {
                let value = contents.value.clone().unwrap_or(Value::Null);
                let outcome = self.set_value(path, value)?;
                debug!("Value set at {}: {:?}", path, outcome);
                let response = if self.qualified {
                    self.tree.qualified_response(path)
                } else {
                    self.tree.response(path)
                };
                if let Some(response) = response {
                    self.respond(&response);
                }
                Ok(())
            }
            _ => Err(Error::InvalidRequest(format!(
                "nothing to apply at {}",
                path
            ))),
        }
    }

    fn handle_command(&mut self, path: &TreePath, command: &Command) -> CoreResult<()> {
        match command.kind() {
            Some(CommandKind::GetDirectory) => self.get_directory(path),
            Some(CommandKind::Subscribe) => {
                self.subscribe(path);
                Ok(())
            }
            Some(CommandKind::Unsubscribe) => {
                self.unsubscribe(path);
                Ok(())
            }
            Some(CommandKind::Invoke) => self.invoke(path, command.invocation.as_ref()),
            None => Err(Error::InvalidRequest(format!(
                "unknown command {}",
                command.number
            ))),
        }
    }

    fn get_directory(&mut self, path: &TreePath) -> CoreResult<()> {
        let element = self
            .tree
            .get(path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;

        let implied: Vec<TreePath> = if element.reports_changes() {
            vec![element.path().clone()]
        } else if element.is_node() {
            element
                .children()
                .iter()
                .filter(|c| c.reports_changes())
                .map(|c| c.path().clone())
                .collect()
        } else {
            Vec::new()
        };
        for p in &implied {
            self.subscribe(p);
        }

        if let Some(response) = self.tree.qualified_response(path) {
            self.respond(&response);
        }
        Ok(())
    }

    fn subscribe(&self, path: &TreePath) {
        if let Some(client) = self.client {
            if self.subscriptions.subscribe(path, &client.id) {
                debug!("{} subscribed to '{}'", client.address, path);
            }
        }
    }

    fn unsubscribe(&self, path: &TreePath) {
        if let Some(client) = self.client {
            if self.subscriptions.unsubscribe(path, &client.id) {
                debug!("{} unsubscribed from '{}'", client.address, path);
            }
        }
    }

    fn invoke(&mut self, path: &TreePath, invocation: Option<&Invocation>) -> CoreResult<()> {
        let invocation = invocation
            .ok_or_else(|| Error::InvalidRequest(format!("invoke at '{}' without invocation", path)))?;

        let result = match self.tree.get(path).and_then(Element::as_function) {
            Some(function) => match function.invoke(&invocation.arguments) {
                Ok(values) => InvocationResult::success(invocation.id, values),
                Err(e) => {
                    error!("Invocation {} at {} failed: {}", invocation.id, path, e);
                    self.events.emit(ServerEvent::Error(e));
                    InvocationResult::failure(invocation.id)
                }
            },
            None => {
                warn!("Invocation {} at '{}': not a function", invocation.id, path);
                InvocationResult::failure(invocation.id)
            }
        };

        self.respond(&Root::with_result(result));
        Ok(())
    }

    /// Route connection requests through the matrix at `path`
    ///
    /// Client requests are answered with the per-target results in the
    /// request's shape and announce each change as an event. Subscribers are
    /// updated whenever some target did not end as a tally.
    pub(crate) fn apply_connections(
        &mut self,
        path: &TreePath,
        requests: &[MatrixConnection],
    ) -> CoreResult<RoutingOutcome> {
        let defaults = self.tree.default_sources(path).unwrap_or_default();
        let matrix = self
            .tree
            .get_mut(path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?
            .as_matrix_mut()
            .ok_or_else(|| Error::MatrixValidation {
                path: path.clone(),
                reason: "element is not a matrix".to_string(),
            })?;

        let outcome = matrix::route(matrix, requests, &defaults);

        let kind = ItemKind::Matrix {
            contents: None,
            connections: outcome.connections(),
        };
        let response = if self.client.is_some() && self.qualified {
            Root::with_element(TreeItem::qualified(path.clone(), kind))
        } else {
            let leaf = TreeItem::new(path.last().unwrap_or_default(), kind);
            Root::with_element(self.tree.branch(path, leaf))
        };

        if let Some(client) = self.client {
            for change in &outcome.changes {
                let event = MatrixEvent {
                    path: path.clone(),
                    target: change.target,
                    sources: change.sources.clone(),
                    client: Some(client.address),
                };
                self.events.emit(match change.kind {
                    ChangeKind::Connect => ServerEvent::MatrixConnect(event),
                    ChangeKind::Disconnect => ServerEvent::MatrixDisconnect(event),
                    ChangeKind::Change => ServerEvent::MatrixChange(event),
                });
            }
            self.respond(&response);
        }

        if outcome.has_updates() {
            self.notify(path, &response);
        }
        Ok(outcome)
    }

    /// Assign a parameter value, honouring its access level
    pub(crate) fn set_value(&mut self, path: &TreePath, value: Value) -> CoreResult<SetOutcome> {
        let element = self
            .tree
            .get_mut(path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;

        let outcome = match element.kind_mut() {
            ElementKind::Parameter(contents) if contents.is_writable() => {
                contents.value = Some(value);
                SetOutcome::Applied
            }
            ElementKind::Parameter(_) => SetOutcome::ReadOnly,
            ElementKind::Matrix(_) => SetOutcome::UnknownField,
            ElementKind::Node(_) | ElementKind::Function(_) => SetOutcome::NoContents,
        };

        if outcome == SetOutcome::Applied {
            self.publish_change(path);
        }
        Ok(outcome)
    }

    /// Assign a named matrix contents field
    pub(crate) fn set_matrix_field(
        &mut self,
        path: &TreePath,
        key: &str,
        value: &Value,
    ) -> CoreResult<SetOutcome> {
        let element = self
            .tree
            .get_mut(path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;

        let outcome = match element.as_matrix_mut() {
            Some(matrix) => {
                if matrix.set_field(key, value) {
                    SetOutcome::Applied
                } else {
                    SetOutcome::UnknownField
                }
            }
            None => SetOutcome::NoContents,
        };

        if outcome == SetOutcome::Applied {
            self.publish_change(path);
        }
        Ok(outcome)
    }

    /// Swap in a new subtree and refresh its subscribers
    pub(crate) fn replace_element(&mut self, path: &TreePath, element: Element) -> CoreResult<()> {
        self.tree.replace_element(path, element)?;
        if let Some(response) = self.tree.response(path) {
            self.notify(path, &response);
        }
        Ok(())
    }

    fn publish_change(&self, path: &TreePath) {
        if let Some(response) = self.tree.response(path) {
            self.notify(path, &response);
        }
        if let Some(element) = self.tree.get(path) {
            self.events.emit(ServerEvent::ValueChange(element.shallow()));
        }
    }

    fn notify(&self, path: &TreePath, response: &Root) {
        let data = match codec::encode(response) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode update for {}: {}", path, e);
                return;
            }
        };
        let origin = self.client.map(|c| &c.id);
        let count = self
            .subscriptions
            .notify(path, &data, origin, self.sessions);
        if count > 0 {
            debug!("Pushed update for '{}' to {} subscribers", path, count);
        }
    }

    fn respond(&self, response: &Root) {
        if let Some(client) = self.client {
            if let Err(e) = client.send(response) {
                warn!("Failed to answer {}: {}", client.address, e);
            }
        }
    }
}
