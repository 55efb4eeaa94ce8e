//! Embertree Core
//!
//! Element tree, addressing and matrix routing for an Ember+-style
//! control-tree provider.
//!
//! This crate provides:
//! - The element tree ([`Tree`], [`Element`]) with nodes, parameters,
//!   matrices and functions
//! - Qualified path parsing ([`TreePath`]) and relative request resolution
//! - Request/response trees ([`Root`], [`TreeItem`]) and their codec
//! - The matrix routing engine ([`matrix::route`])
//! - Declarative tree descriptions ([`loader`])

pub mod codec;
pub mod element;
pub mod error;
pub mod loader;
pub mod matrix;
pub mod message;
pub mod path;
pub mod tree;
pub mod types;

pub use codec::{decode, encode};
pub use element::{Element, ElementKind, Function, FunctionHandler, FunctionResult, Matrix};
pub use error::{Error, Result};
pub use loader::{ElementDescription, FunctionRegistry};
pub use matrix::{route, ChangeKind, MatrixChange, RoutingOutcome};
pub use message::*;
pub use path::TreePath;
pub use tree::Tree;
pub use types::*;

/// Default TCP port for the provider
pub const DEFAULT_PORT: u16 = 9000;
