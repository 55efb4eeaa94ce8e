//! Embertree Server
//!
//! The provider side of the control tree protocol:
//! - Manages client sessions and their ordered request handling
//! - Dispatches directory, subscribe, unsubscribe, invoke and value-set
//!   requests against the element tree
//! - Routes matrix connection requests
//! - Pushes changes to subscribers, never back to the client that caused them
//! - Publishes lifecycle and domain events
//!
//! # Example
//!
//! ```no_run
//! use embertree_core::{loader, FunctionRegistry};
//! use embertree_server::{ServerConfig, TreeServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tree = loader::load_str(r#"[{"identifier": "device", "children": []}]"#,
//!         &FunctionRegistry::new())?;
//!     let server = TreeServer::new(tree, ServerConfig::default());
//!     server.serve_tcp("0.0.0.0:9000").await?;
//!     Ok(())
//! }
//! ```

mod dispatcher;
pub mod error;
pub mod events;
pub mod server;
pub mod session;
pub mod subscription;

pub use dispatcher::SetOutcome;
pub use error::{Result, ServerError};
pub use events::{EventBus, MatrixEvent, ServerEvent};
pub use server::{ServerConfig, TreeServer};
pub use session::{Session, SessionId};
pub use subscription::SubscriptionRegistry;
