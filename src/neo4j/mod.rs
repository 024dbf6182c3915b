//! Neo4j graph store integration

pub mod client;
pub mod mock;
pub mod models;
pub mod traits;

pub use client::Neo4jClient;
pub use mock::MockGraphStore;
pub use models::{ExecOptions, GraphError, SchemaIntrospection};
pub use traits::GraphStore;
