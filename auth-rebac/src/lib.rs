//! Relationship-based access control gateway
//!
//! Authorization state lives in an external permission engine as
//! relationship tuples (`resource#relation@subject`). This crate provides:
//! - A typed tuple model with optional caveats and expiry
//! - An [`AuthorizationGateway`] over the engine's four primitives
//!   (write, delete, read by filter, check)
//! - Group indirection through `group:<id>#member` subjects
//! - Permission-filtered hierarchy traversal over `parent` edges
//! - Summary counts over a hierarchy result
//!
//! # Example
//!
//! ```rust
//! use auth_rebac::{
//!     CreateResourceRequest, GatewayConfig, InMemoryEngine, RebacServices, ResourceRef,
//!     ResourceType,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = RebacServices::new(Arc::new(InMemoryEngine::new()), &GatewayConfig::default());
//!
//!     services
//!         .resources
//!         .create_resource(&CreateResourceRequest {
//!             resource_type: ResourceType::File,
//!             resource_id: "report".to_string(),
//!             requester_id: "alice".to_string(),
//!             parent_resource_type: None,
//!             parent_resource_id: None,
//!         })
//!         .await?;
//!
//!     let hierarchy = services
//!         .resources
//!         .hierarchy(&ResourceRef::file("report"), "alice")
//!         .await?;
//!     assert_eq!(hierarchy.summary.total_relations, 0);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod groups;
pub mod hierarchy;
pub mod models;
pub mod resources;
pub mod services;
pub mod summary;

pub use crate::config::{EngineConfig, GatewayConfig, HierarchyConfig};
pub use engine::{InMemoryEngine, PermissionEngine, RelationshipFilter, SpiceDbHttpEngine, SubjectFilter};
pub use error::*;
pub use gateway::AuthorizationGateway;
pub use groups::*;
pub use hierarchy::*;
pub use models::*;
pub use resources::*;
pub use services::RebacServices;
pub use summary::HierarchySummary;
