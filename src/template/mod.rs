//! Prompt template system.
//!
//! This module provides:
//! - Template definition with variable placeholders ({{variable}})
//! - Versioned template storage with atomic update-and-snapshot semantics
//! - A read-through, TTL-bounded cache with invalidate-on-write
//! - Variable substitution engine for rendering prompt bodies
//!
//! # Example
//!
//! ```ignore
//! let store = TemplateStore::new(storage, cache);
//!
//! // Create a template (an initial version is snapshotted atomically)
//! let template = store
//!     .create(
//!         CreateTemplateRequest {
//!             name: "order-summary".to_string(),
//!             description: Some("Summarize an order for support agents".to_string()),
//!             body: "Summarize order {{order_id}} for {{customer}}.".to_string(),
//!             temperature: Some(0.4),
//!             category: Some("support".to_string()),
//!             active: true,
//!         },
//!         "alice",
//!     )
//!     .await?;
//!
//! // Resolve through the cache and render
//! let resolved = store.resolve_active("order-summary").await?.unwrap();
//! let mut vars = HashMap::new();
//! vars.insert("order_id".to_string(), "ORD-123".to_string());
//! let prompt = substitute_variables(&resolved.body, &vars);
//! ```

mod cache;
mod store;
mod substitution;
mod types;

pub use cache::TemplateCache;
pub use store::{create_template_store, TemplateStore};
pub use substitution::{extract_placeholders, substitute_variables};
pub use types::{CreateTemplateRequest, Template, TemplateError, TemplatePatch, TemplateVersion};
