//! Dynamic tool integration.
//!
//! Tool services self-describe through a manifest endpoint; the registry
//! polls those manifests into a TTL cache and the invoker validates model
//! arguments against the advertised JSON schema before any network call
//! goes out. New tools appear without redeploying the engine.

pub mod invoker;
pub mod manifest;
pub mod registry;

pub use invoker::ToolInvoker;
pub use manifest::{validate_arguments, DiscoveredTool, ToolManifest};
pub use registry::ToolRegistry;
