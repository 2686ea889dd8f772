//! Deployments
//!
//! - [`DeploymentBuilder`]: resource and metadata collection
//! - [`Deployer`]: validation, hashing, duplicate filtering, versioning
//! - [`ResourceParser`] / [`FlowResourceParser`]: process models in resources
//! - [`DeploymentCache`]: parsed models by definition id

pub mod builder;
pub mod cache;
pub mod deployer;
pub mod parser;
pub(crate) mod suspension;

pub use builder::DeploymentBuilder;
pub use cache::{CachedDefinition, DeploymentCache};
pub use deployer::{content_hash, Deployer, DeploymentRequest};
pub use parser::{validate_key, FlowResourceParser, ParseOptions, ProcessModel, ResourceParser};
pub use suspension::ChangeSuspensionState;
