// opflow/src/service/mod.rs

//! Services group operations by API version. Operations of later versions
//! inherit the setup of earlier ones through forward links.

pub mod builder;
pub mod template;
pub mod version;

pub use builder::{OperationMut, ServiceBuilder};
pub use template::{ApiDefinition, OperationTemplate, ServiceDocument};
pub use version::{Service, Version};
