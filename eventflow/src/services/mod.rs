//! Service registry used to resolve stage parameters.
//!
//! Services are registered on a [`ServiceCollection`] with a
//! [`ServiceLifetime`] and an optional key, frozen into a
//! [`ServiceProvider`], and resolved through per-run or per-stage
//! [`ServiceScope`]s.

mod registry;

pub use registry::{
    ServiceCollection, ServiceFactory, ServiceLifetime, ServiceProvider, ServiceResolver,
    ServiceResolverExt, ServiceScope,
};
