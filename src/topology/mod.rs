//! Broker topology: declared at startup, frozen before the bus exists.
//!
//! This module contains:
//! - `HostingBuilder`: mutable startup-time accumulator
//! - `EndpointRegistry`: frozen messageType → queue path / timeout maps
//! - `ReceiverConfigurationSet`: frozen queue → consumer declarations
//!
//! The builder is consumed exactly once by `freeze()`; the snapshots it
//! produces are immutable by construction and shared without locking.

mod builder;
mod receivers;
mod registry;

pub use builder::{HostingBuilder, TopologyError, DEFAULT_RESPONSE_TIMEOUT};
pub use receivers::{EndpointOptions, QueueDeclaration, ReceiverConfigurationSet, RetryPolicy};
pub use registry::{EndpointRegistry, ResolveError};
