//! Machine backend adapters.
//!
//! A template and its provider are parsed once into a typed
//! [`BackendConfig`]; a [`BackendFactory`] turns that into a
//! [`MachineBackend`], a closed enum over the docker, libvirt and OpenStack
//! adapters exposing `create` and `destroy`. Each adapter talks to its
//! backend through a small client trait with a CLI implementation, so the
//! adapters can be driven against in-memory fakes in tests.

pub mod backend;
pub mod config;
pub mod docker;
pub mod error;
pub mod factory;
pub mod kind;
pub mod libvirt;
pub mod openstack;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use backend::{InstanceRef, MachineBackend, Provisioned};
pub use config::{BackendConfig, DockerLimits, ProviderParams, TemplateParams};
pub use error::{ProviderError, Result};
pub use factory::{BackendFactory, CliBackendFactory};
pub use kind::BackendKind;
