//! Client registry.
//!
//! Clients are loaded once at startup and never change while the process
//! runs, so the registry can be read concurrently without synchronization.

pub mod model;
pub mod registry;
pub mod secret;

pub use model::{Client, GrantType, TokenEndpointAuthMethod, split_space_list};
pub use registry::{ClientRegistry, RegistryError, StaticClientRegistry};
pub use secret::{ClientSecret, SecretError, hash_secret};
