//! Layered configuration: YAML files merged with command line overrides and validated
//! into immutable, backend-specific records.

pub mod layers;
pub mod overrides;
pub mod schema;

pub use layers::{ConfigLocations, load_layer, merge};
pub use overrides::parse_overrides;
pub use schema::{BackendSchema, BaseConfig, Section};
