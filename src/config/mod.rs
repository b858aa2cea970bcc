//! Configuration lookup for merx and the CLI
//!
//! Values are looked up in layers (explicit overrides, `TOMEKEEPER_*`
//! environment variables, then the library's `config.json`) and every hit
//! reports the layer it came from so it can be recorded as fetch provenance.

pub mod coerce;
pub mod loader;

pub use coerce::{coerce, display_value};
pub use loader::{env_key, Config, ConfigSource, ENV_PREFIX};
