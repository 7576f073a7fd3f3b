//! Configuration loading
//!
//! Files (TOML or JSON) and `STREAMWARDEN_*` environment overrides on top of
//! the defaults of [`streamwarden_domain::WardenConfig`].

pub mod loader;

pub use loader::{
    apply_env_overrides, apply_env_overrides_from, load, load_from_env, load_from_file,
    parse_config, probe_config_paths,
};
