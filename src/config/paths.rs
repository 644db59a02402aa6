//! Platform paths for configuration and workspace state.

pub mod xdg_root;
