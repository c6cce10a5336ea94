#![forbid(unsafe_code)]

//! Ambient configuration layer: the minimal flat YAML grammar for
//! Formula/Goal/Trajectory files, their loaders, path-safety validation,
//! and `SoloConfig` (`.spin/config.json`). Grounded on the teacher's
//! preference for small, explicit schemas over a general-purpose parser
//! (spec's own design note: "preserved to avoid pulling a full YAML
//! parser dependency").

pub mod error;
pub mod formula;
pub mod goal;
pub mod path_safety;
pub mod solo_config;
pub mod trajectory;
pub mod yaml;

pub use error::ConfigError;
pub use formula::load_formula;
pub use goal::load_goal;
pub use solo_config::SoloConfig;
pub use trajectory::load_trajectory;
