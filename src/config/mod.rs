//! Process settings loaded from defaults and `REDMUX_*` environment
//! variables.

pub mod settings;

pub use settings::Settings;
