pub mod bootstrap;
pub mod rotate;
pub mod run;
pub mod show_config;
pub mod status;
pub mod sweep;
