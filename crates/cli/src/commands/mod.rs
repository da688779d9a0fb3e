pub mod config_cmd;
pub mod notify;
pub mod onboard;
pub mod runtime;
pub mod serve;
pub mod status;
pub mod sweep;
pub mod tasks;
