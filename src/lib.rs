pub mod aggregator;
pub mod application_state;
pub mod collaborators;
pub mod config;
pub mod consts;
pub mod flow;
pub mod iana;
pub mod listener;
pub mod location;
pub mod pipeline;
pub mod protocol;
pub mod settings;
pub mod sinks;
