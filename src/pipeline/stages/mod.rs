pub mod conversation;
pub mod decode;
pub mod enrich;
pub mod output;
pub mod postprocess;
pub mod security;
pub mod stats;
