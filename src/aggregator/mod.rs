pub mod cache;
pub mod conversation;
pub mod socket;
