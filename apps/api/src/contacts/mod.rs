pub mod handlers;
pub mod service;

pub use service::{update_contact, ContactService};
