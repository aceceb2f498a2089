pub mod contact;
pub mod custom_field;
pub mod submission;
pub mod sync;
