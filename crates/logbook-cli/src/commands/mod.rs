pub mod add;
pub mod attach;
pub mod common;
pub mod delete;
pub mod edit;
pub mod list;
pub mod status;
pub mod sweep;
pub mod sync;
