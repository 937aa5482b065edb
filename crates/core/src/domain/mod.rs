pub mod conversation;
pub mod intent;
pub mod knowledge;
pub mod memory;
pub mod plan;
pub mod query;
pub mod response;
pub mod validation;
