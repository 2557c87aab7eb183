pub mod collection;
pub mod common;
pub mod completions;
pub mod entity;
pub mod export;
pub mod head;
pub mod import;
pub mod maintenance;
