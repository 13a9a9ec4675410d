pub mod backend;
pub mod files;
