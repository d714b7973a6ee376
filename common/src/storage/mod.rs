pub mod db;
pub mod types;
pub mod version_store;
