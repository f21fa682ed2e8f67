pub mod db;
pub mod demo;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod repo;
pub mod timeline;
pub mod validate;
pub mod watcher;
pub mod workspace;
