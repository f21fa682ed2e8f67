pub mod batch;
pub mod upsert;
