//! Record store: schema, protocols and yield records

pub mod init;
pub mod migrations;
pub mod models;
pub mod protocols;
pub mod yield_records;

pub use init::init_database;
pub use models::*;
pub use protocols::{get_protocol_by_name, upsert_protocol};
pub use yield_records::*;
