//! HTTP API handlers

pub mod events;
pub mod health;
pub mod index;
pub mod rates;
pub mod ui;

pub use events::event_stream;
pub use health::health_routes;
pub use index::serve_index;
pub use rates::get_rates;
pub use ui::{serve_app_js, serve_style_css};
