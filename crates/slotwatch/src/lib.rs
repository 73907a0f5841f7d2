pub mod alert;
pub mod client;
pub mod config;
pub mod monitor;
pub mod parser;
pub mod proxy;
pub mod types;

pub use client::WidgetClient;
pub use monitor::Monitor;

pub(crate) const DEFAULT_BASE_URL: &str = "https://www.citaconsular.es";
