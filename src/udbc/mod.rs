pub mod connector;

pub const DEFAULT_DB_NAME: &'static str = "default";
