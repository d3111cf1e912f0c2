pub mod logger;
pub mod source;
