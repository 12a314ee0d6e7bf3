pub mod parser;
pub mod merger;
pub mod loader;
