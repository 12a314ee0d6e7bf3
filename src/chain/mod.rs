pub mod walk;
pub mod engine;
