pub mod args;
pub mod error;
pub mod executor;
pub mod planner;
pub mod probe;
pub mod processor;
pub mod scanner;
pub mod summary;
pub mod tool;
