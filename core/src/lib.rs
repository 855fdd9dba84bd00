pub mod cli;
pub mod clarification;
pub mod config;
pub mod domain;
pub mod durable_store;
pub mod errors;
pub mod eventlog;
pub mod queue;
pub mod redact;
pub mod repl;
pub mod session_manager;
pub mod supervisor;
pub mod verification;
pub mod worker;
