pub mod coordinator;
pub mod parse;
pub mod probe;
pub mod request;
pub mod runtime;
