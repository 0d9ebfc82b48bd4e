//! Handles IO related processing as well as multithreading.

pub mod scheduler;
pub mod source_client;
pub mod url_template;
