// Library exports for jicket crate
// This allows tests and other crates to use the modules

pub mod body_extractor;
pub mod config;
pub mod error;
pub mod imap_client;
pub mod jira_client;
pub mod loop_handler;
pub mod mail_filter;
pub mod processed_mail;
pub mod smtp_client;
pub mod ticket_id;
pub mod ticket_processor;
