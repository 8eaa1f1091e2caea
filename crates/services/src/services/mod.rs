pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod domain_events;
pub mod email;
pub mod job_service;
pub mod requests;
