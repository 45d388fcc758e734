pub mod auth;
pub mod config;
pub mod controller;
pub mod logging;
pub mod paths;
pub mod poller;
pub mod remote;
pub mod session;
pub mod speech;
pub mod store;
