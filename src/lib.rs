pub mod auth;
pub mod controller;
pub mod db;
pub mod errors;
pub mod http;
pub mod logging;
pub mod manage_settings;
pub mod mod_actions;
pub mod mod_executors;
pub mod mod_filter;
pub mod mod_request;
pub mod notify;
pub mod repair_boards;
pub mod restore;
pub mod security;
pub mod services;
