pub mod auth;
pub mod common;
pub mod config;
pub mod downloader;
pub mod parser;
