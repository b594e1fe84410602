pub mod cli;
pub mod common;
pub mod config;
pub mod downloader;
pub mod parser;
pub mod proxy;
