pub mod config;
pub mod core;
pub mod drive;
pub mod ipcr;
pub mod main_module;
pub mod security;
