pub mod config;
pub mod db;
pub mod ipc;
pub mod model;
pub mod scheduler;
pub mod timewindow;
