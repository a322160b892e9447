pub mod api;
pub mod config;
pub mod conversation;
pub mod db;
pub mod inference;
pub mod model;
