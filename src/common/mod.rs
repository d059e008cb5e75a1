pub mod models;
pub mod crypto;
pub mod rating;
pub mod catalog;
