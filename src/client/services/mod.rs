pub mod chat_service;
pub mod listener;
pub mod tmdb;
