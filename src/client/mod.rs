pub mod services;
pub mod utils;
pub mod message_card;
