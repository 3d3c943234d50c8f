pub mod create_chat_completions;
pub mod get_model;
pub mod list_models;
pub mod types;
