pub mod chat;
pub mod credential;
pub mod export;
pub mod import;
pub mod prompt;
pub mod provider;
pub mod storyboard;
