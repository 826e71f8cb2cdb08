pub mod dependencies;
pub mod downloads;
pub mod settings;
