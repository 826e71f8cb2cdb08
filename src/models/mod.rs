pub mod download;
pub mod manifest;
