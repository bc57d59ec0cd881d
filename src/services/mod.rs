pub mod auth;
pub mod email;
pub mod init;
pub mod opus;
pub mod upload;
pub mod youtube;
