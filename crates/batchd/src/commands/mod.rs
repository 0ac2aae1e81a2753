pub mod init;
pub mod pipeline;
