//! CLI arguments and storage constants.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const STREAM_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;
pub const UPLOADS_MARKER: &str = "/uploads/";
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000";
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "application/pdf",
    "application/octet-stream",
];

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "lesson-uploads", version = VERSION_INFO, about = "Course upload file server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "UPLOADS_STORAGE_DIR",
        default_value = "clarify_uploads",
        help = "Root directory for stored files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "UPLOADS_BIND",
        default_value = "127.0.0.1",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPLOADS_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPLOADS_CORS_ORIGINS",
        default_value = DEFAULT_CORS_ORIGINS,
        help = "Comma separated CORS origins (empty to disable)"
    )]
    pub cors_origins: String,
    #[arg(
        long,
        env = "UPLOADS_MAX_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload size in bytes"
    )]
    pub max_upload_size: u64,
}
