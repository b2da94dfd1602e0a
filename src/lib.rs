pub mod bytes;
pub mod commands;
pub mod cryptography;
pub mod error;
pub mod exchange;
pub mod handshake;
pub mod networking;
pub mod session;
pub mod utils;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const HANDSHAKE_SIZE: usize = 1024;
pub const LENGTH_PREFIX_SIZE: usize = 4;
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

pub const TOKEN_SIZE: usize = 23;
pub const TOKEN_FORMAT: &str = "6 lowercase hex digits, a dot, then 16 lowercase hex digits";

pub const MAX_FILES: usize = 128;
pub const MAX_FILE_NAME: usize = 128;
pub const FILE_SEPARATOR: &str = ",";

pub const DEFAULT_PORT: u16 = 11764;
pub const DEFAULT_TTL: u64 = 600;
pub const DEFAULT_TIMEOUT: u64 = 60;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
