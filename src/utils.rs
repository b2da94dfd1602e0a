//! General purpose configuration types for getter
//! - The shared `Token`
//! - The validated `FileList` a client asks for
//! - `Options`, the validated configuration every command runs from
//! - CLI argument structs for `serve` and `fetch`

use clap::Args;
use log::warn;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cryptography::create_token;
use crate::error::ConfigError;
use crate::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, DEFAULT_TIMEOUT, DEFAULT_TTL, FILE_SEPARATOR,
    MAX_FILES, MAX_FILE_NAME, TOKEN_FORMAT, TOKEN_SIZE,
};

/// Shared secret in its normalized form.
///
/// Only the `xxxxxx.xxxxxxxxxxxxxxxx` form is accepted. The two hex groups are
/// decoded into 11 raw bytes which feed key derivation; the dot is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    text: String,
    raw: Vec<u8>,
}

impl Token {
    pub fn parse(text: &str) -> Result<Token, ConfigError> {
        let format_error = || ConfigError::TokenFormat {
            format: TOKEN_FORMAT,
        };

        let bytes = text.as_bytes();
        if bytes.len() != TOKEN_SIZE || bytes[6] != b'.' {
            return Err(format_error());
        }

        let (id, secret) = (&text[..6], &text[7..]);
        let is_lower_hex = |s: &str| s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !is_lower_hex(id) || !is_lower_hex(secret) {
            return Err(format_error());
        }

        let mut raw = hex::decode(id).map_err(|_| format_error())?;
        raw.extend(hex::decode(secret).map_err(|_| format_error())?);

        Ok(Token {
            text: text.to_string(),
            raw,
        })
    }

    /// Creates and parses a fresh random token.
    pub fn generate() -> Result<Token, ConfigError> {
        Token::parse(&create_token())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The textual form, for showing to the operator once at startup.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(..)")
    }
}

/// Ordered list of files requested from the server.
///
/// Order is significant: the server answers in exactly this order. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileList(Vec<String>);

impl FileList {
    /// Parses the CLI form: names separated by `,` or `;`, surrounding whitespace trimmed.
    pub fn parse(input: &str) -> Result<FileList, ConfigError> {
        let names = input
            .split([',', ';'])
            .map(|name| name.trim().to_string())
            .collect();
        FileList::new(names)
    }

    /// Validates an already split list of names.
    pub fn new(names: Vec<String>) -> Result<FileList, ConfigError> {
        if names.len() > MAX_FILES {
            return Err(ConfigError::TooManyFiles { max: MAX_FILES });
        }

        for (position, name) in names.iter().enumerate() {
            if name.is_empty() {
                if names.len() == 1 {
                    return Err(ConfigError::EmptyFileList);
                }
                return Err(ConfigError::EmptyFileName(position));
            }
            validate_file_name(name)?;
        }

        if names.is_empty() {
            return Err(ConfigError::EmptyFileList);
        }

        Ok(FileList(names))
    }

    /// Splits the decrypted wire form back into names. No validation happens here;
    /// the server checks every name on its own before touching the filesystem.
    pub fn split_wire(wire: &str) -> Vec<String> {
        wire.split(FILE_SEPARATOR).map(str::to_string).collect()
    }

    /// The wire form: names joined with `,`.
    pub fn join(&self) -> String {
        self.0.join(FILE_SEPARATOR)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Checks a single requested name against the traversal and size rules.
///
/// Fetching files above the server's input path is a security risk, so `..`
/// anywhere in the name and absolute paths are refused.
pub fn validate_file_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyFileName(0));
    }
    if name.len() > MAX_FILE_NAME {
        return Err(ConfigError::FileNameTooLong {
            name: name.to_string(),
            max: MAX_FILE_NAME,
        });
    }
    if name.contains("..") {
        return Err(ConfigError::ParentEscape(name.to_string()));
    }
    if name.contains(FILE_SEPARATOR) {
        return Err(ConfigError::Delimiter(name.to_string()));
    }
    if Path::new(name).has_root() || name.starts_with(['/', '\\']) {
        return Err(ConfigError::AbsolutePath(name.to_string()));
    }
    Ok(())
}

/// Validated configuration shared by both roles.
#[derive(Debug, Clone)]
pub struct Options {
    pub token: Token,
    pub address: IpAddr,
    pub port: u16,
    /// Zero disables the TTL.
    pub ttl: Duration,
    /// Per-operation I/O bound; `None` blocks forever.
    pub timeout: Option<Duration>,
    pub max_connections: usize,
    pub files: FileList,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub listen: bool,
}

impl Options {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Arguments for `getter serve`
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on; the preferred outbound IP if empty
    #[arg(long, default_value = "")]
    pub address: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum time (seconds) for the process to be active. 0 for no limit
    #[arg(long, default_value_t = DEFAULT_TTL)]
    pub ttl: u64,

    /// Per read/write timeout in seconds. 0 for no timeout
    #[arg(long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Token used for authorization, e.g. abcdef.1234567890abcdef. Generated if omitted
    #[arg(long, env = "GETTER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory the requested files are served from
    #[arg(long, default_value = "./")]
    pub input_path: PathBuf,
}

impl ServeArgs {
    pub fn into_options(self) -> Result<Options, ConfigError> {
        let token = match self.token.as_deref() {
            None | Some("") => Token::generate()?,
            Some(text) => Token::parse(text)?,
        };

        Ok(Options {
            token,
            address: resolve_address(&self.address)?,
            port: self.port,
            ttl: Duration::from_secs(self.ttl),
            timeout: seconds_or_none(self.timeout),
            max_connections: self.max_connections.max(1),
            files: FileList::default(),
            input_path: self.input_path,
            output_path: PathBuf::from("./"),
            listen: true,
        })
    }
}

/// Arguments for `getter fetch`
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Address of the server to connect to; the preferred outbound IP if empty
    #[arg(long, default_value = "")]
    pub address: String,

    /// Port to connect to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum time (seconds) for the process to be active. 0 for no limit
    #[arg(long, default_value_t = DEFAULT_TTL)]
    pub ttl: u64,

    /// Per read/write timeout in seconds. 0 for no timeout
    #[arg(long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    /// Token used for authorization, e.g. abcdef.1234567890abcdef
    #[arg(long, env = "GETTER_TOKEN", hide_env_values = true, default_value = "")]
    pub token: String,

    /// Files to get from the server folder, separated by ',' or ';'
    #[arg(long)]
    pub files: String,

    /// Directory the downloaded files are written to
    #[arg(long, default_value = "./")]
    pub output_path: PathBuf,
}

impl FetchArgs {
    pub fn into_options(self) -> Result<Options, ConfigError> {
        let token = Token::parse(&self.token)?;
        let files = FileList::parse(&self.files)?;
        ensure_output_path(&self.output_path)?;

        Ok(Options {
            token,
            address: resolve_address(&self.address)?,
            port: self.port,
            ttl: Duration::from_secs(self.ttl),
            timeout: seconds_or_none(self.timeout),
            max_connections: 1,
            files,
            input_path: PathBuf::from("./"),
            output_path: self.output_path,
            listen: false,
        })
    }
}

fn seconds_or_none(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn resolve_address(address: &str) -> Result<IpAddr, ConfigError> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(detect_outbound_ip());
    }
    address
        .parse()
        .map_err(|_| ConfigError::Address(address.to_string()))
}

fn ensure_output_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() || path == Path::new("./") {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| ConfigError::OutputPath {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Finds the local address the OS would route public traffic through.
///
/// No packet is sent: connecting a UDP socket only picks a route.
/// Falls back to 127.0.0.1 when there is no route.
pub fn detect_outbound_ip() -> IpAddr {
    let detected = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip());

    match detected {
        Ok(ip) => ip,
        Err(e) => {
            warn!("cannot obtain outbound IP ({}), using 127.0.0.1", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
