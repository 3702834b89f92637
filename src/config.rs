//! 命令行参数、默认值与运行期配置。

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_SERVE_DIR: &str = "./shared";
pub const DEFAULT_REALM: &str = "FileDrop";
pub const DEFAULT_LOG_FILE: &str = "server.log";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "filedrop", version, about = "Single-directory file drop server")]
pub struct Args {
    #[arg(
        short = 'd',
        long = "dir",
        env = "FILEDROP_DIR",
        default_value = DEFAULT_SERVE_DIR,
        help = "Directory to list, serve and receive files in"
    )]
    pub serve_dir: String,
    #[arg(
        long,
        env = "FILEDROP_PASSWORD",
        help = "Shared password for Basic auth (auth disabled when unset)"
    )]
    pub password: Option<String>,
    #[arg(
        long,
        env = "FILEDROP_REALM",
        default_value = DEFAULT_REALM,
        help = "Basic auth realm"
    )]
    pub realm: String,
    #[arg(
        short = 'b',
        long = "bind",
        env = "FILEDROP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEDROP_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(long, env = "FILEDROP_TLS", help = "Serve HTTPS instead of HTTP")]
    pub tls: bool,
    #[arg(short = 'c', long, env = "FILEDROP_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "FILEDROP_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "FILEDROP_LOG_FILE",
        default_value = DEFAULT_LOG_FILE,
        help = "File every log line is appended to"
    )]
    pub log_file: String,
    #[arg(
        long,
        env = "FILEDROP_MAX_CONCURRENT_REQUESTS",
        default_value_t = DEFAULT_MAX_CONCURRENT_REQUESTS,
        help = "Max requests processed at once (0 to disable)"
    )]
    pub max_concurrent_requests: usize,
    #[arg(
        long,
        env = "FILEDROP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload body size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
}

/// 启动后不可变的服务配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub serve_dir: PathBuf,
    pub password: Option<String>,
    pub realm: String,
    pub host: IpAddr,
    pub port: u16,
    pub tls: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub log_file: PathBuf,
    pub max_concurrent_requests: usize,
    pub upload_max_size: u64,
}

impl ServerConfig {
    /// 由命令行参数构建配置；空密码视为未启用认证。
    pub fn from_args(args: Args) -> Result<Self, std::io::Error> {
        let host = args
            .host
            .parse::<IpAddr>()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
        Ok(Self {
            serve_dir: PathBuf::from(args.serve_dir),
            password: args.password.filter(|password| !password.is_empty()),
            realm: args.realm,
            host,
            port: args.port,
            tls: args.tls,
            tls_cert: args.tls_cert.map(PathBuf::from),
            tls_key: args.tls_key.map(PathBuf::from),
            log_file: PathBuf::from(args.log_file),
            max_concurrent_requests: args.max_concurrent_requests,
            upload_max_size: args.upload_max_size,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// 测试用的最小配置。
    #[cfg(test)]
    pub fn for_dir(serve_dir: impl Into<PathBuf>) -> Self {
        Self {
            serve_dir: serve_dir.into(),
            password: None,
            realm: DEFAULT_REALM.to_string(),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            tls: false,
            tls_cert: None,
            tls_key: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            upload_max_size: DEFAULT_UPLOAD_MAX_SIZE,
        }
    }
}
