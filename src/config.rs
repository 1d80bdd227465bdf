use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Origins allowed when `CORS_ORIGINS` is unset or empty.
pub const DEFAULT_CORS_ORIGINS: [&str; 5] = [
    "http://localhost:9001",
    "http://127.0.0.1:9001",
    "http://localhost:3000",
    "http://localhost:5500",
    "http://localhost:8000",
];

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(short, long, env = "MODEL_PATH", default_value = "models/u2net.onnx")]
    pub model_path: PathBuf,

    #[arg(short, long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 16)]
    pub max_upload_mb: u64,

    #[arg(long, env = "MAX_DIMENSION", default_value_t = 2000)]
    pub max_dimension: u32,

    /// Comma-separated list of allowed origins
    #[arg(long, env = "CORS_ORIGINS")]
    pub cors_origins: Option<String>,

    /// CUDA device to run the model on; CPU only when unset
    #[arg(short, long, env = "DEVICE_ID")]
    pub device_id: Option<i32>,

    #[arg(
        short, long, env = "NUM_THREADS",
        default_value_t = std::thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,
}

impl Config {
    pub fn limits(&self) -> Limits {
        Limits::new(self.max_upload_mb, self.max_dimension)
    }

    /// Parsed allow-list, falling back to the local development origins.
    pub fn cors_origins(&self) -> Vec<String> {
        let origins: Vec<String> = self
            .cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        if origins.is_empty() {
            DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()
        } else {
            origins
        }
    }
}

/// Per-request limits shared with every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_upload_mb: u64,
    pub max_dimension: u32,
}

impl Limits {
    pub const fn new(max_upload_mb: u64, max_dimension: u32) -> Self {
        Self {
            max_upload_mb,
            max_dimension,
        }
    }

    pub const fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Transport-level body limit: the upload limit plus room for multipart framing,
    /// so the upload reader reports an oversized file before the transport does.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes().saturating_add(BYTES_PER_MB)).unwrap_or(usize::MAX)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(16, 2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::parse_from(std::iter::once("rembg-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--max-upload-mb",
            "4",
            "--max-dimension",
            "512",
            "--bind",
            "0.0.0.0:9000",
        ]);

        assert_eq!(config.limits(), Limits::new(4, 512));
        assert_eq!(config.limits().max_upload_bytes(), 4 * 1024 * 1024);
        assert_eq!(config.bind, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_cors_origins_are_trimmed() {
        let config = parse(&[
            "--cors-origins",
            " https://a.example , ,https://b.example,",
        ]);

        assert_eq!(
            config.cors_origins(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_cors_origins_fall_back_when_blank() {
        let config = parse(&["--cors-origins", " , "]);
        assert_eq!(config.cors_origins(), DEFAULT_CORS_ORIGINS);
    }

    #[test]
    fn test_body_limit_leaves_room_for_framing() {
        let limits = Limits::new(1, 2000);
        assert_eq!(limits.body_limit(), 2 * 1024 * 1024);
    }
}
