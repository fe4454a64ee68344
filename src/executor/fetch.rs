//! HTTP downloads for `fetch` actions.

use crate::engine::ActionContext;
use crate::error::{ConvergeError, Result};
use reqwest::blocking::Client;
use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

/// Request timeout used when the step has no deadline of its own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads files over HTTP/HTTPS.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("converge")
            .build()
            .map_err(|e| ConvergeError::FetchFailed {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, timeout })
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Download `url` to `dest`.
    ///
    /// The body is streamed into a sibling `.part` file which is renamed
    /// over `dest` once complete, so an interrupted download never leaves a
    /// truncated destination behind. The context is checked between chunks.
    pub fn download(&self, url: &str, dest: &Path, ctx: &ActionContext) -> Result<()> {
        ctx.check()?;
        let failed = |message: String| ConvergeError::FetchFailed {
            url: url.to_string(),
            message,
        };

        let timeout = ctx
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));

        debug!("Fetching {} -> {}", url, dest.display());
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(dest);
        let written = match copy_body(&mut response, &partial, ctx) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(match e {
                    ConvergeError::Io(io) => failed(io.to_string()),
                    other => other,
                });
            }
        };

        fs::rename(&partial, dest)?;
        debug!("Fetched {} ({} bytes)", url, written);
        Ok(())
    }
}

fn copy_body(body: &mut impl Read, path: &Path, ctx: &ActionContext) -> Result<u64> {
    let mut file = fs::File::create(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        ctx.check()?;
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        written += n as u64;
    }

    file.flush()?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    dest.with_file_name(name)
}
