use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// xlsx files are zip archives
const ZIP_SIGNATURE: &[u8; 2] = b"PK";

/// Checks a completed download must pass before it counts as delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentChecks {
    pub min_size_bytes: u64,
    pub require_zip_signature: bool,
}

impl Default for ContentChecks {
    fn default() -> Self {
        Self {
            min_size_bytes: 1,
            require_zip_signature: false,
        }
    }
}

impl ContentChecks {
    /// Whether the file at `path`, already known to be `size_bytes` long, is acceptable
    pub async fn accepts(&self, path: &Path, size_bytes: u64) -> bool {
        if size_bytes == 0 || size_bytes < self.min_size_bytes {
            warn!(
                file = %path.display(),
                size_bytes,
                min = self.min_size_bytes,
                "Downloaded file is smaller than expected"
            );
            return false;
        }

        if self.require_zip_signature {
            let mut header = [0u8; 2];
            let read = match fs::File::open(path).await {
                Ok(mut file) => file.read_exact(&mut header).await,
                Err(e) => Err(e),
            };
            if read.is_err() || &header != ZIP_SIGNATURE {
                warn!(file = %path.display(), "Downloaded file is not a valid spreadsheet archive");
                return false;
            }
        }

        true
    }
}
