// Raw datagram journal - Appends hex dumps to a per-day text file
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// `HH:MM:SS <lowercase hex>`
pub fn format_hex_line(received_at: NaiveDateTime, raw: &[u8]) -> String {
    let mut line = String::with_capacity(9 + raw.len() * 2);
    let _ = write!(line, "{} ", received_at.format("%H:%M:%S"));
    for byte in raw {
        let _ = write!(line, "{:02x}", byte);
    }
    line
}

#[derive(Debug, Clone)]
pub struct RawFrameLog {
    dir: PathBuf,
}

impl RawFrameLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one datagram to `<dir>/YYYY-MM-DD.txt` for its receive date.
    pub async fn append(&self, received_at: NaiveDateTime, raw: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("{}.txt", received_at.format("%Y-%m-%d")));

        let mut line = format_hex_line(received_at, raw);
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
