//! Audio from the outside world: yt-dlp downloads and ffmpeg transcodes.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bot::extract::first_match;
use crate::error::BotError;

/// yt-dlp's report lines naming the output file, most specific first.
static YTDLP_OUTPUT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"Correcting container of "(.*)""#,
        r"\[download\] Destination: (.*)",
        r"\[download\] (.*) has already been downloaded",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid yt-dlp pattern"))
    .collect()
});

#[async_trait]
pub trait AudioDownloader: Send + Sync {
    /// Download the audio track of `url`. `None` when the tool succeeded but
    /// reported no output file.
    async fn download_audio(&self, url: &str) -> Result<Option<PathBuf>, BotError>;
}

#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path, format: &str) -> Result<(), BotError>;
}

/// Find the downloaded file name in yt-dlp's stdout.
pub fn downloaded_file(stdout: &str) -> Option<String> {
    first_match(stdout, YTDLP_OUTPUT_PATTERNS.as_slice())
}

pub struct YtDlp {
    binary: String,
    cookies: Option<PathBuf>,
    work_dir: PathBuf,
}

impl YtDlp {
    pub fn new(binary: String, cookies: Option<PathBuf>, work_dir: PathBuf) -> Self {
        Self {
            binary,
            cookies,
            work_dir,
        }
    }
}

#[async_trait]
impl AudioDownloader for YtDlp {
    async fn download_audio(&self, url: &str) -> Result<Option<PathBuf>, BotError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let mut cmd = Command::new(&self.binary);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        // Format 140: m4a audio only.
        cmd.args(["-f", "140", url]).current_dir(&self.work_dir);

        info!("📺 yt-dlp {}", url);
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(BotError::subprocess(&self.binary, &output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let file = downloaded_file(&stdout).map(|name| self.work_dir.join(name));
        debug!("yt-dlp output file: {:?}", file);
        Ok(file)
    }
}

pub struct Ffmpeg {
    binary: String,
}

impl Ffmpeg {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl AudioTranscoder for Ffmpeg {
    async fn transcode(&self, input: &Path, output: &Path, format: &str) -> Result<(), BotError> {
        debug!("ffmpeg {:?} -> {:?} ({})", input, output, format);
        let result = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-f", format])
            .arg(output)
            .output()
            .await?;
        if !result.status.success() {
            return Err(BotError::subprocess(&self.binary, &result));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downloaded_file_fresh_download() {
        let stdout = "[youtube] abc: Downloading webpage\n\
                      [download] Destination: Talk [abc].m4a\n\
                      [download] 100% of 3.00MiB\n";
        assert_eq!(downloaded_file(stdout).as_deref(), Some("Talk [abc].m4a"));
    }

    #[test]
    fn test_downloaded_file_already_downloaded() {
        let stdout = "[download] Talk [abc].m4a has already been downloaded\n";
        assert_eq!(downloaded_file(stdout).as_deref(), Some("Talk [abc].m4a"));
    }

    #[test]
    fn test_downloaded_file_container_fix() {
        let stdout = "[FixupM4a] Correcting container of \"Talk [abc].m4a\"\n";
        assert_eq!(downloaded_file(stdout).as_deref(), Some("Talk [abc].m4a"));
    }

    #[test]
    fn test_downloaded_file_none() {
        assert_eq!(downloaded_file("[youtube] abc: Downloading webpage\n"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let ffmpeg = Ffmpeg::new("/nonexistent/ffmpeg".to_string());
        let err = ffmpeg
            .transcode(Path::new("in.ogg"), Path::new("out.mp3"), "mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Io(_)));
    }
}
