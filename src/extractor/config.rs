//! 批处理配置
//!
//! 先从可选的 TOML 文件加载，再由命令行参数覆盖。

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 超过此大小的输出文件会被再压缩为 MP3
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_THREADS: usize = 4;
pub const MAX_THREADS: usize = 32;

/// 提取出的音频存放位置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutputTarget {
    /// 与源视频放在同一文件夹
    SameFolder,
    /// 放到单独的根目录下，可选择保留输入的子目录结构
    Directory {
        root: PathBuf,
        #[serde(default = "default_true")]
        keep_structure: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub input_dir: PathBuf,
    pub output: OutputTarget,
    pub skip_existing: bool,
    pub max_threads: usize,
    pub max_output_bytes: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub pause_poll_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output: OutputTarget::SameFolder,
            skip_existing: true,
            max_threads: DEFAULT_THREADS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            ffmpeg_path: None,
            ffprobe_path: None,
            command_timeout_secs: 60,
            pause_poll_ms: 100,
        }
    }
}

fn default_true() -> bool {
    true
}

impl ExtractorConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output: OutputTarget) -> Self {
        Self {
            input_dir: input_dir.into(),
            output,
            ..Self::default()
        }
    }

    /// 加载配置文件，缺失的键使用默认值。
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 实际使用的工作线程数，限制在 `1..=MAX_THREADS`。
    pub fn thread_count(&self) -> usize {
        self.max_threads.clamp(1, MAX_THREADS)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(10))
    }

    /// 批处理报告的输出目录。
    pub fn report_dir(&self) -> &Path {
        match &self.output {
            OutputTarget::SameFolder => &self.input_dir,
            OutputTarget::Directory { root, .. } => root,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(anyhow!(
                "输入路径 \"{}\" 不是一个有效的文件夹或不存在",
                self.input_dir.display()
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(anyhow!("max_output_bytes 必须大于 0"));
        }
        Ok(())
    }

    /// 根据目标编码器计算 `video` 的输出路径。
    ///
    /// 没有常见音频容器的编码器回退到 `.aac`。
    pub fn output_path(&self, video: &Path, target_codec: &str) -> PathBuf {
        let ext = output_extension(target_codec);
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = format!("{stem}.{ext}");

        match &self.output {
            OutputTarget::SameFolder => video
                .parent()
                .map(|p| p.join(&file_name))
                .unwrap_or_else(|| PathBuf::from(&file_name)),
            OutputTarget::Directory {
                root,
                keep_structure: true,
            } => {
                let relative_parent = video
                    .strip_prefix(&self.input_dir)
                    .ok()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                root.join(relative_parent).join(file_name)
            }
            OutputTarget::Directory {
                root,
                keep_structure: false,
            } => root.join(file_name),
        }
    }
}

pub fn output_extension(target_codec: &str) -> &'static str {
    match target_codec {
        "aac" => "aac",
        "mp3" => "mp3",
        "ac3" => "ac3",
        "flac" => "flac",
        "ogg" => "ogg",
        "wav" => "wav",
        _ => "aac",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn directory_config(keep_structure: bool) -> ExtractorConfig {
        ExtractorConfig::new(
            "/videos",
            OutputTarget::Directory {
                root: PathBuf::from("/out"),
                keep_structure,
            },
        )
    }

    #[test]
    fn test_output_path_keeps_structure() {
        let config = directory_config(true);
        let path = config.output_path(Path::new("/videos/season1/ep01.mkv"), "aac");
        assert_eq!(path, PathBuf::from("/out/season1/ep01.aac"));
    }

    #[test]
    fn test_output_path_flattened() {
        let config = directory_config(false);
        let path = config.output_path(Path::new("/videos/season1/ep01.mkv"), "mp3");
        assert_eq!(path, PathBuf::from("/out/ep01.mp3"));
    }

    #[test]
    fn test_output_path_same_folder_unknown_codec_falls_back() {
        let config = ExtractorConfig::new("/videos", OutputTarget::SameFolder);
        let path = config.output_path(Path::new("/videos/a/clip.mp4"), "opus");
        assert_eq!(path, PathBuf::from("/videos/a/clip.aac"));
    }

    #[test]
    fn test_thread_count_is_clamped() {
        let mut config = ExtractorConfig::default();
        config.max_threads = 0;
        assert_eq!(config.thread_count(), 1);
        config.max_threads = 100;
        assert_eq!(config.thread_count(), MAX_THREADS);
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("extract.toml");
        std::fs::write(
            &path,
            r#"
input_dir = "/videos"
max_threads = 8

[output]
mode = "directory"
root = "/out"
"#,
        )
        .expect("write config");

        let config = ExtractorConfig::from_file(&path).expect("parse config");
        assert_eq!(config.max_threads, 8);
        assert!(config.skip_existing);
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(
            config.output,
            OutputTarget::Directory {
                root: PathBuf::from("/out"),
                keep_structure: true
            }
        );
    }
}
