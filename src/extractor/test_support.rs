//! 端到端测试用的伪 `ffmpeg` / `ffprobe`。
//!
//! 每个测试进程只写一次两个通用的 POSIX shell 脚本。每个 `FakeToolkit`
//! 拥有独立目录，其中是指向脚本的符号链接和脚本会读取的 `media.conf`，
//! 测试各自描述媒体参数而无需重写可执行文件。

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

use super::ffmpeg::ToolPaths;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
. "$(dirname "$0")/media.conf"
echo "ffmpeg $*" >> "$LOG"
case "$*" in
*astats*)
  if [ -n "$LEFT_DB" ]; then
    echo "[Parsed_astats_0 @ 0x5600] Channel: 1" >&2
    echo "[Parsed_astats_0 @ 0x5600] RMS level dB: $LEFT_DB" >&2
  fi
  if [ -n "$RIGHT_DB" ]; then
    echo "[Parsed_astats_0 @ 0x5600] Channel: 2" >&2
    echo "[Parsed_astats_0 @ 0x5600] RMS level dB: $RIGHT_DB" >&2
  fi
  echo "[Parsed_astats_0 @ 0x5600] Overall" >&2
  echo "[Parsed_astats_0 @ 0x5600] RMS level dB: -20.0" >&2
  exit 0
  ;;
esac
for last in "$@"; do :; done
if [ "$DELAY" -gt 0 ]; then sleep "$DELAY"; fi
case "$last" in
*.mp3)
  if [ "$FAIL_MP3" = 1 ]; then echo "mp3 encoder failed" >&2; exit 1; fi
  BYTES=$MP3_BYTES
  ;;
*)
  if [ "$FAIL_TRANSCODE" = 1 ]; then echo "transcode failed" >&2; exit 1; fi
  BYTES=$OUTPUT_BYTES
  ;;
esac
dd if=/dev/zero of="$last" bs="$BYTES" count=1 2>/dev/null
echo "out_time_ms=$HALF_US"
echo "progress=continue"
echo "progress=end"
exit 0
"#;

const FAKE_FFPROBE: &str = r#"#!/bin/sh
. "$(dirname "$0")/media.conf"
echo "ffprobe $*" >> "$LOG"
if [ "$PROBE_FAIL" = 1 ]; then exit 1; fi
case "$*" in
*broken*) exit 1 ;;
esac
echo "{\"streams\": [{\"codec_name\": \"$CODEC\", \"channels\": $CHANNELS, \"sample_rate\": \"48000\", \"duration\": \"$DURATION\"}], \"format\": {\"duration\": \"$DURATION\"}}"
"#;

/// 伪工具对每个文件报告的参数（路径中含 `broken` 的文件总是探测失败）。
#[derive(Debug, Clone)]
pub struct FakeMedia {
    pub codec: String,
    pub channels: u32,
    pub duration: f64,
    pub left_db: Option<f64>,
    pub right_db: Option<f64>,
    pub output_bytes: u64,
    pub mp3_bytes: u64,
    pub probe_fails: bool,
    pub fail_transcode: bool,
    pub fail_mp3: bool,
    /// 每次转码写出文件前休眠的整秒数。
    pub delay_secs: u32,
}

impl FakeMedia {
    pub fn stereo_aac(duration: f64, left_db: f64, right_db: f64) -> Self {
        Self {
            codec: "aac".to_string(),
            channels: 2,
            duration,
            left_db: Some(left_db),
            right_db: Some(right_db),
            output_bytes: 64,
            mp3_bytes: 32,
            probe_fails: false,
            fail_transcode: false,
            fail_mp3: false,
            delay_secs: 0,
        }
    }
}

pub struct FakeToolkit {
    dir: TempDir,
    pub tools: ToolPaths,
}

impl FakeToolkit {
    pub fn new(media: &FakeMedia) -> Self {
        let scripts = shared_scripts();
        let dir = TempDir::new().expect("toolkit tempdir");
        let ffmpeg = dir.path().join("ffmpeg");
        let ffprobe = dir.path().join("ffprobe");
        symlink(scripts.join("ffmpeg.sh"), &ffmpeg).expect("link ffmpeg");
        symlink(scripts.join("ffprobe.sh"), &ffprobe).expect("link ffprobe");

        let flag = |b: bool| if b { 1 } else { 0 };
        let conf = format!(
            "LOG='{log}'\nCODEC='{codec}'\nCHANNELS={channels}\nDURATION={duration}\n\
             LEFT_DB='{left}'\nRIGHT_DB='{right}'\nOUTPUT_BYTES={output}\nMP3_BYTES={mp3}\n\
             PROBE_FAIL={probe_fail}\nFAIL_TRANSCODE={fail_transcode}\nFAIL_MP3={fail_mp3}\n\
             DELAY={delay}\nHALF_US={half}\n",
            log = dir.path().join("invocations.log").display(),
            codec = media.codec,
            channels = media.channels,
            duration = media.duration,
            left = media.left_db.map(|v| v.to_string()).unwrap_or_default(),
            right = media.right_db.map(|v| v.to_string()).unwrap_or_default(),
            output = media.output_bytes.max(1),
            mp3 = media.mp3_bytes.max(1),
            probe_fail = flag(media.probe_fails),
            fail_transcode = flag(media.fail_transcode),
            fail_mp3 = flag(media.fail_mp3),
            delay = media.delay_secs,
            half = (media.duration * 500_000.0) as u64,
        );
        fs::write(dir.path().join("media.conf"), conf).expect("write media.conf");

        Self {
            tools: ToolPaths { ffmpeg, ffprobe },
            dir,
        }
    }

    /// 伪工具收到的全部命令行，按调用顺序。
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("invocations.log"))
            .map(|log| log.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// 转码与压缩的次数（不含探测和音量统计）。
    pub fn transcode_count(&self) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.starts_with("ffmpeg") && line.contains("-progress"))
            .count()
    }
}

fn shared_scripts() -> &'static Path {
    static SCRIPTS: OnceLock<PathBuf> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!(
            "audio-extract-fake-tools-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create fake tool dir");
        for (name, body) in [("ffmpeg.sh", FAKE_FFMPEG), ("ffprobe.sh", FAKE_FFPROBE)] {
            let path = dir.join(name);
            fs::write(&path, body).expect("write fake tool");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .expect("chmod fake tool");
        }
        dir
    })
}
