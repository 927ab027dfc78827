// ----------------------------------------------------------------
// 项目: 视频音频提取器 (AudioExtract-rs)
// 模块: extractor/model.rs
// 描述: 此模块定义了提取流程中各阶段之间传递的核心数据结构。
//      所有结构体一旦创建便不再修改，处理结果可序列化为 JSON/CSV。
// ----------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;

/// 未测量声道的哨兵电平 (dB)。
///
/// 检测失败时左右声道都保持此值，分类器据此判定为 `Unknown`。
/// 注意：真实测得的 -60.0 dB 与哨兵值无法区分。
pub const UNMEASURED_DB: f64 = -60.0;

/// `AudioStreamInfo` 是单个音频流的只读快照，由探测器为每个输入文件生成一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    /// 编码器名称，例如 `aac`、`pcm_s16le`。工具未报告时为 `unknown`。
    pub codec: String,
    /// 声道数，未知时为 0。
    pub channels: u32,
    /// 采样率 (Hz)，未知时为 0。
    pub sample_rate: u32,
    /// 时长（秒）。流本身没有时长时回退到容器时长。
    pub duration: f64,
    /// 音频流序号，目前始终为第一个音频流。
    pub stream_index: usize,
}

impl Default for AudioStreamInfo {
    fn default() -> Self {
        Self {
            codec: "unknown".to_string(),
            channels: 0,
            sample_rate: 0,
            duration: 0.0,
            stream_index: 0,
        }
    }
}

/// 音频类型分类结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioType {
    /// 检测失败，左右声道均为哨兵值
    Unknown,
    /// 两个声道都完全静音
    NoAudio,
    /// 只有左声道有声音
    PseudoStereoLeft,
    /// 只有右声道有声音
    PseudoStereoRight,
    /// 正常立体声
    TrueStereo,
    /// 单声道或其他情况
    Mono,
}

impl AudioType {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioType::Unknown => "unknown",
            AudioType::NoAudio => "no_audio",
            AudioType::PseudoStereoLeft => "pseudo_stereo_left",
            AudioType::PseudoStereoRight => "pseudo_stereo_right",
            AudioType::TrueStereo => "true_stereo",
            AudioType::Mono => "mono",
        }
    }

    pub fn is_pseudo_stereo(self) -> bool {
        matches!(
            self,
            AudioType::PseudoStereoLeft | AudioType::PseudoStereoRight
        )
    }
}

impl fmt::Display for AudioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检测窗口在时间轴上的位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPosition {
    Start,
    Middle,
    Failed,
}

impl DetectionPosition {
    /// 面向用户的位置描述。
    pub fn label(self) -> &'static str {
        match self {
            DetectionPosition::Start => "开头",
            DetectionPosition::Middle => "中间",
            DetectionPosition::Failed => "检测失败",
        }
    }
}

impl fmt::Display for DetectionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 单次检测的音量分析结果。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    /// 左声道 RMS 电平 (dB)
    pub left_db: f64,
    /// 右声道 RMS 电平 (dB)
    pub right_db: f64,
    pub audio_type: AudioType,
    pub position: DetectionPosition,
}

impl VolumeAnalysis {
    /// 检测整体失败时使用的结果。
    pub fn failed() -> Self {
        Self {
            left_db: UNMEASURED_DB,
            right_db: UNMEASURED_DB,
            audio_type: AudioType::Unknown,
            position: DetectionPosition::Failed,
        }
    }
}

/// 处理原因。每个文件只记录第一条命中的原因。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    NoAudio,
    DetectionFailed,
    ChannelFix(AudioType),
    UnsupportedFormat(String),
    PcmNeedsTranscode,
    DirectCopy,
    StandardTranscode,
    SkippedExisting,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::NoAudio => write!(f, "视频无音频"),
            DecisionReason::DetectionFailed => write!(f, "音频检测失败"),
            DecisionReason::ChannelFix(audio_type) => write!(f, "伪立体声合并声道({audio_type})"),
            DecisionReason::UnsupportedFormat(codec) => write!(f, "格式不支持({codec})"),
            DecisionReason::PcmNeedsTranscode => write!(f, "PCM需要转码"),
            DecisionReason::DirectCopy => write!(f, "直接复制音频流"),
            DecisionReason::StandardTranscode => write!(f, "标准转码"),
            DecisionReason::SkippedExisting => write!(f, "跳过已存在文件"),
        }
    }
}

/// 由流信息和音量分析推导出的处理策略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDecision {
    pub can_copy_directly: bool,
    pub needs_channel_fix: bool,
    /// 目标编码器名称，同时决定输出扩展名。
    pub target_codec: String,
    pub reason: DecisionReason,
}

impl ProcessingDecision {
    /// 人类可读的处理原因。
    pub fn reason_text(&self) -> String {
        self.reason.to_string()
    }
}

/// 每个输入文件对应且仅对应一条的最终处理记录。
///
/// 字段名通过 `#[serde(rename = "...")]` 与 JSON 报告格式对应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub success: bool,

    #[serde(rename = "inputFile")]
    pub input_file: String,

    /// 输出文件路径；在无法确定输出位置的失败场景下为空字符串。
    #[serde(rename = "outputFile")]
    pub output_file: String,

    /// 错误信息，成功时为空。
    #[serde(rename = "errorMsg")]
    pub error_msg: String,

    /// 处理耗时（秒）。
    #[serde(rename = "processingTime")]
    pub processing_time: f64,

    #[serde(rename = "audioType")]
    pub audio_type: AudioType,

    #[serde(rename = "leftVolume")]
    pub left_volume: f64,

    #[serde(rename = "rightVolume")]
    pub right_volume: f64,

    #[serde(rename = "wasCopiedDirectly")]
    pub was_copied_directly: bool,

    #[serde(rename = "processingDecision")]
    pub processing_decision: String,
}

impl ProcessResult {
    /// 尚未完成音量检测就失败的记录。
    pub fn early_failure(input_file: &str, error_msg: impl Into<String>, elapsed: f64) -> Self {
        Self {
            success: false,
            input_file: input_file.to_owned(),
            output_file: String::new(),
            error_msg: error_msg.into(),
            processing_time: elapsed,
            audio_type: AudioType::Unknown,
            left_volume: UNMEASURED_DB,
            right_volume: UNMEASURED_DB,
            was_copied_directly: false,
            processing_decision: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_type_serializes_snake_case() {
        let json = serde_json::to_string(&AudioType::PseudoStereoRight).unwrap();
        assert_eq!(json, "\"pseudo_stereo_right\"");
        assert_eq!(AudioType::NoAudio.to_string(), "no_audio");
    }

    #[test]
    fn test_reason_text() {
        let decision = ProcessingDecision {
            can_copy_directly: false,
            needs_channel_fix: true,
            target_codec: "aac".to_string(),
            reason: DecisionReason::ChannelFix(AudioType::PseudoStereoLeft),
        };
        assert_eq!(decision.reason_text(), "伪立体声合并声道(pseudo_stereo_left)");
    }

    #[test]
    fn test_early_failure_uses_sentinel() {
        let result = ProcessResult::early_failure("a.mp4", "无法获取音频流信息", 0.5);
        assert!(!result.success);
        assert_eq!(result.left_volume, UNMEASURED_DB);
        assert_eq!(result.audio_type, AudioType::Unknown);
        assert!(result.output_file.is_empty());
    }
}
