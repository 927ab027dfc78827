// ----------------------------------------------------------------
// 模块: extractor/decision.rs
// 描述: 根据音频流信息与音量分析结果制定处理决策
//      （直接复制 / 合并声道 / 标准转码）以及输出编码器。
// ----------------------------------------------------------------

use super::model::{AudioStreamInfo, AudioType, DecisionReason, ProcessingDecision, VolumeAnalysis};

/// 可作为独立音频文件直接输出的编码器；其他编码器一律回退到 aac。
const PASSTHROUGH_CODECS: [&str; 3] = ["aac", "mp3", "ac3"];

/// 支持的音频容器扩展名（注意不包含 ac3）。
pub const AUDIO_EXTENSIONS: [&str; 9] = [
    "mp3", "wav", "m4a", "wma", "aac", "ogg", "amr", "flac", "aiff",
];

const FALLBACK_CODEC: &str = "aac";

/// 规则求值时可见的全部事实。
#[derive(Debug)]
struct DecisionFacts<'a> {
    stream: &'a AudioStreamInfo,
    audio_type: AudioType,
    format_supported: bool,
    needs_channel_fix: bool,
    is_pcm: bool,
    can_copy_directly: bool,
}

/// 一条原因规则：条件成立时产生对应原因。
struct ReasonRule {
    applies: fn(&DecisionFacts) -> bool,
    reason: fn(&DecisionFacts) -> DecisionReason,
}

/// 按优先级排列，第一条命中的规则决定处理原因。
const REASON_RULES: [ReasonRule; 7] = [
    ReasonRule {
        applies: |f| f.audio_type == AudioType::NoAudio,
        reason: |_| DecisionReason::NoAudio,
    },
    ReasonRule {
        applies: |f| f.audio_type == AudioType::Unknown,
        reason: |_| DecisionReason::DetectionFailed,
    },
    ReasonRule {
        applies: |f| f.needs_channel_fix,
        reason: |f| DecisionReason::ChannelFix(f.audio_type),
    },
    ReasonRule {
        applies: |f| !f.format_supported,
        reason: |f| DecisionReason::UnsupportedFormat(f.stream.codec.clone()),
    },
    ReasonRule {
        applies: |f| f.is_pcm,
        reason: |_| DecisionReason::PcmNeedsTranscode,
    },
    ReasonRule {
        applies: |f| f.can_copy_directly,
        reason: |_| DecisionReason::DirectCopy,
    },
    ReasonRule {
        applies: |_| true,
        reason: |_| DecisionReason::StandardTranscode,
    },
];

/// 源编码器对应的输出编码器：直通编码器保留原名，其余回退到 aac。
fn normalized_codec(codec: &str) -> &str {
    if PASSTHROUGH_CODECS.contains(&codec) {
        codec
    } else {
        FALLBACK_CODEC
    }
}

/// 制定处理决策。
pub fn make_decision(stream: &AudioStreamInfo, volume: &VolumeAnalysis) -> ProcessingDecision {
    let codec = stream.codec.as_str();
    let normalized = normalized_codec(codec);
    let format_supported = AUDIO_EXTENSIONS.contains(&normalized);
    let needs_channel_fix = volume.audio_type.is_pseudo_stereo();
    let is_pcm = codec.starts_with("pcm_");

    let can_copy_directly = volume.audio_type == AudioType::TrueStereo
        && stream.channels >= 2
        && format_supported
        && PASSTHROUGH_CODECS.contains(&codec)
        && !is_pcm;

    let target_codec = if can_copy_directly {
        codec
    } else if format_supported && !needs_channel_fix {
        normalized
    } else {
        FALLBACK_CODEC
    };

    let facts = DecisionFacts {
        stream,
        audio_type: volume.audio_type,
        format_supported,
        needs_channel_fix,
        is_pcm,
        can_copy_directly,
    };
    let reason = REASON_RULES
        .iter()
        .find(|rule| (rule.applies)(&facts))
        .map(|rule| (rule.reason)(&facts))
        .unwrap_or(DecisionReason::StandardTranscode);

    ProcessingDecision {
        can_copy_directly,
        needs_channel_fix,
        target_codec: target_codec.to_owned(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::model::DetectionPosition;

    fn stream(codec: &str, channels: u32) -> AudioStreamInfo {
        AudioStreamInfo {
            codec: codec.to_string(),
            channels,
            sample_rate: 48_000,
            duration: 120.0,
            stream_index: 0,
        }
    }

    fn volume(audio_type: AudioType) -> VolumeAnalysis {
        VolumeAnalysis {
            left_db: -20.0,
            right_db: -20.0,
            audio_type,
            position: DetectionPosition::Middle,
        }
    }

    #[test]
    fn test_true_stereo_aac_is_copied() {
        let decision = make_decision(&stream("aac", 2), &volume(AudioType::TrueStereo));
        assert!(decision.can_copy_directly);
        assert!(!decision.needs_channel_fix);
        assert_eq!(decision.target_codec, "aac");
        assert_eq!(decision.reason, DecisionReason::DirectCopy);
        assert_eq!(decision.reason_text(), "直接复制音频流");
    }

    #[test]
    fn test_pcm_is_never_copied() {
        let decision = make_decision(&stream("pcm_s16le", 2), &volume(AudioType::TrueStereo));
        assert!(!decision.can_copy_directly);
        assert_eq!(decision.target_codec, "aac");
        assert_eq!(decision.reason, DecisionReason::PcmNeedsTranscode);
    }

    #[test]
    fn test_pseudo_stereo_needs_channel_fix() {
        let decision = make_decision(&stream("mp3", 2), &volume(AudioType::PseudoStereoRight));
        assert!(decision.needs_channel_fix);
        assert!(!decision.can_copy_directly);
        assert_eq!(decision.target_codec, "aac");
        assert_eq!(
            decision.reason_text(),
            "伪立体声合并声道(pseudo_stereo_right)"
        );
    }

    #[test]
    fn test_ac3_is_unsupported_format() {
        let decision = make_decision(&stream("ac3", 6), &volume(AudioType::TrueStereo));
        assert!(!decision.can_copy_directly);
        assert_eq!(decision.target_codec, "aac");
        assert_eq!(
            decision.reason,
            DecisionReason::UnsupportedFormat("ac3".to_string())
        );
    }

    #[test]
    fn test_other_codec_falls_back_to_aac_transcode() {
        let decision = make_decision(&stream("opus", 2), &volume(AudioType::TrueStereo));
        assert!(!decision.can_copy_directly);
        assert_eq!(decision.target_codec, "aac");
        assert_eq!(decision.reason, DecisionReason::StandardTranscode);
    }

    #[test]
    fn test_mono_channel_layout_is_transcoded_in_place() {
        let decision = make_decision(&stream("mp3", 1), &volume(AudioType::TrueStereo));
        assert!(!decision.can_copy_directly);
        assert_eq!(decision.target_codec, "mp3");
        assert_eq!(decision.reason, DecisionReason::StandardTranscode);
    }

    #[test]
    fn test_reason_priority_no_audio_first() {
        let decision = make_decision(&stream("ac3", 2), &volume(AudioType::NoAudio));
        assert_eq!(decision.reason, DecisionReason::NoAudio);

        let decision = make_decision(&stream("pcm_s24le", 2), &volume(AudioType::Unknown));
        assert_eq!(decision.reason, DecisionReason::DetectionFailed);
        assert_eq!(decision.target_codec, "aac");
    }

    #[test]
    fn test_channel_fix_outranks_unsupported_format() {
        let decision = make_decision(&stream("ac3", 2), &volume(AudioType::PseudoStereoLeft));
        assert_eq!(
            decision.reason,
            DecisionReason::ChannelFix(AudioType::PseudoStereoLeft)
        );
    }
}
