// ----------------------------------------------------------------
// 模块: extractor/classify.rs
// 描述: 根据左右声道 RMS 电平判断音频类型。纯函数，阈值为固定策略常量。
// ----------------------------------------------------------------

use super::model::{AudioType, UNMEASURED_DB};

/// 低于此电平视为静音
pub const SILENCE_THRESHOLD_DB: f64 = -50.0;
/// 低于此电平视为完全静音
pub const COMPLETE_SILENCE_THRESHOLD_DB: f64 = -80.0;

/// 把一对声道电平映射到音频类型。
///
/// 判断顺序：
/// 1. 两个声道都等于哨兵值 → `Unknown`（检测从未成功）
/// 2. 两个声道都低于完全静音阈值 → `NoAudio`
/// 3. 只有一侧低于静音阈值 → 有声音一侧的伪立体声
/// 4. 两侧都不低于静音阈值 → `TrueStereo`
/// 5. 其他情况（两侧都在 -80 与 -50 之间等）→ `Mono`
pub fn classify(left_db: f64, right_db: f64) -> AudioType {
    if left_db == UNMEASURED_DB && right_db == UNMEASURED_DB {
        return AudioType::Unknown;
    }

    if left_db < COMPLETE_SILENCE_THRESHOLD_DB && right_db < COMPLETE_SILENCE_THRESHOLD_DB {
        return AudioType::NoAudio;
    }

    let left_silent = left_db < SILENCE_THRESHOLD_DB;
    let right_silent = right_db < SILENCE_THRESHOLD_DB;
    match (left_silent, right_silent) {
        (true, false) => AudioType::PseudoStereoRight,
        (false, true) => AudioType::PseudoStereoLeft,
        (false, false) => AudioType::TrueStereo,
        (true, true) => AudioType::Mono,
    }
}

/// 两个声道都低于静音阈值时，需要提示用户检查视频是否有声音。
pub fn is_too_quiet(left_db: f64, right_db: f64) -> bool {
    left_db < SILENCE_THRESHOLD_DB && right_db < SILENCE_THRESHOLD_DB
}
