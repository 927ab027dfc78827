use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::Builder;

/// 原子写入报告文件：先写同目录临时文件再改名，目标是符号链接时拒绝写入。
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(anyhow!("[E_REPORT_PATH] 报告路径缺少父目录: {}", path.display())),
    };

    reject_symlink(path)?;

    let mut tmp = Builder::new()
        .prefix(".audio_extract_tmp_")
        .tempfile_in(parent)
        .with_context(|| format!("[E_REPORT_WRITE] 无法在目录中创建临时文件: {}", parent.display()))?;

    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("[E_REPORT_WRITE] 写入临时文件失败: {}", path.display()))?;

    // 写入期间目标可能被替换成链接
    reject_symlink(path)?;

    tmp.persist(path)
        .map_err(|e| anyhow!(e.error))
        .with_context(|| format!("[E_REPORT_WRITE] 原子替换失败: {}", path.display()))?;

    Ok(())
}

pub fn atomic_write_string(path: &Path, content: &str) -> Result<()> {
    atomic_write_bytes(path, content.as_bytes())
}

fn reject_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => Err(anyhow!(
            "[E_REPORT_SYMLINK] 报告路径是符号链接，已拒绝写入: {}",
            path.display()
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_existing_report() {
        let dir = TempDir::new().expect("tempdir");
        let output = dir.path().join("report.csv");
        std::fs::write(&output, "old report").expect("seed");

        atomic_write_string(&output, "new report").expect("write failed");
        assert_eq!(std::fs::read_to_string(&output).expect("read"), "new report");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".audio_extract_tmp_"))
            .collect();
        assert!(leftovers.is_empty(), "临时文件应当被改名而非残留");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_rejects_symlink_target() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().expect("tempdir");
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, "keep me").expect("write victim");
        let link = dir.path().join("audio_extract_report.csv");
        symlink(&victim, &link).expect("symlink");

        let err = atomic_write_string(&link, "report").expect_err("should reject symlink");
        assert!(err.to_string().contains("符号链接"));
        assert_eq!(std::fs::read_to_string(&victim).expect("read"), "keep me");
    }
}
