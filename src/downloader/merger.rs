use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::error::MergeError;
use crate::config::default_ffmpeg_path;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// 把视频流和音频流封装成一个文件的外部工具
#[async_trait]
pub trait MergeTool: Send + Sync {
    async fn merge(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<(), MergeError>;

    /// 创建任务前检查工具是否可用
    async fn check_available(&self) -> Result<(), MergeError> {
        Ok(())
    }
}

/// 调用 ffmpeg 做无损封装（-c copy）
#[derive(Debug, Clone)]
pub struct MediaMerger {
    program: PathBuf,
}

impl Default for MediaMerger {
    fn default() -> Self {
        Self::new(default_ffmpeg_path())
    }
}

impl MediaMerger {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// 参数以列表传递，不经过 shell
    pub fn merge_args(video_path: &Path, audio_path: &Path, output_path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(video_path.as_os_str().to_owned());
        args.push("-i".into());
        args.push(audio_path.as_os_str().to_owned());
        args.push("-c".into());
        args.push("copy".into());
        args.push(output_path.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl MergeTool for MediaMerger {
    async fn merge(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<(), MergeError> {
        for input in [video_path, audio_path] {
            if tokio::fs::metadata(input).await.is_err() {
                return Err(MergeError::MissingInput(input.to_path_buf()));
            }
        }

        debug!("开始合并: {:?} + {:?} -> {:?}", video_path, audio_path, output_path);

        let child = Command::new(&self.program)
            .args(Self::merge_args(video_path, audio_path, output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // 超时后 child 随 future 一起被丢弃，kill_on_drop 负责结束进程
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                error!("❌ 合并超时（{:?}），已终止合并进程", timeout);
                return Err(MergeError::Timeout(timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!("❌ 合并失败（{}）: {}", output.status, stderr.trim_end());
            return Err(MergeError::Tool {
                status: output.status.to_string(),
                stderr,
            });
        }

        info!("✅ 音视频合并完成: {:?}", output_path);
        Ok(())
    }

    async fn check_available(&self) -> Result<(), MergeError> {
        let probe = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(MergeError::Unavailable(format!(
                "{:?} -version 退出状态 {}",
                self.program, status
            ))),
            Ok(Err(e)) => Err(MergeError::Unavailable(format!("{:?}: {}", self.program, e))),
            Err(_) => Err(MergeError::Unavailable(format!(
                "{:?} -version 无响应",
                self.program
            ))),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn inputs(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let video = dir.join("t_video.m4s");
        let audio = dir.join("t_audio.m4s");
        std::fs::write(&video, b"video").expect("video");
        std::fs::write(&audio, b"audio").expect("audio");
        (video, audio, dir.join("t.mp4"))
    }

    #[test]
    fn test_merge_args() {
        let args = MediaMerger::merge_args(
            Path::new("/d/a_video.m4s"),
            Path::new("/d/a_audio.m4s"),
            Path::new("/d/a.mp4"),
        );
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-y", "-i", "/d/a_video.m4s", "-i",
                "/d/a_audio.m4s", "-c", "copy", "/d/a.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_success_writes_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        // 最后一个参数是输出文件
        let tool = write_script(dir.path(), "ok.sh", "for last; do :; done\necho merged > \"$last\"");
        let (video, audio, output) = inputs(dir.path());

        MediaMerger::new(tool)
            .merge(&video, &audio, &output, Duration::from_secs(10))
            .await
            .expect("merge");
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = write_script(
            dir.path(),
            "fail.sh",
            "echo 't_audio.m4s: Invalid data found when processing input' >&2\nexit 1",
        );
        let (video, audio, output) = inputs(dir.path());

        let err = MediaMerger::new(tool)
            .merge(&video, &audio, &output, Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            MergeError::Tool { stderr, .. } => {
                assert!(stderr.contains("Invalid data found when processing input"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_merge_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = write_script(dir.path(), "hang.sh", "sleep 30");
        let (video, audio, output) = inputs(dir.path());

        let err = MediaMerger::new(tool)
            .merge(&video, &audio, &output, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_merge_missing_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let merger = MediaMerger::new("/bin/true");
        let err = merger
            .merge(
                &dir.path().join("none_video.m4s"),
                &dir.path().join("none_audio.m4s"),
                &dir.path().join("none.mp4"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_check_available() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = write_script(dir.path(), "probe.sh", "exit 0");
        assert!(MediaMerger::new(tool).check_available().await.is_ok());

        let missing = MediaMerger::new(dir.path().join("no-such-ffmpeg"));
        assert!(matches!(
            missing.check_available().await,
            Err(MergeError::Unavailable(_))
        ));
    }
}
