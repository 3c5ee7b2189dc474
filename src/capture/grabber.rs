//! Still-frame grabbers that shell out to platform tools.
//!
//! Camera frames come from `ffmpeg` (v4l2 on Linux, avfoundation on macOS).
//! Screen frames come from `screencapture` on macOS and `grim` (Wayland) or
//! ImageMagick `import` (X11) elsewhere. Each read runs the tool once and
//! decodes the PNG it produces.

use super::FrameDevice;
use crate::config::CaptureMode;
use crate::error::{Result, SessionError};
use crate::pipeline::messages::StreamRead;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Where a grab command leaves its image.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Stdout,
    /// The tool writes to this path; it is removed after each read.
    File(PathBuf),
}

/// A frame device backed by an external command.
#[derive(Debug)]
pub struct CommandGrabber {
    program: PathBuf,
    args: Vec<String>,
    output: Output,
    closed: AtomicBool,
}

impl CommandGrabber {
    /// Pick a grabber for `mode` on this platform. Returns `Ok(None)` for
    /// [`CaptureMode::None`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] if no suitable tool is installed.
    pub fn for_mode(mode: CaptureMode, camera_index: u32) -> Result<Option<Self>> {
        match mode {
            CaptureMode::None => Ok(None),
            CaptureMode::Camera => Self::camera(camera_index).map(Some),
            CaptureMode::Screen => Self::screen().map(Some),
        }
    }

    /// Grab from the camera with the given index.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] if `ffmpeg` is missing or the
    /// platform has no supported camera input.
    pub fn camera(index: u32) -> Result<Self> {
        let program = which::which("ffmpeg")
            .map_err(|_| SessionError::Device("camera capture needs ffmpeg on PATH".into()))?;
        let input: Vec<String> = if cfg!(target_os = "macos") {
            vec![
                "-f".into(),
                "avfoundation".into(),
                "-framerate".into(),
                "30".into(),
                "-i".into(),
                format!("{index}"),
            ]
        } else if cfg!(target_os = "linux") {
            vec!["-f".into(), "v4l2".into(), "-i".into(), format!("/dev/video{index}")]
        } else {
            return Err(SessionError::Device(
                "camera capture is not supported on this platform".into(),
            ));
        };

        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(input);
        args.extend(
            ["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]
                .into_iter()
                .map(String::from),
        );
        info!(program = %program.display(), index, "camera grabber ready");
        Ok(Self::new(program, args, Output::Stdout))
    }

    /// Grab the primary display.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] if no screenshot tool is installed.
    pub fn screen() -> Result<Self> {
        if cfg!(target_os = "macos") {
            let program = which::which("screencapture").map_err(|_| {
                SessionError::Device("screen capture needs screencapture on PATH".into())
            })?;
            let path = std::env::temp_dir().join(format!(
                "duplex-agent-screen-{}.png",
                uuid::Uuid::new_v4()
            ));
            let args = vec![
                "-x".into(),
                "-t".into(),
                "png".into(),
                path.to_string_lossy().into_owned(),
            ];
            return Ok(Self::new(program, args, Output::File(path)));
        }

        let wayland = std::env::var_os("WAYLAND_DISPLAY").is_some();
        if wayland && let Ok(program) = which::which("grim") {
            return Ok(Self::new(
                program,
                vec!["-t".into(), "png".into(), "-".into()],
                Output::Stdout,
            ));
        }
        if let Ok(program) = which::which("import") {
            return Ok(Self::new(
                program,
                vec!["-window".into(), "root".into(), "png:-".into()],
                Output::Stdout,
            ));
        }
        Err(SessionError::Device(
            "screen capture needs grim or ImageMagick import on PATH".into(),
        ))
    }

    fn new(program: PathBuf, args: Vec<String>, output: Output) -> Self {
        Self {
            program,
            args,
            output,
            closed: AtomicBool::new(false),
        }
    }

    async fn grab(&self) -> Result<DynamicImage> {
        let result = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SessionError::Device(format!("failed to run {}: {e}", self.program.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(SessionError::Device(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            )));
        }

        let bytes = match &self.output {
            Output::Stdout => result.stdout,
            Output::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                let _ = tokio::fs::remove_file(path).await;
                bytes
            }
        };
        debug!(bytes = bytes.len(), "frame grabbed");
        image::load_from_memory(&bytes)
            .map_err(|e| SessionError::Device(format!("grabbed frame is not an image: {e}")))
    }
}

#[async_trait]
impl FrameDevice for CommandGrabber {
    async fn read_frame(&self) -> StreamRead<DynamicImage> {
        if self.closed.load(Ordering::Acquire) {
            return StreamRead::EndOfStream;
        }
        match self.grab().await {
            Ok(frame) => StreamRead::Item(frame),
            Err(e) => StreamRead::Failed(e.to_string()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Output::File(path) = &self.output {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}
