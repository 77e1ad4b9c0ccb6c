// External tool resolution (ffmpeg, ffprobe, exiftool)
//
// Resolution order:
// 1) Environment variable override (MEDIAFLOW_FFPROBE_PATH, etc.)
// 2) Binary next to the executable (or in a bin/ subdirectory)
// 3) PATH fallback

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    FFmpeg,
    FFprobe,
    ExifTool,
}

impl Tool {
    pub fn all() -> [Tool; 3] {
        [Tool::FFmpeg, Tool::FFprobe, Tool::ExifTool]
    }

    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::FFmpeg => "ffmpeg",
            Tool::FFprobe => "ffprobe",
            Tool::ExifTool => "exiftool",
        }
    }

    fn env_key(&self) -> &'static str {
        match self {
            Tool::FFmpeg => "MEDIAFLOW_FFMPEG_PATH",
            Tool::FFprobe => "MEDIAFLOW_FFPROBE_PATH",
            Tool::ExifTool => "MEDIAFLOW_EXIFTOOL_PATH",
        }
    }

    fn version_flag(&self) -> &'static str {
        match self {
            Tool::ExifTool => "-ver",
            _ => "-version",
        }
    }

    pub fn path(&self) -> PathBuf {
        resolve_tool(self.env_key(), self.binary_name())
    }

    /// Probed once per process.
    pub fn is_available(&self) -> bool {
        static FFMPEG: OnceLock<bool> = OnceLock::new();
        static FFPROBE: OnceLock<bool> = OnceLock::new();
        static EXIFTOOL: OnceLock<bool> = OnceLock::new();
        let cell = match self {
            Tool::FFmpeg => &FFMPEG,
            Tool::FFprobe => &FFPROBE,
            Tool::ExifTool => &EXIFTOOL,
        };
        *cell.get_or_init(|| probe(*self))
    }
}

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
        log::warn!("{} points at missing file {}", env_key, v);
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        for candidate in [dir.join(&filename), dir.join("bin").join(&filename)] {
            if candidate.exists() {
                return candidate;
            }
        }
    }

    PathBuf::from(default_name)
}

fn probe(tool: Tool) -> bool {
    let path = tool.path();
    if path.is_absolute() && path.exists() {
        return true;
    }
    Command::new(&path)
        .arg(tool.version_flag())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn ffmpeg_path() -> PathBuf {
    Tool::FFmpeg.path()
}

pub fn ffprobe_path() -> PathBuf {
    Tool::FFprobe.path()
}

pub fn exiftool_path() -> PathBuf {
    Tool::ExifTool.path()
}

/// Warn once about tools that video and sidecar processing will miss.
pub fn log_missing_tools() {
    for tool in Tool::all() {
        if !tool.is_available() {
            log::warn!("{} not found; jobs that need it will fail or skip", tool.binary_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tool_fallback() {
        let path = resolve_tool("MEDIAFLOW_TEST_NONEXISTENT", "testcmd");
        assert_eq!(path, PathBuf::from("testcmd"));
    }

    #[test]
    fn test_binary_names() {
        assert_eq!(Tool::FFprobe.binary_name(), "ffprobe");
        assert_eq!(Tool::ExifTool.version_flag(), "-ver");
    }
}
