//! Fake engine and prober scripts for tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable POSIX shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Behaviour of a fake ffmpeg.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    /// Values printed as `time=` stats lines, `\r` terminated, on stderr.
    pub times: Vec<&'static str>,
    /// Bytes of zeroes written to the output path (last argument).
    pub output_bytes: u64,
    pub exit_code: i32,
    /// Exit 1 without output when the output path contains this text.
    pub fail_when_output_contains: Option<&'static str>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            times: vec!["00:00:02.50", "00:00:05.00", "00:00:07.50"],
            output_bytes: 2048,
            exit_code: 0,
            fail_when_output_contains: None,
        }
    }
}

/// Write a fake ffmpeg as `dir/ffmpeg`.
///
/// Every invocation appends its arguments and working directory to `dir/engine.log`.
pub fn fake_engine(dir: &Path, spec: FakeEngine) -> PathBuf {
    let log = dir.join("engine.log");
    let mut body = String::new();
    body.push_str("for last; do :; done\n");
    body.push_str(&format!(
        "echo \"$(pwd) :: $*\" >> '{}'\n",
        log.display()
    ));
    body.push_str("echo 'Input #0, matroska,webm, from input:' >&2\n");
    if let Some(pattern) = spec.fail_when_output_contains {
        body.push_str(&format!(
            "case \"$last\" in *{}*) echo 'Error while processing the decoded data' >&2; exit 1;; esac\n",
            pattern
        ));
    }
    for time in &spec.times {
        body.push_str(&format!(
            "printf 'frame=  10 fps=25 q=28.0 size=  256kB time={} bitrate= 800kbits/s\\r' >&2\n",
            time
        ));
    }
    if spec.output_bytes > 0 {
        body.push_str(&format!(
            "head -c {} /dev/zero > \"$last\"\n",
            spec.output_bytes
        ));
    }
    if spec.exit_code != 0 {
        body.push_str("echo 'Conversion failed!' >&2\n");
    }
    body.push_str(&format!("exit {}\n", spec.exit_code));
    write_script(dir, "ffmpeg", &body)
}

/// Write a fake ffprobe as `dir/ffprobe` reporting fixed metadata.
pub fn fake_ffprobe(dir: &Path, width: u32, height: u32, duration_secs: f64) -> PathBuf {
    let json = format!(
        r#"{{"streams":[{{"codec_type":"video","codec_name":"h264","width":{},"height":{}}},{{"codec_type":"audio","codec_name":"aac"}}],"format":{{"duration":"{:.6}"}}}}"#,
        width, height, duration_secs
    );
    write_script(dir, "ffprobe", &format!("cat <<'EOF'\n{}\nEOF\n", json))
}

/// Lines of `dir/engine.log`, one per engine invocation.
pub fn engine_calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("engine.log"))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
