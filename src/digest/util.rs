use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` characters, stripping control
/// characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    let bytes = reader
        .join()
        .map_err(|_| anyhow::anyhow!("output reader thread panicked"))??;
    Ok(bytes)
}

/// Run `cmd`, killing it after `timeout_secs`. Both pipes are drained while
/// waiting so a chatty child never stalls on a full pipe buffer.
pub fn run_command_with_optional_timeout(
    cmd: &mut Command,
    timeout_secs: Option<u64>,
) -> Result<Output> {
    let Some(timeout_secs) = timeout_secs else {
        return Ok(cmd.output()?);
    };
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Output {
                status,
                stdout: collect(stdout_reader)?,
                stderr: collect(stderr_reader)?,
            });
        }
        if started.elapsed() >= Duration::from_secs(timeout_secs) {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", timeout_secs);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Write `contents` to `path` through a sibling temp file so readers never
/// see a half-written report.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn truncate_with_ellipsis_marks_cut_text() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
        assert_eq!(truncate_with_ellipsis("ab\ncd", 10), "abcd");
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("reports/2024-w03.md");
        write_atomic(&target, "hello\n").expect("write");
        assert_eq!(fs::read_to_string(&target).expect("read"), "hello\n");
        write_atomic(&target, "again\n").expect("overwrite");
        assert_eq!(fs::read_to_string(&target).expect("read"), "again\n");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_kills_slow_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command_with_optional_timeout(&mut cmd, Some(1)).expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_drains_large_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "head -c 300000 /dev/zero; echo done >&2; exit 0"]);
        let output = run_command_with_optional_timeout(&mut cmd, Some(10)).expect("completes");
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 300_000);
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "done");
    }
}
