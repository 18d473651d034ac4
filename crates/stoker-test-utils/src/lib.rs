//! Shared test utilities for stoker integration tests.
//!
//! A fake engine is a small shell script standing in for the real engine
//! binary: it prints a readiness banner, then loops over stdin and answers
//! configured command lines with configured shell snippets. Tests point an
//! `EngineConfig` at the script and drive it like the real thing.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Builder for a fake engine script.
///
/// ```no_run
/// # use stoker_test_utils::FakeEngine;
/// # let dir = std::env::temp_dir();
/// let binary = FakeEngine::new()
///     .on("build;", "printf 'building...\\n'; printf 'OK\\n'")
///     .write(&dir);
/// ```
#[derive(Debug, Clone)]
pub struct FakeEngine {
    name: String,
    banner: String,
    prelude: Vec<String>,
    cases: Vec<(String, String)>,
}

impl FakeEngine {
    /// A fake engine that prints `ready>` and ignores every command.
    pub fn new() -> Self {
        Self {
            name: "fake-engine.sh".to_string(),
            banner: "ready>".to_string(),
            prelude: Vec::new(),
            cases: Vec::new(),
        }
    }

    /// Override the script filename (when one test dir holds several fakes).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the readiness banner line. An empty banner prints nothing,
    /// which makes the engine look like it never becomes ready.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Add a raw shell line executed before the banner (spawn markers,
    /// pid files, deliberate startup delays).
    pub fn with_prelude(mut self, line: impl Into<String>) -> Self {
        self.prelude.push(line.into());
        self
    }

    /// Answer any stdin line containing `needle` with the given shell
    /// snippet. Cases are tested in registration order.
    pub fn on(mut self, needle: impl Into<String>, shell: impl Into<String>) -> Self {
        self.cases.push((needle.into(), shell.into()));
        self
    }

    /// Write the script into `dir` and return its path.
    ///
    /// Panics on I/O failure; a fake engine that cannot be written is a
    /// broken test environment, not a condition to recover from.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join(&self.name);
        std::fs::write(&path, self.script()).expect("failed to write fake engine script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to mark fake engine script executable");
        }

        path
    }

    /// Write the script into a fresh temp dir owned by the returned handle.
    pub fn build(&self) -> FakeEngineBinary {
        let dir = TempDir::new().expect("failed to create fake engine temp dir");
        let path = self.write(dir.path());
        FakeEngineBinary { path, _dir: dir }
    }

    /// A fake engine that echoes every stdin line back verbatim.
    pub fn echo(dir: &Path) -> PathBuf {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str("printf '%s\\n' 'ready>'\n");
        script.push_str("while IFS= read -r line; do\n");
        script.push_str("  printf '%s\\n' \"$line\"\n");
        script.push_str("done\n");

        let path = dir.join("echo-engine.sh");
        std::fs::write(&path, script).expect("failed to write echo engine script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to mark echo engine script executable");
        }

        path
    }

    fn script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        for line in &self.prelude {
            script.push_str(line);
            script.push('\n');
        }
        if !self.banner.is_empty() {
            script.push_str(&format!("printf '%s\\n' '{}'\n", self.banner));
        }
        script.push_str("while IFS= read -r line; do\n");
        script.push_str("  case \"$line\" in\n");
        for (needle, shell) in &self.cases {
            script.push_str(&format!("    *\"{needle}\"*)\n"));
            script.push_str(&format!("      {shell}\n"));
            script.push_str("      ;;\n");
        }
        script.push_str("    *) : ;;\n");
        script.push_str("  esac\n");
        script.push_str("done\n");
        script
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A fake engine script plus the temp dir that keeps it alive.
#[derive(Debug)]
pub struct FakeEngineBinary {
    pub path: PathBuf,
    _dir: TempDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn script_carries_banner_prelude_and_cases() {
        let fake = FakeEngine::new()
            .with_prelude("echo $$ >> spawns.log")
            .on("ping;", "printf 'pong\\n'");
        let script = fake.script();

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("echo $$ >> spawns.log"));
        assert!(script.contains("'ready>'"));
        assert!(script.contains("*\"ping;\"*"));
        assert!(script.contains("printf 'pong\\n'"));
    }

    #[test]
    fn empty_banner_is_omitted() {
        let script = FakeEngine::new().with_banner("").script();
        assert!(!script.contains("ready>"));
    }

    #[test]
    fn written_script_is_executable_and_answers_commands() {
        let fake = FakeEngine::new().on("ping;", "printf 'pong\\n'").build();

        let mut child = Command::new(&fake.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("fake engine should spawn");

        {
            use std::io::Write;
            let stdin = child.stdin.as_mut().expect("stdin piped");
            stdin.write_all(b"ping;\n").expect("write command");
        }
        drop(child.stdin.take());

        let output = child.wait_with_output().expect("fake engine should exit");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("ready>"));
        assert!(stdout.contains("pong"));
    }

    #[test]
    fn echo_engine_echoes_lines() {
        let dir = TempDir::new().unwrap();
        let path = FakeEngine::echo(dir.path());

        let mut child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("echo engine should spawn");

        {
            use std::io::Write;
            let stdin = child.stdin.as_mut().expect("stdin piped");
            stdin.write_all(b"hello world\n").expect("write line");
        }
        drop(child.stdin.take());

        let output = child.wait_with_output().expect("echo engine should exit");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("hello world"));
    }
}
