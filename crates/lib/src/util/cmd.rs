//! Running project scripts out-of-process.
//!
//! Project scripts (`scripts.test`, `scripts.build`, ...) are shell snippets.
//! They run through the platform shell inside the project directory, with the
//! project's `node_modules/.bin` prepended to `PATH` so linked executables
//! resolve the same way the package manager would resolve them.

use std::ffi::OsString;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::materialize::{BIN_DIR_NAME, DEPS_DIR_NAME};

/// Build the command that runs `script` in `cwd` with extra `args` appended.
pub fn script_command(script: &str, args: &[String], cwd: &Path) -> Command {
  let (shell, shell_args) = get_shell();

  let mut command = Command::new(shell);
  command.args(shell_args).current_dir(cwd);

  #[cfg(unix)]
  {
    // `sh -c 'script "$@"' sh a b` forwards a and b as positional args.
    command.arg(format!("{} \"$@\"", script)).arg("sh").args(args);
  }
  #[cfg(windows)]
  {
    let mut line = script.to_string();
    for arg in args {
      line.push(' ');
      line.push_str(arg);
    }
    command.arg(line);
  }

  command.env("PATH", path_with_bin(cwd));
  debug!(cwd = %cwd.display(), script, "prepared script command");
  command
}

/// Run `script` to completion, returning the exit code (or `None` if killed).
pub async fn run_script(script: &str, args: &[String], cwd: &Path) -> std::io::Result<Option<i32>> {
  let status = script_command(script, args, cwd).status().await?;
  Ok(status.code())
}

fn path_with_bin(cwd: &Path) -> OsString {
  let bin_dir = cwd.join(DEPS_DIR_NAME).join(BIN_DIR_NAME);
  let mut paths = vec![bin_dir];
  if let Some(existing) = std::env::var_os("PATH") {
    paths.extend(std::env::split_paths(&existing));
  }
  std::env::join_paths(paths).unwrap_or_default()
}

#[cfg(unix)]
fn get_shell() -> (&'static str, [&'static str; 1]) {
  ("/bin/sh", ["-c"])
}

#[cfg(windows)]
fn get_shell() -> (&'static str, [&'static str; 1]) {
  ("cmd.exe", ["/C"])
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn forwards_arguments() {
    let temp = TempDir::new().unwrap();
    let code = run_script("test hello =", &["hello".to_string()], temp.path())
      .await
      .unwrap();
    assert_eq!(code, Some(0));
  }

  #[tokio::test]
  async fn reports_failure_code() {
    let temp = TempDir::new().unwrap();
    let code = run_script("exit 3", &[], temp.path()).await.unwrap();
    assert_eq!(code, Some(3));
  }

  #[tokio::test]
  async fn linked_executables_are_on_path() {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("node_modules/.bin");
    std::fs::create_dir_all(&bin).unwrap();
    let tool = bin.join("hello-tool");
    std::fs::write(&tool, "#!/bin/sh\nexit 0\n").unwrap();
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let code = run_script("hello-tool", &[], temp.path()).await.unwrap();
    assert_eq!(code, Some(0));
  }
}
