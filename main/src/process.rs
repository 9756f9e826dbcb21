use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::Command;

pub async fn eval(command: &str, args: &[&str], stdin: &[u8]) -> Result<Vec<u8>, ProcessError> {
    let mut process = Command::new(command)
        .args(args)
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    let mut stdin_pipe = process
        .stdin
        .take()
        .ok_or_else(|| ProcessError::RedirectStdIo)?;
    stdin_pipe.write_all(stdin).await?;
    drop(stdin_pipe);

    collect_stdout(process).await
}

pub async fn run(command: &str, args: &[&str]) -> Result<Vec<u8>, ProcessError> {
    let process = Command::new(command)
        .args(args)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    collect_stdout(process).await
}

pub async fn probe(command: &str, args: &[&str], log_target: Arc<str>) -> bool {
    let mut process = if let Ok(p) = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
    {
        p
    } else {
        log::debug!(
            target: &*log_target,
            "Failed to spawn process of command {}",
            command
        );
        return false;
    };

    let status = if let Ok(s) = process.wait().await {
        s
    } else {
        log::debug!(
            target: &*log_target,
            "Failed to wait for process of command {}",
            command
        );
        return false;
    };

    if status.success() {
        true
    } else {
        log::debug!(target: &*log_target, "Command {} exited with failure", command);
        false
    }
}

/// Reads STDOUT while waiting so that a chatty command cannot fill up the pipe.
async fn collect_stdout(process: Child) -> Result<Vec<u8>, ProcessError> {
    let output = process.wait_with_output().await?;
    if !output.status.success() {
        return Err(ProcessError::ExternalCommand);
    }
    Ok(output.stdout)
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to create a child process")]
    ChildProcessCreation(#[from] std::io::Error),

    #[error("Failed to redirect standard I/O")]
    RedirectStdIo,

    #[error("External command failed")]
    ExternalCommand,
}

#[cfg(all(test, unix))]
mod test {
    #[tokio::test]
    async fn eval() {
        crate::test::init();

        let output = super::eval("sh", &["-s"], b"echo 123").await.unwrap();
        let output_text = String::from_utf8(output).unwrap();
        assert_eq!(output_text.trim(), "123");
    }

    #[tokio::test]
    async fn eval_failure() {
        crate::test::init();

        let e = super::eval("sh", &["-s"], b"exit 3").await.unwrap_err();
        assert_eq!(e.to_string(), "External command failed");
    }

    #[tokio::test]
    async fn run() {
        crate::test::init();

        let output = super::run("sh", &["-c", "echo 123"]).await.unwrap();
        let output_text = String::from_utf8(output).unwrap();
        assert_eq!(output_text.trim(), "123");
    }

    #[tokio::test]
    async fn run_failure() {
        crate::test::init();

        let e = super::run("sh", &["-c", "false"]).await.unwrap_err();
        assert_eq!(e.to_string(), "External command failed");
    }

    #[tokio::test]
    async fn probe() {
        crate::test::init();

        assert!(super::probe("sh", &["-c", "true"], "test".into()).await);
    }

    #[tokio::test]
    async fn probe_non_existing_command() {
        crate::test::init();

        assert!(!super::probe("__some_unknown_command__", &["--version"], "test".into()).await);
    }

    #[tokio::test]
    async fn probe_failing_command() {
        crate::test::init();

        assert!(!super::probe("sh", &["-c", "exit 1"], "test".into()).await);
    }
}
