use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

/// An external program that turns one ebook format into EPUB.
///
/// It is invoked as `program [args...] <input> <output>`, where the output
/// path always ends in `.epub` and the input path carries the source file's
/// extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}
impl Converter {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item: Into<String>>) -> Self {
        Self { program: program.into(), args: args.into_iter().map(Into::into).collect(), timeout: None }
    }

    /// Finds Calibre's `ebook-convert` on the `PATH`.
    pub fn discover() -> Result<Self> {
        // TODO: Look in Calibre's default install locations on macOS and Windows.
        match which::which("ebook-convert") {
            Ok(path) => Ok(Self::new(path, Vec::<String>::new())),
            Err(_) => {
                tracing::info!("ebook-convert executable not found in PATH");
                exn::bail!(ErrorKind::ConverterNotFound);
            },
        }
    }

    /// Kill the converter when a single conversion takes longer than this.
    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    #[instrument(skip(self), fields(program = %self.program.display()))]
    pub(crate) async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == IoErrorKind::NotFound => exn::bail!(ErrorKind::ConverterNotFound),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        };
        // Dropping the future on timeout drops the child, which kills it.
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .or_raise(|| ErrorKind::Timeout)?,
            None => child.wait_with_output().await,
        };
        let result = result.or_raise(|| ErrorKind::Io)?;
        if result.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&result.stderr);
        match result.status.code() {
            Some(code) => {
                tracing::warn!(code, stderr = %stderr.trim(), "Converter failed");
                exn::bail!(ErrorKind::ConverterFailed(code));
            },
            None => {
                tracing::warn!(stderr = %stderr.trim(), "Converter killed by signal");
                exn::bail!(ErrorKind::ConverterKilled);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sh(script: &str) -> Converter {
        Converter::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_arguments_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mobi");
        let output = dir.path().join("out.epub");
        tokio::fs::write(&input, "book").await.unwrap();
        // `sh -c script` binds the trailing arguments to $0 and $1.
        sh(r#"cp "$0" "$1""#).run(&input, &output).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&output).await.unwrap(), "book");
    }

    #[rstest]
    #[case("exit 3", ErrorKind::ConverterFailed(3))]
    #[case("exit 1", ErrorKind::ConverterFailed(1))]
    #[case("kill -9 $$", ErrorKind::ConverterKilled)]
    #[tokio::test]
    async fn test_failures(#[case] script: &str, #[case] expected: ErrorKind) {
        let err = sh(script).run(Path::new("a.mobi"), Path::new("b.epub")).await.unwrap_err();
        assert_eq!(*err, expected);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let converter = Converter::new("/nonexistent/ebook-convert", Vec::<String>::new());
        let err = converter.run(Path::new("a.mobi"), Path::new("b.epub")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ConverterNotFound);
    }

    #[tokio::test]
    async fn test_timeout_kills_converter() {
        let converter = sh("sleep 5").with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = converter.run(Path::new("a.mobi"), Path::new("b.epub")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
