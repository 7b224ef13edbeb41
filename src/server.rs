//! Supervision of a private CouchDB server process.
//!
//! The server is launched in background mode through the `couchdb` launcher,
//! which writes a pid file and, once listening, a URI file. Readiness is
//! established in three steps: the launcher's status command succeeds, the
//! URI file appears, and `GET /` answers CouchDB's welcome document.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::client::{CouchClient, Welcome};
use crate::config::{render_ini, CouchDbConfig};
use crate::error::ServerError;

/// Running CouchDB server.
///
/// Dropping a server that was not [`stop`](Self::stop)ped stops it with a
/// blocking call to the launcher, which holds up the dropping thread (a tokio
/// worker included) until the launcher exits. Prefer `stop` inside a runtime.
/// If that stop fails, a temporary directory is left on disk.
pub struct CouchDbServer {
    config: CouchDbConfig,
    directory: PathBuf,
    temp: Option<TempDir>,
    uri: String,
    stopped: bool,
}

impl CouchDbServer {
    /// Launch the server and wait until it answers HTTP requests.
    pub async fn start(config: CouchDbConfig) -> Result<Self, ServerError> {
        let (directory, temp) = match &config.directory {
            Some(path) => {
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(|source| io_error(path, source))?;
                (path.clone(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("couchdb-")
                    .tempdir()
                    .map_err(|source| io_error(&std::env::temp_dir(), source))?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let ini = file(&directory, "ini");
        tokio::fs::write(&ini, render_ini(&directory, config.port))
            .await
            .map_err(|source| io_error(&ini, source))?;

        let uri_file = file(&directory, "uri");
        match tokio::fs::remove_file(&uri_file).await {
            Ok(()) => debug!(path = %uri_file.display(), "removed stale URI file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error(&uri_file, source)),
        }

        let pid = file(&directory, "pid");
        let stdout = file(&directory, "stdout");
        let stderr = file(&directory, "stderr");
        let launch = [
            OsStr::new("-a"),
            ini.as_os_str(),
            OsStr::new("-b"),
            OsStr::new("-p"),
            pid.as_os_str(),
            OsStr::new("-o"),
            stdout.as_os_str(),
            OsStr::new("-e"),
            stderr.as_os_str(),
        ];
        run_checked(&config.executable, &launch).await?;
        info!(directory = %directory.display(), port = config.port, "launched CouchDB");

        let mut server = Self {
            config,
            directory,
            temp,
            uri: String::new(),
            stopped: false,
        };
        server.uri = server.wait_ready().await?;
        info!(uri = %server.uri, "CouchDB is ready");
        Ok(server)
    }

    /// Stop the server and remove its directory if it was temporary.
    ///
    /// On failure the server is still considered running: dropping it retries
    /// the stop and keeps the directory if that fails too.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        let pid = self.path("pid");
        run_checked(
            &self.config.executable,
            &[OsStr::new("-d"), OsStr::new("-p"), pid.as_os_str()],
        )
        .await?;
        self.stopped = true;
        info!(directory = %self.directory.display(), "stopped CouchDB");

        if let Some(temp) = self.temp.take() {
            let path = temp.path().to_path_buf();
            temp.close().map_err(|source| io_error(&path, source))?;
        }
        Ok(())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn client(&self) -> CouchClient {
        CouchClient::new(&self.uri)
    }

    fn path(&self, extension: &str) -> PathBuf {
        file(&self.directory, extension)
    }

    async fn wait_ready(&self) -> Result<String, ServerError> {
        let deadline = Instant::now() + self.config.startup_timeout;

        let ini = self.path("ini");
        let pid = self.path("pid");
        let status = [
            OsStr::new("-a"),
            ini.as_os_str(),
            OsStr::new("-p"),
            pid.as_os_str(),
            OsStr::new("-s"),
        ];
        loop {
            match timeout_at(deadline, run(&self.config.executable, &status)).await {
                Ok(result) => {
                    if result?.success() {
                        break;
                    }
                }
                Err(_) => return Err(self.timeout("report running")),
            }
            self.pause(deadline, "report running").await?;
        }

        let uri_file = self.path("uri");
        let uri = loop {
            match tokio::fs::read_to_string(&uri_file).await {
                Ok(contents) if !contents.trim().is_empty() => break contents.trim().to_string(),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(io_error(&uri_file, source)),
            }
            self.pause(deadline, "write its URI file").await?;
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        loop {
            let probe = async { http.get(&uri).send().await?.json::<Welcome>().await };
            match timeout_at(deadline, probe).await {
                Ok(Ok(welcome)) if welcome.is_welcome() => return Ok(uri),
                Ok(Ok(welcome)) => debug!(couchdb = %welcome.couchdb, "unexpected welcome"),
                Ok(Err(e)) if e.is_connect() || e.is_timeout() => {
                    debug!(error = %e, "CouchDB not accepting connections yet")
                }
                Ok(Err(e)) if e.is_decode() => debug!(error = %e, "welcome not readable yet"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(self.timeout("answer HTTP requests")),
            }
            self.pause(deadline, "answer HTTP requests").await?;
        }
    }

    async fn pause(&self, deadline: Instant, phase: &'static str) -> Result<(), ServerError> {
        if Instant::now() >= deadline {
            return Err(self.timeout(phase));
        }
        sleep(self.config.poll_interval).await;
        Ok(())
    }

    fn timeout(&self, phase: &'static str) -> ServerError {
        ServerError::Timeout {
            phase,
            timeout: self.config.startup_timeout,
        }
    }
}

impl Drop for CouchDbServer {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        warn!(directory = %self.directory.display(), "CouchDB dropped while running, stopping it");
        let result = std::process::Command::new(&self.config.executable)
            .arg("-d")
            .arg("-p")
            .arg(self.path("pid"))
            .stdin(Stdio::null())
            .status();
        let stopped = match result {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(%status, "CouchDB stop command failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "could not run CouchDB stop command");
                false
            }
        };
        if !stopped {
            if let Some(temp) = self.temp.take() {
                let path = temp.keep();
                warn!(directory = %path.display(), "keeping directory of a server that may still run");
            }
        }
    }
}

fn file(directory: &Path, extension: &str) -> PathBuf {
    directory.join(format!("couchdb.{extension}"))
}

fn io_error(path: &Path, source: std::io::Error) -> ServerError {
    ServerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn command_line(executable: &Path, args: &[&OsStr]) -> String {
    let mut line = OsString::from(executable.as_os_str());
    for arg in args {
        line.push(" ");
        line.push(arg);
    }
    line.to_string_lossy().into_owned()
}

async fn run(executable: &Path, args: &[&OsStr]) -> Result<std::process::ExitStatus, ServerError> {
    Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| ServerError::Command {
            command: command_line(executable, args),
            reason: e.to_string(),
        })
}

async fn run_checked(executable: &Path, args: &[&OsStr]) -> Result<(), ServerError> {
    let status = run(executable, args).await?;
    if status.success() {
        Ok(())
    } else {
        Err(ServerError::Command {
            command: command_line(executable, args),
            reason: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_share_the_couchdb_prefix() {
        let dir = Path::new("/srv/beyond");
        assert_eq!(file(dir, "ini"), PathBuf::from("/srv/beyond/couchdb.ini"));
        assert_eq!(file(dir, "uri"), PathBuf::from("/srv/beyond/couchdb.uri"));
    }

    #[test]
    fn command_line_joins_arguments() {
        let line = command_line(
            Path::new("couchdb"),
            &[OsStr::new("-d"), OsStr::new("-p"), OsStr::new("/tmp/couchdb.pid")],
        );
        assert_eq!(line, "couchdb -d -p /tmp/couchdb.pid");
    }
}
