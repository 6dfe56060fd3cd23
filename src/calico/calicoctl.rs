//! calicoctl wrapper utilities

use crate::calico::error::{CalicoError, NOT_FOUND_MARKER};
use crate::calico::resources::ResourceList;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read/write access to the Calico datastore.
///
/// Resources cross this boundary as YAML documents. The typed helpers
/// deserialize them into the structs in [`crate::calico::resources`].
pub trait DatastoreClient {
    /// Fetch a single named resource, or the `items` list of a kind when
    /// `name` is `None`
    fn get(&self, kind: &str, name: Option<&str>) -> Result<serde_yaml::Value, CalicoError>;

    /// Create or update a resource
    fn apply(&self, manifest: &serde_yaml::Value) -> Result<(), CalicoError>;

    /// Delete a resource by name
    fn delete(&self, kind: &str, name: &str, skip_not_exists: bool) -> Result<(), CalicoError>;

    fn fetch<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<T, CalicoError>
    where
        Self: Sized,
    {
        let value = self.get(kind, Some(name))?;
        Ok(serde_yaml::from_value(value)?)
    }

    fn list<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, CalicoError>
    where
        Self: Sized,
    {
        let value = self.get(kind, None)?;
        let list: ResourceList<T> = serde_yaml::from_value(value)?;
        Ok(list.items.unwrap_or_default())
    }

    fn apply_resource<T: Serialize>(&self, resource: &T) -> Result<(), CalicoError>
    where
        Self: Sized,
    {
        let manifest = serde_yaml::to_value(resource)?;
        self.apply(&manifest)
    }
}

/// Runs the calicoctl binary with the etcd connection environment
#[derive(Debug, Clone)]
pub struct CalicoCtl {
    program: PathBuf,
    leading_args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CalicoCtl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build from a shell-style command line such as
    /// `"/opt/calicoctl/calicoctl"` or `"sudo -E calicoctl"`
    pub fn from_command_line(command_line: &str) -> anyhow::Result<Self> {
        let mut words = shell_words::split(command_line)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| anyhow::anyhow!("calicoctl command line is empty"))?;

        let mut ctl = Self::new(program);
        ctl.leading_args = words.collect();
        Ok(ctl)
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn display_command(&self, args: &[&str]) -> String {
        let mut words = vec![self.program.to_string_lossy().into_owned()];
        words.extend(self.leading_args.iter().cloned());
        words.extend(args.iter().map(|arg| arg.to_string()));
        shell_words::join(words)
    }

    /// Run calicoctl and capture stdout.
    ///
    /// A non-zero exit yields [`CalicoError::Command`] carrying stdout and
    /// stderr. A run longer than the timeout is killed and yields
    /// [`CalicoError::Timeout`].
    pub fn run(&self, args: &[&str]) -> Result<String, CalicoError> {
        let command = self.display_command(args);
        crate::log_debug!("Running {}", command);

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CalicoError::Spawn)?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait().map_err(CalicoError::Spawn)? {
                Some(status) => break status,
                None if start.elapsed() >= self.timeout => {
                    // Readers are left detached: grandchildren may still hold the pipes open.
                    let _ = child.kill();
                    let _ = child.wait();
                    crate::log_error!("{} timed out after {:?}", command, self.timeout);
                    return Err(CalicoError::Timeout {
                        command,
                        timeout: self.timeout,
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default()).into_owned();

        if !status.success() {
            crate::log_error!("{}", stderr.trim_end());
            crate::log_error!("{}", stdout.trim_end());
            return Err(CalicoError::Command {
                command,
                status: status.to_string(),
                output: format!("{}{}", stdout, stderr),
            });
        }

        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl DatastoreClient for CalicoCtl {
    fn get(&self, kind: &str, name: Option<&str>) -> Result<serde_yaml::Value, CalicoError> {
        let mut args = vec!["get", "-o", "yaml", "--export", kind];
        if let Some(name) = name {
            args.push(name);
        }

        let output = match self.run(&args) {
            Ok(output) => output,
            Err(CalicoError::Command { output, .. }) if output.contains(NOT_FOUND_MARKER) => {
                return Err(CalicoError::NotFound {
                    kind: kind.to_string(),
                    name: name.unwrap_or_default().to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        serde_yaml::from_str(&output).map_err(|e| {
            crate::log_error!("Failed to parse calicoctl output as yaml:\n {}", output);
            CalicoError::Parse(e)
        })
    }

    fn apply(&self, manifest: &serde_yaml::Value) -> Result<(), CalicoError> {
        let mut file = tempfile::Builder::new()
            .prefix("calicoctl_manifest")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(serde_yaml::to_string(manifest)?.as_bytes())?;
        file.flush()?;

        let path = path_arg(file.path());
        self.run(&["apply", "-f", &path])?;
        Ok(())
    }

    fn delete(&self, kind: &str, name: &str, skip_not_exists: bool) -> Result<(), CalicoError> {
        let mut args = vec!["delete", kind, name];
        if skip_not_exists {
            args.push("--skip-not-exists");
        }
        self.run(&args)?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
