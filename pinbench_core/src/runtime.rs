//! Container runtime capability
//!
//! [`ContainerRuntime`] is the narrow interface the sandbox needs from an
//! image builder and instance launcher. [`DockerCli`] implements it on top of
//! the `docker` command line; tests substitute an in-memory fake.
//!
//! The runtime handle is constructed once by the caller and passed down
//! explicitly; nothing here keeps global client state.

use crate::error::{BenchError, BenchResult};
use crate::topology::format_cpu_list;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

/// Identifier of a built image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageHandle(String);

impl ImageHandle {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Identifier of a launched instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle(String);

impl InstanceHandle {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Which captured stream to read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Host directory mounted into the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_write: bool,
}

/// Everything needed to launch one detached instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: ImageHandle,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
    /// Logical CPUs the instance may run on
    pub cpuset: BTreeSet<usize>,
    /// Extra Linux capabilities granted to the instance
    pub capabilities: Vec<String>,
}

/// Image build and instance lifecycle operations
pub trait ContainerRuntime {
    /// Build an image from a context directory
    ///
    /// Fails with [`BenchError::BuildFailed`] carrying the builder's output.
    fn build(
        &self,
        context_dir: &Path,
        build_args: &BTreeMap<String, String>,
    ) -> BenchResult<ImageHandle>;

    /// Start a detached instance
    fn run(&self, spec: &LaunchSpec) -> BenchResult<InstanceHandle>;

    /// Block until the instance exits and return its exit status
    fn wait(&self, instance: &InstanceHandle) -> BenchResult<i64>;

    /// Full contents of one captured stream
    fn logs(&self, instance: &InstanceHandle, stream: LogStream) -> BenchResult<Vec<u8>>;

    /// Stop the instance, killing it after `timeout`
    fn stop(&self, instance: &InstanceHandle, timeout: Duration) -> BenchResult<()>;

    /// Delete the instance
    fn remove(&self, instance: &InstanceHandle) -> BenchResult<()>;
}

/// [`ContainerRuntime`] backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Server version, used to check the daemon is reachable
    pub fn server_version(&self) -> BenchResult<String> {
        let output = self.exec(["version", "--format", "{{.Server.Version}}"])?;
        checked(output, "version")
    }

    fn exec<I, S>(&self, args: I) -> BenchResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        log::trace!("Executing {:?}", cmd);
        cmd.output().map_err(|e| {
            BenchError::runtime(format!(
                "failed to execute {}: {}",
                self.program.display(),
                e
            ))
        })
    }
}

/// `docker build` arguments for a context and its build args
pub fn build_args(context_dir: &Path, build_args: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec!["build".to_string(), "-q".to_string()];
    for (key, value) in build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(context_dir.display().to_string());
    args
}

/// `docker run` arguments for a detached, pinned launch
pub fn run_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];
    for capability in &spec.capabilities {
        args.push("--cap-add".to_string());
        args.push(capability.clone());
    }
    if !spec.cpuset.is_empty() {
        args.push("--cpuset-cpus".to_string());
        args.push(format_cpu_list(&spec.cpuset));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:{}",
            volume.host_path.display(),
            volume.container_path,
            if volume.read_write { "rw" } else { "ro" }
        ));
    }
    args.push(spec.image.id().to_string());
    args.extend(spec.command.iter().cloned());
    args
}

fn checked(output: Output, what: &str) -> BenchResult<String> {
    if !output.status.success() {
        return Err(BenchError::runtime(format!(
            "docker {} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl ContainerRuntime for DockerCli {
    fn build(
        &self,
        context_dir: &Path,
        build_args_map: &BTreeMap<String, String>,
    ) -> BenchResult<ImageHandle> {
        let output = self.exec(build_args(context_dir, build_args_map))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(BenchError::BuildFailed {
                job: context_dir.display().to_string(),
                diagnostics: format!(
                    "{}{}",
                    stdout,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        // `-q` prints only the image id, possibly after BuildKit noise
        let id = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| BenchError::runtime("docker build printed no image id"))?;
        Ok(ImageHandle::new(id))
    }

    fn run(&self, spec: &LaunchSpec) -> BenchResult<InstanceHandle> {
        let output = self.exec(run_args(spec))?;
        let id = checked(output, "run")?;
        if id.is_empty() {
            return Err(BenchError::runtime("docker run printed no container id"));
        }
        Ok(InstanceHandle::new(id))
    }

    fn wait(&self, instance: &InstanceHandle) -> BenchResult<i64> {
        let output = self.exec(["wait", instance.id()])?;
        let status = checked(output, "wait")?;
        status.parse::<i64>().map_err(|_| {
            BenchError::runtime(format!("docker wait returned {:?}, not a status", status))
        })
    }

    fn logs(&self, instance: &InstanceHandle, stream: LogStream) -> BenchResult<Vec<u8>> {
        // `docker logs` replays the instance's stdout on its stdout and the
        // instance's stderr on its stderr.
        let output = self.exec(["logs", instance.id()])?;
        if !output.status.success() {
            return Err(BenchError::runtime(format!(
                "docker logs failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(match stream {
            LogStream::Stdout => output.stdout,
            LogStream::Stderr => output.stderr,
        })
    }

    fn stop(&self, instance: &InstanceHandle, timeout: Duration) -> BenchResult<()> {
        let secs = timeout.as_secs().max(1).to_string();
        let output = self.exec(["stop", "-t", secs.as_str(), instance.id()])?;
        checked(output, "stop").map(|_| ())
    }

    fn remove(&self, instance: &InstanceHandle) -> BenchResult<()> {
        let output = self.exec(["rm", instance.id()])?;
        checked(output, "rm").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let mut args = BTreeMap::new();
        args.insert("PYVER".to_string(), "3.12".to_string());
        args.insert("BLAS".to_string(), "openblas".to_string());
        assert_eq!(
            build_args(Path::new("/jobs/matmul"), &args),
            vec![
                "build",
                "-q",
                "--build-arg",
                "BLAS=openblas",
                "--build-arg",
                "PYVER=3.12",
                "/jobs/matmul"
            ]
        );
    }

    #[test]
    fn test_run_args() {
        let spec = LaunchSpec {
            image: ImageHandle::new("sha256:abc"),
            command: vec!["python".to_string(), "bench.py".to_string()],
            env: BTreeMap::from([("STEPS".to_string(), "5".to_string())]),
            volumes: vec![VolumeBinding {
                host_path: PathBuf::from("/tmp/out"),
                container_path: "/out".to_string(),
                read_write: true,
            }],
            cpuset: BTreeSet::from([4, 0]),
            capabilities: vec!["SYS_NICE".to_string()],
        };
        assert_eq!(
            run_args(&spec),
            vec![
                "run",
                "-d",
                "--cap-add",
                "SYS_NICE",
                "--cpuset-cpus",
                "0,4",
                "-e",
                "STEPS=5",
                "-v",
                "/tmp/out:/out:rw",
                "sha256:abc",
                "python",
                "bench.py"
            ]
        );
    }

    #[test]
    fn test_missing_binary_is_runtime_error() {
        let docker = DockerCli::new("/nonexistent/pinbench-docker");
        assert!(matches!(
            docker.wait(&InstanceHandle::new("abc")),
            Err(BenchError::ContainerRuntime(_))
        ));
    }
}
