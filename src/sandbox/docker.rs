//! Docker-backed execution environment.
//!
//! A host workspace directory is bind-mounted into a long-lived container.
//! Commands run through `docker exec`; file operations translate the
//! agent's container paths to host paths and go through the bind mount.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::environment::{
    cap_matches, effective_timeout, find_command, grep_command, EnvironmentInfo, ExecOptions,
    ExecResult, ExecutionEnvironment, GlobOptions, GrepOptions, DEFAULT_MAX_GREP_RESULTS,
    MAX_GLOB_RESULTS, TIMEOUT_EXIT_CODE,
};
use super::network::NetworkMode;
use super::process::RawOutput;
use super::{Result, SandboxError};
use crate::config::{expand_path, EnvironmentKind, Mount, SandboxConfig};
use crate::output::{is_binary, parse_search_output, SearchMatch};
use crate::security::{ensure_canonical_within, ensure_not_symlink, ensure_within, normalize_path};

/// Extra time granted to the in-container `timeout` before the client gives up.
const EXEC_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Label attached to every container this crate creates.
pub const SANDBOX_LABEL: &str = "agentbox.sandbox";

#[derive(Debug, Clone)]
struct RunningContainer {
    docker: Docker,
    name: String,
    id: String,
}

/// Runs commands inside a Docker container.
#[derive(Debug)]
pub struct DockerEnvironment {
    sandbox_id: String,
    image: String,
    host_workspace: PathBuf,
    container_workdir: PathBuf,
    network: NetworkMode,
    memory_bytes: i64,
    nano_cpus: i64,
    env: BTreeMap<String, String>,
    mounts: Vec<Mount>,
    restrict_reads: bool,
    default_timeout: Duration,
    max_output_chars: usize,
    container: Mutex<Option<RunningContainer>>,
}

impl DockerEnvironment {
    /// Builds the environment described by `config.docker`.
    ///
    /// The host workspace falls back to `local.cwd`, then the process
    /// working directory.
    pub fn from_config(sandbox_id: &str, config: &SandboxConfig) -> Result<Self> {
        let docker = &config.docker;
        let workspace = match docker.workspace_dir.as_deref().or(config.local.cwd.as_deref()) {
            Some(dir) => expand_path(dir)?,
            None => std::env::current_dir()
                .map_err(|e| SandboxError::io("Failed to get current directory", e))?,
        };
        let host_workspace = if workspace.is_absolute() {
            normalize_path(&workspace)
        } else {
            let base = std::env::current_dir()
                .map_err(|e| SandboxError::io("Failed to get current directory", e))?;
            normalize_path(&base.join(workspace))
        };

        let container_workdir = PathBuf::from(&docker.container_workdir);
        if !container_workdir.is_absolute() {
            return Err(SandboxError::config(format!(
                "Container working directory must be absolute: {}",
                docker.container_workdir
            )));
        }

        let cpus: f64 = docker.resources.cpus.parse().map_err(|_| {
            SandboxError::config(format!("Invalid CPU limit: {}", docker.resources.cpus))
        })?;
        #[allow(clippy::cast_possible_truncation)]
        let nano_cpus = (cpus * 1_000_000_000.0) as i64;

        Ok(Self {
            sandbox_id: sandbox_id.to_string(),
            image: docker.image.clone(),
            host_workspace,
            container_workdir: normalize_path(&container_workdir),
            network: docker.network,
            memory_bytes: parse_memory_limit(&docker.resources.memory)?,
            nano_cpus,
            env: docker.env.clone(),
            mounts: docker.mounts.clone(),
            restrict_reads: config.path_restriction.is_some(),
            default_timeout: config.exec_timeout(),
            max_output_chars: config.exec.max_output_chars,
            container: Mutex::new(None),
        })
    }

    /// Host directory mounted at the container working directory.
    pub fn host_workspace(&self) -> &Path {
        &self.host_workspace
    }

    /// Validated, normalized container-side path for a user-supplied path.
    fn resolve_container(&self, path: &str) -> Result<PathBuf> {
        ensure_within(
            Path::new(path),
            &self.container_workdir,
            &self.container_workdir,
        )
    }

    /// Translate a container path to the host side of the bind mount.
    pub fn to_host_path(&self, container_path: &str) -> Result<PathBuf> {
        let resolved = self.resolve_container(container_path)?;
        let relative = resolved
            .strip_prefix(&self.container_workdir)
            .map_err(|_| SandboxError::path_traversal(&resolved, &self.container_workdir))?;
        Ok(join_relative(&self.host_workspace, relative))
    }

    /// Translate a host path under the workspace to its container location.
    pub fn to_container_path(&self, host_path: &Path) -> Result<PathBuf> {
        let resolved = ensure_within(host_path, &self.host_workspace, &self.host_workspace)?;
        let relative = resolved
            .strip_prefix(&self.host_workspace)
            .map_err(|_| SandboxError::path_traversal(&resolved, &self.host_workspace))?;
        Ok(join_relative(&self.container_workdir, relative))
    }

    fn running(&self) -> Option<RunningContainer> {
        self.container
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn container_name(&self) -> String {
        let short: String = self
            .sandbox_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(12)
            .collect();
        format!("agentbox-{short}")
    }

    fn build_container_config(&self) -> Result<ContainerConfig<String>> {
        let workspace = self
            .host_workspace
            .to_str()
            .ok_or_else(|| SandboxError::config("Workspace path is not valid UTF-8"))?;

        let mut binds = vec![format!(
            "{}:{}:rw",
            workspace,
            self.container_workdir.display()
        )];
        for mount in &self.mounts {
            let host_path = expand_path(&mount.host)?;
            let mode = if mount.readonly { "ro" } else { "rw" };
            binds.push(format!(
                "{}:{}:{}",
                host_path.display(),
                mount.container,
                mode
            ));
        }

        let env: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let labels = HashMap::from([(SANDBOX_LABEL.to_string(), self.sandbox_id.clone())]);

        Ok(ContainerConfig {
            image: Some(self.image.clone()),
            working_dir: Some(self.container_workdir.to_string_lossy().into_owned()),
            // Keep the container alive between execs.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: (!env.is_empty()).then_some(env),
            labels: Some(labels),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(binds),
                memory: Some(self.memory_bytes),
                nano_cpus: Some(self.nano_cpus),
                network_mode: Some(self.network.docker_mode().to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn ensure_image(&self, docker: &Docker) -> Result<()> {
        if docker.inspect_image(&self.image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image {}", self.image);
        let mut stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: self.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                return Err(SandboxError::container_failed(format!(
                    "Failed to pull image {}: {e}",
                    self.image
                )));
            }
        }
        Ok(())
    }

    /// Runs a command in the container without output post-processing.
    async fn exec_raw(
        &self,
        command: &str,
        workdir: &Path,
        env: &[(String, String)],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let running = self.running().ok_or_else(|| {
            SandboxError::container_failed("Container has not been initialized")
        })?;
        debug!(command, container = %running.name, "docker exec");
        let started = Instant::now();

        let exec = running
            .docker
            .create_exec(
                &running.id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        wrap_with_timeout(command, timeout),
                    ]),
                    env: (!env.is_empty())
                        .then(|| env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
                    working_dir: Some(workdir.to_string_lossy().into_owned()),
                    attach_stdin: Some(stdin.is_some()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::container_failed(format!("Failed to create exec: {e}")))?;

        let StartExecResults::Attached {
            output: mut stream,
            mut input,
        } = running
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::container_failed(format!("Failed to start exec: {e}")))?
        else {
            return Err(SandboxError::container_failed(
                "Exec started detached unexpectedly",
            ));
        };

        if let Some(data) = stdin {
            if let Err(e) = input.write_all(data.as_bytes()).await {
                debug!("stdin write ended early: {}", e);
            }
            let _ = input.shutdown().await;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let collect = async {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Error reading exec output: {}", e);
                        break;
                    }
                }
            }
        };
        let finished = tokio::time::timeout(timeout + EXEC_TIMEOUT_GRACE, collect)
            .await
            .is_ok();

        let duration = started.elapsed();
        let exit_code = if finished {
            running
                .docker
                .inspect_exec(&exec.id)
                .await
                .ok()
                .and_then(|inspect| inspect.exit_code)
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or(-1)
        } else {
            TIMEOUT_EXIT_CODE
        };
        let timed_out = !finished || (exit_code == TIMEOUT_EXIT_CODE && duration >= timeout);
        if timed_out {
            warn!(command, "Container command timed out");
        }

        Ok(RawOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration,
        })
    }
}

fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Enforce the timeout inside the container, where the process tree lives.
fn wrap_with_timeout(command: &str, timeout: Duration) -> String {
    format!(
        "timeout -s KILL {} sh -c {}",
        timeout.as_secs().max(1),
        shell_words::quote(command)
    )
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();
    let invalid = || SandboxError::config(format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(|_| invalid())?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(|_| invalid())?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(|_| invalid())
    }
}

#[async_trait]
impl ExecutionEnvironment for DockerEnvironment {
    async fn initialize(&self) -> Result<()> {
        if self.running().is_some() {
            return Ok(());
        }

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;

        tokio::fs::create_dir_all(&self.host_workspace)
            .await
            .map_err(|e| {
                SandboxError::io(
                    format!(
                        "Failed to create workspace: {}",
                        self.host_workspace.display()
                    ),
                    e,
                )
            })?;
        self.ensure_image(&docker).await?;

        let name = self.container_name();
        debug!("Creating container: {}", name);
        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                self.build_container_config()?,
            )
            .await
            .map_err(|e| {
                SandboxError::container_failed(format!("Failed to create container: {e}"))
            })?;

        debug!("Starting container");
        if let Err(e) = docker.start_container::<String>(&created.id, None).await {
            let _ = docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(SandboxError::container_failed(format!(
                "Failed to start container: {e}"
            )));
        }

        info!(container = %name, image = %self.image, "Sandbox container started");
        *self.container.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunningContainer {
            docker,
            name,
            id: created.id,
        });
        Ok(())
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        let timeout = effective_timeout(&opts, self.default_timeout);
        let workdir = match opts.cwd.as_deref() {
            Some(dir) => self.resolve_container(dir)?,
            None => self.container_workdir.clone(),
        };
        let raw = self
            .exec_raw(command, &workdir, &opts.env, opts.stdin.as_deref(), timeout)
            .await?;
        Ok(raw.into_exec_result(timeout, self.max_output_chars))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let host = self.to_host_path(path)?;
        // Symlinks in the bind mount resolve on the host, so confine the target.
        ensure_canonical_within(&host, &self.host_workspace).await?;
        if self.restrict_reads {
            ensure_not_symlink(&host).await?;
        }
        let bytes = tokio::fs::read(&host).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::not_found(path)
            } else {
                SandboxError::io(format!("Failed to read {path}"), e)
            }
        })?;
        if is_binary(&bytes) {
            return Err(SandboxError::binary_content(path));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let host = self.to_host_path(path)?;
        let host = ensure_canonical_within(&host, &self.host_workspace).await?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SandboxError::io(format!("Failed to create directory: {}", parent.display()), e)
            })?;
        }
        tokio::fs::write(&host, content)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to write {path}"), e))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let host = self.to_host_path(path)?;
        let host = ensure_canonical_within(&host, &self.host_workspace).await?;
        tokio::fs::try_exists(&host)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to inspect {path}"), e))
    }

    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>> {
        let root = match opts.cwd.as_deref() {
            Some(dir) => self.resolve_container(dir)?,
            None => self.container_workdir.clone(),
        };
        let cmd = find_command(
            &root.to_string_lossy(),
            pattern,
            &opts.ignore,
            MAX_GLOB_RESULTS,
        );
        let raw = self
            .exec_raw(&cmd, &self.container_workdir, &[], None, self.default_timeout)
            .await?;
        let mut paths: Vec<String> = String::from_utf8_lossy(&raw.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        paths.sort();
        paths.truncate(MAX_GLOB_RESULTS);
        Ok(paths)
    }

    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<SearchMatch>> {
        let root = match opts.cwd.as_deref() {
            Some(dir) => self.resolve_container(dir)?,
            None => self.container_workdir.clone(),
        };
        let cmd = grep_command(&root.to_string_lossy(), pattern, &opts);
        let raw = self
            .exec_raw(&cmd, &self.container_workdir, &[], None, self.default_timeout)
            .await?;
        let matches = parse_search_output(
            &String::from_utf8_lossy(&raw.stdout),
            opts.context_lines.unwrap_or(0) > 0,
        );
        Ok(cap_matches(
            matches,
            opts.max_results.unwrap_or(DEFAULT_MAX_GREP_RESULTS),
        ))
    }

    async fn destroy(&self) -> Result<()> {
        let Some(running) = self
            .container
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        debug!("Removing container {}", running.name);
        running
            .docker
            .remove_container(
                &running.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                SandboxError::container_failed(format!(
                    "Failed to remove container {}: {e}",
                    running.name
                ))
            })
    }

    fn cwd(&self) -> String {
        self.container_workdir.to_string_lossy().into_owned()
    }

    fn info(&self) -> EnvironmentInfo {
        let running = self.running();
        EnvironmentInfo {
            kind: EnvironmentKind::Docker,
            cwd: self.cwd(),
            sandbox_id: running.as_ref().map(|r| r.name.clone()),
            container_id: running.map(|r| r.id),
        }
    }

    fn host_path(&self, path: &str) -> Result<PathBuf> {
        self.to_host_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DockerConfig;

    fn env_for(workspace: &str) -> DockerEnvironment {
        let config = SandboxConfig {
            env: EnvironmentKind::Docker,
            docker: DockerConfig {
                workspace_dir: Some(workspace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        DockerEnvironment::from_config("3f2a9c1e-77aa-4bcd-9e01-1234567890ab", &config).unwrap()
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
        assert!(parse_memory_limit("lots").unwrap_err().is_config());
    }

    #[test]
    fn test_to_host_path() {
        let env = env_for("/srv/project");
        assert_eq!(
            env.to_host_path("/workspace/src/main.rs").unwrap(),
            PathBuf::from("/srv/project/src/main.rs")
        );
        assert_eq!(
            env.to_host_path("src/main.rs").unwrap(),
            PathBuf::from("/srv/project/src/main.rs")
        );
        assert_eq!(
            env.to_host_path("/workspace").unwrap(),
            PathBuf::from("/srv/project")
        );
    }

    #[test]
    fn test_to_container_path() {
        let env = env_for("/srv/project");
        assert_eq!(
            env.to_container_path(Path::new("/srv/project/a/b.txt"))
                .unwrap(),
            PathBuf::from("/workspace/a/b.txt")
        );
        assert_eq!(
            env.to_container_path(Path::new("/srv/project")).unwrap(),
            PathBuf::from("/workspace")
        );
    }

    #[test]
    fn test_translation_round_trips() {
        let env = env_for("/srv/project");
        for host in ["/srv/project", "/srv/project/a", "/srv/project/a/b/c.rs"] {
            let container = env.to_container_path(Path::new(host)).unwrap();
            let back = env.to_host_path(&container.to_string_lossy()).unwrap();
            assert_eq!(back, PathBuf::from(host));
        }
        for container in ["/workspace", "/workspace/x/y.txt"] {
            let host = env.to_host_path(container).unwrap();
            let back = env.to_container_path(&host).unwrap();
            assert_eq!(back, PathBuf::from(container));
        }
    }

    #[test]
    fn test_translation_rejects_traversal() {
        let env = env_for("/srv/project");
        assert!(env.to_host_path("../etc/passwd").unwrap_err().is_traversal());
        assert!(env
            .to_host_path("/workspace/../etc/passwd")
            .unwrap_err()
            .is_traversal());
        assert!(env.to_host_path("/etc/passwd").unwrap_err().is_traversal());
        assert!(env.to_host_path("/workspace2/x").unwrap_err().is_traversal());
        assert!(env
            .to_container_path(Path::new("/srv/project/../secrets"))
            .unwrap_err()
            .is_traversal());
        assert!(env
            .to_container_path(Path::new("/srv/projects/x"))
            .unwrap_err()
            .is_traversal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_ops_reject_symlinks_out_of_workspace() {
        let workspace = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "HOST SECRET").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            workspace.path().join("link"),
        )
        .unwrap();
        std::os::unix::fs::symlink(outside.path(), workspace.path().join("out")).unwrap();
        std::fs::write(workspace.path().join("ok.txt"), "fine").unwrap();

        let env = env_for(&workspace.path().to_string_lossy());

        let err = env.read_file("/workspace/link").await.unwrap_err();
        assert!(err.is_traversal());
        let err = env.read_file("out/secret.txt").await.unwrap_err();
        assert!(err.is_traversal());
        assert!(env
            .file_exists("/workspace/out/secret.txt")
            .await
            .unwrap_err()
            .is_traversal());

        assert_eq!(env.read_file("/workspace/ok.txt").await.unwrap(), "fine");
        assert!(env.file_exists("ok.txt").await.unwrap());
    }

    #[test]
    fn test_info_before_initialize() {
        let env = env_for("/srv/project");
        let info = env.info();
        assert_eq!(info.kind, EnvironmentKind::Docker);
        assert_eq!(info.cwd, "/workspace");
        assert!(info.sandbox_id.is_none());
        assert!(info.container_id.is_none());
    }

    #[tokio::test]
    async fn test_destroy_without_container_is_noop() {
        let env = env_for("/srv/project");
        assert!(env.destroy().await.is_ok());
        assert!(env.destroy().await.is_ok());
    }

    #[tokio::test]
    async fn test_exec_before_initialize_fails() {
        let env = env_for("/srv/project");
        let err = env.exec("true", ExecOptions::default()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ContainerFailed { .. }));
    }

    #[test]
    fn test_container_config() {
        let config = SandboxConfig {
            env: EnvironmentKind::Docker,
            docker: DockerConfig {
                workspace_dir: Some("/srv/project".to_string()),
                network: NetworkMode::None,
                env: BTreeMap::from([("CI".to_string(), "1".to_string())]),
                ..Default::default()
            },
            ..Default::default()
        };
        let env = DockerEnvironment::from_config("sb-1", &config).unwrap();
        let container = env.build_container_config().unwrap();
        let host = container.host_config.unwrap();

        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(
            host.binds.unwrap()[0],
            "/srv/project:/workspace:rw".to_string()
        );
        assert_eq!(host.nano_cpus, Some(2_000_000_000));
        assert_eq!(container.env, Some(vec!["CI=1".to_string()]));
        assert_eq!(container.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(
            container.labels.unwrap().get(SANDBOX_LABEL).map(String::as_str),
            Some("sb-1")
        );
    }

    #[test]
    fn test_container_name_is_docker_safe() {
        let env = env_for("/srv/project");
        assert_eq!(env.container_name(), "agentbox-3f2a9c1e77aa");
    }

    #[test]
    fn test_relative_container_workdir_rejected() {
        let config = SandboxConfig {
            docker: DockerConfig {
                workspace_dir: Some("/srv/project".to_string()),
                container_workdir: "workspace".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = DockerEnvironment::from_config("sb", &config).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_wrap_with_timeout() {
        assert_eq!(
            wrap_with_timeout("echo 'hi'", Duration::from_secs(30)),
            r#"timeout -s KILL 30 sh -c 'echo '\''hi'\'''"#
        );
    }
}
