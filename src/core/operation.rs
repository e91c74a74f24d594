//! Idempotent host operations and the commands that realize them

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Package manager available on the hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Yum,
    Apt,
}

/// Host port to container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A single operation run against a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    EnsurePackageInstalled {
        package: String,
    },
    EnsureServiceRunning {
        service: String,
    },
    TransferFile {
        contents: String,
        remote_path: String,
        mode: Option<u32>,
    },
    /// Set the first line matching `pattern` to `line`, appending when none match
    EditTextInPlace {
        path: String,
        pattern: String,
        line: String,
    },
    /// Run a command in a disposable container with `host_dir` mounted as workdir
    RunContainerizedCommand {
        image: String,
        host_dir: String,
        command: String,
    },
    BuildContainerImage {
        context_dir: String,
        tag: String,
        build_args: Vec<(String, String)>,
    },
    PushContainerImage {
        image: String,
    },
    /// Replace any container with the same name
    RunContainer {
        name: String,
        image: String,
        ports: Vec<PortMapping>,
    },
    RemoveContainer {
        name: String,
    },
    RemoveImage {
        image: String,
    },
}

impl Operation {
    /// Kind name used in plans and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::EnsurePackageInstalled { .. } => "ensure-package-installed",
            Operation::EnsureServiceRunning { .. } => "ensure-service-running",
            Operation::TransferFile { .. } => "transfer-file",
            Operation::EditTextInPlace { .. } => "edit-text-in-place",
            Operation::RunContainerizedCommand { .. } => "run-containerized-command",
            Operation::BuildContainerImage { .. } => "build-container-image",
            Operation::PushContainerImage { .. } => "push-container-image",
            Operation::RunContainer { .. } => "run-container",
            Operation::RemoveContainer { .. } => "remove-container",
            Operation::RemoveImage { .. } => "remove-image",
        }
    }
}

/// An operation with the label it is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub label: String,
    pub operation: Operation,
}

impl PlannedOperation {
    pub fn new(label: impl Into<String>, operation: Operation) -> Self {
        Self {
            label: label.into(),
            operation,
        }
    }
}

/// Renders operations into shell commands for a host
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    /// Run privileged commands through `sudo`
    pub sudo: bool,
    /// Container runtime binary
    pub docker_binary: String,
    pub package_manager: PackageManager,
}

impl Default for CommandRenderer {
    fn default() -> Self {
        Self {
            sudo: true,
            docker_binary: "docker".to_string(),
            package_manager: PackageManager::Yum,
        }
    }
}

impl CommandRenderer {
    pub fn new(sudo: bool, docker_binary: impl Into<String>, package_manager: PackageManager) -> Self {
        Self {
            sudo,
            docker_binary: docker_binary.into(),
            package_manager,
        }
    }

    fn privileged(&self, command: &str) -> String {
        if self.sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        }
    }

    /// Container runtime invocation, e.g. `sudo docker`
    pub fn docker(&self) -> String {
        self.privileged(&self.docker_binary)
    }

    /// Shell command for an operation.
    ///
    /// `EditTextInPlace` and `TransferFile` are handled by the executor and
    /// return `None`.
    pub fn render(&self, operation: &Operation) -> Option<String> {
        let docker = self.docker();
        let command = match operation {
            Operation::EnsurePackageInstalled { package } => {
                let pkg = shell_quote(package);
                match self.package_manager {
                    PackageManager::Yum => format!(
                        "rpm -q {pkg} >/dev/null 2>&1 || {}",
                        self.privileged(&format!("yum install -y {pkg}"))
                    ),
                    PackageManager::Apt => format!(
                        "dpkg -s {pkg} >/dev/null 2>&1 || ({} && {})",
                        self.privileged("apt-get update -q"),
                        self.privileged(&format!(
                            "env DEBIAN_FRONTEND=noninteractive apt-get install -y {pkg}"
                        ))
                    ),
                }
            }
            Operation::EnsureServiceRunning { service } => {
                let svc = shell_quote(service);
                format!(
                    "{} || {}",
                    self.privileged(&format!("systemctl is-active --quiet {svc}")),
                    self.privileged(&format!("systemctl enable --now {svc}"))
                )
            }
            Operation::RunContainerizedCommand {
                image,
                host_dir,
                command,
            } => format!(
                "{docker} run --rm --entrypoint sh -v {}:/workspace -w /workspace {} -c {}",
                shell_quote(host_dir),
                shell_quote(image),
                shell_quote(command)
            ),
            Operation::BuildContainerImage {
                context_dir,
                tag,
                build_args,
            } => {
                let mut command = format!("{docker} build -t {}", shell_quote(tag));
                for (key, value) in build_args {
                    command.push_str(&format!(" --build-arg {}", shell_quote(&format!("{key}={value}"))));
                }
                command.push(' ');
                command.push_str(&shell_quote(context_dir));
                command
            }
            Operation::PushContainerImage { image } => {
                format!("{docker} push {}", shell_quote(image))
            }
            Operation::RunContainer { name, image, ports } => {
                let name = shell_quote(name);
                let mut command = format!(
                    "{} && {docker} run -d --name {name} --restart unless-stopped",
                    self.remove_container(&name)
                );
                for port in ports {
                    command.push_str(&format!(" -p {}", port));
                }
                command.push(' ');
                command.push_str(&shell_quote(image));
                command
            }
            Operation::RemoveContainer { name } => self.remove_container(&shell_quote(name)),
            Operation::RemoveImage { image } => {
                let image = shell_quote(image);
                format!(
                    "if {docker} image inspect {image} >/dev/null 2>&1; then {docker} rmi -f {image}; fi"
                )
            }
            Operation::TransferFile { .. } | Operation::EditTextInPlace { .. } => return None,
        };
        Some(command)
    }

    fn remove_container(&self, quoted_name: &str) -> String {
        let docker = self.docker();
        format!(
            "if {docker} container inspect {quoted_name} >/dev/null 2>&1; then {docker} rm -f {quoted_name}; fi"
        )
    }

    /// Command that writes stdin to `remote_path`
    pub fn write_file(&self, remote_path: &str, mode: Option<u32>) -> String {
        let path = shell_quote(remote_path);
        let mut command = format!("{} >/dev/null", self.privileged(&format!("tee {path}")));
        if let Some(mode) = mode {
            command.push_str(&format!(" && {}", self.privileged(&format!("chmod {:o} {path}", mode))));
        }
        command
    }

    /// Command that prints a file, or nothing when it does not exist
    pub fn read_file(&self, remote_path: &str) -> String {
        let path = shell_quote(remote_path);
        format!(
            "if {}; then {}; fi",
            self.privileged(&format!("test -f {path}")),
            self.privileged(&format!("cat {path}"))
        )
    }
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Replace the first line matching `pattern` with `line`, or append `line`
/// unless an identical line is already present.
///
/// Returns the new content; equal to the input when nothing changes.
/// Line endings of the input are kept.
pub fn ensure_line(content: &str, pattern: &Regex, line: &str) -> String {
    let mut offset = 0;
    for raw in content.split_inclusive('\n') {
        let (text, ending) = split_line_ending(raw);
        if pattern.is_match(text) {
            if text == line {
                return content.to_string();
            }
            let mut updated = String::with_capacity(content.len() + line.len());
            updated.push_str(&content[..offset]);
            updated.push_str(line);
            updated.push_str(ending);
            updated.push_str(&content[offset + raw.len()..]);
            return updated;
        }
        offset += raw.len();
    }

    if content
        .split_inclusive('\n')
        .any(|raw| split_line_ending(raw).0 == line)
    {
        return content.to_string();
    }

    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push_str(newline);
    }
    updated.push_str(line);
    updated.push_str(newline);
    updated
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(text) = raw.strip_suffix("\r\n") {
        (text, "\r\n")
    } else if let Some(text) = raw.strip_suffix('\n') {
        (text, "\n")
    } else {
        (raw, "")
    }
}
