//! Launch specification for a single run.
//!
//! Produced by a front-end parser and read-only to the driver, except that
//! attach flags are cleared when detaching.

use crate::attach::detach_keys;
use crate::engine::AttachOptions;
use boxrun_shared::constants::conflicts;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Container configuration sent with the create call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub open_stdin: bool,
    #[serde(default)]
    pub stdin_once: bool,
    #[serde(default)]
    pub attach_stdin: bool,
    #[serde(default)]
    pub attach_stdout: bool,
    #[serde(default)]
    pub attach_stderr: bool,
}

/// Restart policy requested for the container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    /// "", "no", "always", "on-failure" or "unless-stopped".
    pub name: String,
    #[serde(default)]
    pub maximum_retry_count: u32,
}

impl RestartPolicy {
    pub fn is_always(&self) -> bool {
        self.name == "always"
    }

    pub fn is_on_failure(&self) -> bool {
        self.name == "on-failure"
    }
}

impl FromStr for RestartPolicy {
    type Err = BoxrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, count) = match s.split_once(':') {
            Some((name, count)) => (name, Some(count)),
            None => (s, None),
        };
        match (name, count) {
            ("" | "no" | "always" | "unless-stopped", None) => Ok(Self {
                name: name.to_string(),
                maximum_retry_count: 0,
            }),
            ("on-failure", count) => {
                let maximum_retry_count = match count {
                    Some(c) => c.parse().map_err(|_| {
                        BoxrunError::InvalidArgument(format!("maximum retry count must be an integer: {}", c))
                    })?,
                    None => 0,
                };
                Ok(Self {
                    name: name.to_string(),
                    maximum_retry_count,
                })
            }
            (_, Some(_)) => Err(BoxrunError::InvalidArgument(format!(
                "maximum retry count cannot be used with restart policy '{}'",
                name
            ))),
            _ => Err(BoxrunError::InvalidArgument(format!(
                "invalid restart policy {}",
                name
            ))),
        }
    }
}

/// Host configuration sent with the create call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_mode: String,
    /// Initial `[rows, cols]` of the container console.
    #[serde(default)]
    pub console_size: [u32; 2],
    /// Local path of the CID file. Client-side only.
    #[serde(skip)]
    pub container_id_file: Option<PathBuf>,
}

/// Per-network endpoint settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Network configuration sent with the create call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkingConfig {
    #[serde(default)]
    pub endpoints_config: HashMap<String, EndpointSettings>,
}

/// A standard stream selectable with `--attach`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl FromStr for StdStream {
    type Err = BoxrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdin" => Ok(StdStream::Stdin),
            "stdout" => Ok(StdStream::Stdout),
            "stderr" => Ok(StdStream::Stderr),
            _ => Err(BoxrunError::InvalidArgument(format!(
                "valid streams are STDIN, STDOUT and STDERR, got {}",
                s
            ))),
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdStream::Stdin => f.write_str("stdin"),
            StdStream::Stdout => f.write_str("stdout"),
            StdStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Orchestration flags that are not part of the container configuration.
#[derive(Clone, Debug)]
pub struct RunFlags {
    /// Run in the background and print the container ID.
    pub detach: bool,
    /// Remove the container when it exits.
    pub auto_remove: bool,
    /// Proxy received signals to the container process.
    pub sig_proxy: bool,
    /// Container name.
    pub name: Option<String>,
    /// Per-run detach sequence override.
    pub detach_keys: Option<String>,
    /// Streams named explicitly with `--attach`.
    pub attach: Vec<StdStream>,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            detach: false,
            auto_remove: false,
            sig_proxy: true,
            name: None,
            detach_keys: None,
            attach: Vec::new(),
        }
    }
}

/// Everything needed to execute one run.
#[derive(Clone, Debug, Default)]
pub struct LaunchSpec {
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub networking_config: NetworkingConfig,
    pub flags: RunFlags,
}

impl LaunchSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            config: ContainerConfig {
                image: image.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Reject mutually exclusive options.
    pub fn validate(&self) -> BoxrunResult<()> {
        let flags = &self.flags;
        if flags.detach {
            if !flags.attach.is_empty() {
                return Err(BoxrunError::ConfigConflict(conflicts::ATTACH_DETACH.into()));
            }
            if flags.auto_remove {
                return Err(BoxrunError::ConfigConflict(
                    conflicts::DETACH_AUTO_REMOVE.into(),
                ));
            }
        }

        let restart = &self.host_config.restart_policy;
        if flags.auto_remove && (restart.is_always() || restart.is_on_failure()) {
            return Err(BoxrunError::ConfigConflict(
                conflicts::RESTART_AUTO_REMOVE.into(),
            ));
        }

        if let Some(keys) = self.detach_keys_override() {
            detach_keys::parse(keys)?;
        }
        Ok(())
    }

    /// Clear attach flags when detaching.
    pub(crate) fn normalize(&mut self) {
        if self.flags.detach {
            self.config.attach_stdin = false;
            self.config.attach_stdout = false;
            self.config.attach_stderr = false;
            self.config.stdin_once = false;
        }
    }

    /// Whether any standard stream is attached.
    pub fn attaches(&self) -> bool {
        self.config.attach_stdin || self.config.attach_stdout || self.config.attach_stderr
    }

    /// Signals are proxied only for non-tty sessions.
    pub fn proxies_signals(&self) -> bool {
        self.flags.sig_proxy && !self.config.tty
    }

    fn detach_keys_override(&self) -> Option<&str> {
        self.flags.detach_keys.as_deref().filter(|k| !k.is_empty())
    }

    /// Derive the attach view, preferring the per-run detach sequence.
    pub fn attach_options(&self, default_detach_keys: &str) -> AttachOptions {
        AttachOptions {
            stdin: self.config.attach_stdin,
            stdout: self.config.attach_stdout,
            stderr: self.config.attach_stderr,
            detach_keys: self
                .detach_keys_override()
                .unwrap_or(default_detach_keys)
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> LaunchSpec {
        let mut spec = LaunchSpec::new("alpine");
        spec.flags.detach = true;
        spec
    }

    #[test]
    fn attach_with_detach_conflicts() {
        let mut spec = detached();
        spec.flags.attach = vec![StdStream::Stdout];
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, BoxrunError::ConfigConflict(ref m) if m == conflicts::ATTACH_DETACH));
    }

    #[test]
    fn auto_remove_with_detach_conflicts() {
        let mut spec = detached();
        spec.flags.auto_remove = true;
        let err = spec.validate().unwrap_err();
        assert!(
            matches!(err, BoxrunError::ConfigConflict(ref m) if m == conflicts::DETACH_AUTO_REMOVE)
        );
    }

    #[test]
    fn auto_remove_with_restart_policy_conflicts() {
        for policy in ["always", "on-failure", "on-failure:5"] {
            let mut spec = LaunchSpec::new("alpine");
            spec.flags.auto_remove = true;
            spec.host_config.restart_policy = policy.parse().unwrap();
            let err = spec.validate().unwrap_err();
            assert!(
                matches!(err, BoxrunError::ConfigConflict(ref m) if m == conflicts::RESTART_AUTO_REMOVE),
                "policy {policy}"
            );
        }

        let mut spec = LaunchSpec::new("alpine");
        spec.flags.auto_remove = true;
        spec.host_config.restart_policy = "unless-stopped".parse().unwrap();
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn invalid_detach_keys_rejected() {
        let mut spec = LaunchSpec::new("alpine");
        spec.flags.detach_keys = Some("ctrl-".into());
        assert!(matches!(
            spec.validate(),
            Err(BoxrunError::InvalidArgument(_))
        ));
    }

    #[test]
    fn normalize_clears_attach_flags_when_detaching() {
        let mut spec = detached();
        spec.config.attach_stdin = true;
        spec.config.attach_stdout = true;
        spec.config.attach_stderr = true;
        spec.config.stdin_once = true;
        spec.normalize();
        assert!(!spec.attaches());
        assert!(!spec.config.stdin_once);
    }

    #[test]
    fn detach_key_override_wins_when_non_empty() {
        let mut spec = LaunchSpec::new("alpine");
        assert_eq!(spec.attach_options("ctrl-p,ctrl-q").detach_keys, "ctrl-p,ctrl-q");

        spec.flags.detach_keys = Some(String::new());
        assert_eq!(spec.attach_options("ctrl-p,ctrl-q").detach_keys, "ctrl-p,ctrl-q");

        spec.flags.detach_keys = Some("ctrl-x".into());
        assert_eq!(spec.attach_options("ctrl-p,ctrl-q").detach_keys, "ctrl-x");
    }

    #[test]
    fn tty_disables_signal_proxy() {
        let mut spec = LaunchSpec::new("alpine");
        assert!(spec.proxies_signals());
        spec.config.tty = true;
        assert!(!spec.proxies_signals());
    }

    #[test]
    fn restart_policy_parsing() {
        let p: RestartPolicy = "on-failure:3".parse().unwrap();
        assert!(p.is_on_failure());
        assert_eq!(p.maximum_retry_count, 3);
        assert!("always:2".parse::<RestartPolicy>().is_err());
        assert!("sometimes".parse::<RestartPolicy>().is_err());
        assert!("on-failure:x".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn config_serializes_engine_field_names() {
        let mut spec = LaunchSpec::new("alpine");
        spec.config.cmd = vec!["true".into()];
        spec.config.attach_stdout = true;
        let json = serde_json::to_value(&spec.config).unwrap();
        assert_eq!(json["Image"], "alpine");
        assert_eq!(json["Cmd"][0], "true");
        assert_eq!(json["AttachStdout"], true);
        assert!(json.get("Entrypoint").is_none());
    }
}
