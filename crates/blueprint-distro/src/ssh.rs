//! Remote commands over the system `ssh` client
//!
//! The remote side always hands the command to a login shell, so every argv
//! element is single-quoted before it is joined. Nothing from the blueprint
//! reaches the remote shell unquoted.

use blueprint_common::blueprint::SshHost;

use crate::exec::Invocation;

/// Connection details for one remote host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshTarget {
    /// Login user
    pub user: String,
    /// Hostname or IP
    pub address: String,
    /// SSH port
    pub port: u16,
    /// Private key file
    pub key_path: String,
}

impl From<&SshHost> for SshTarget {
    fn from(host: &SshHost) -> Self {
        Self {
            user: host.user.clone(),
            address: host.address.clone(),
            port: host.port,
            key_path: host.key_path.clone(),
        }
    }
}

impl SshTarget {
    /// Build an `ssh` invocation that runs `argv` on this host
    pub fn command<S: AsRef<str>>(&self, argv: &[S]) -> Invocation {
        let remote = argv
            .iter()
            .map(|a| shell_quote(a.as_ref()))
            .collect::<Vec<_>>()
            .join(" ");

        Invocation::new("ssh")
            .args(["-i", self.key_path.as_str()])
            .arg("-p")
            .arg(self.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "ConnectTimeout=10"])
            .arg(format!("{}@{}", self.user, self.address))
            .arg("--")
            .arg(remote)
    }
}

/// Quote `arg` so a POSIX shell reads it back as one literal word
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+@%,".contains(c));
    if safe {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
