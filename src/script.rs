//! Remote command lists: the post-configuration script and the built-in
//! update, tooling, and credential hygiene sequences.

use shell_escape::unix::escape;

use crate::records::InstanceRecord;

/// Remote path the provider CLI reads credentials from.
pub const REMOTE_CREDENTIALS_PATH: &str = "~/.aws/credentials";

/// Command that triggers the post-upgrade reboot.
pub const REBOOT_COMMAND: &str = "sudo reboot";

/// Overwrite passes used when shredding credential material.
pub const SHRED_PASSES: u32 = 200;

/// Substrings marking commands that prompt for the admin password on stdin.
pub const DEFAULT_STDIN_MARKERS: [&str; 1] = ["pg_restore"];

/// Drops blank and `#`-prefixed entries from an already split command list,
/// trimming the survivors.
///
/// # Examples
///
/// ```
/// use hangar::script::filter_commands;
///
/// let commands = filter_commands(["# comment", "", "echo hi"]);
/// assert_eq!(commands, vec![String::from("echo hi")]);
/// ```
#[must_use]
pub fn filter_commands<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let trimmed = line.as_ref().trim();
            (!trimmed.is_empty() && !trimmed.starts_with('#')).then(|| trimmed.to_owned())
        })
        .collect()
}

/// Per-instance values substituted into the post-configuration script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptContext {
    /// Generated admin credential.
    pub admin_password: String,
    /// Generated read-only credential.
    pub readonly_password: String,
    /// CIDR of the VPC the instance lives in.
    pub vpc_cidr: String,
    /// Public address of the instance.
    pub public_ip: String,
    /// Private address of the instance.
    pub private_ip: String,
    /// Instance name.
    pub instance_name: String,
}

impl ScriptContext {
    /// Builds the context for `record` inside a VPC with `vpc_cidr`.
    #[must_use]
    pub fn for_record(record: &InstanceRecord, vpc_cidr: &str) -> Self {
        Self {
            admin_password: record.admin_password.clone(),
            readonly_password: record.readonly_password.clone(),
            vpc_cidr: vpc_cidr.to_owned(),
            public_ip: record.public_ip.clone(),
            private_ip: record.private_ip.clone(),
            instance_name: record.name.clone(),
        }
    }

    /// Substitutes `{admin_password}`, `{readonly_password}`, `{vpc_cidr}`,
    /// `{public_ip}`, `{private_ip}` and `{instance_name}` in `command`.
    ///
    /// Unknown braces are left untouched so shell constructs such as
    /// `${HOME}` survive rendering.
    #[must_use]
    pub fn render(&self, command: &str) -> String {
        [
            ("{admin_password}", self.admin_password.as_str()),
            ("{readonly_password}", self.readonly_password.as_str()),
            ("{vpc_cidr}", self.vpc_cidr.as_str()),
            ("{public_ip}", self.public_ip.as_str()),
            ("{private_ip}", self.private_ip.as_str()),
            ("{instance_name}", self.instance_name.as_str()),
        ]
        .into_iter()
        .fold(command.to_owned(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
    }
}

/// Package index refresh and non-interactive distribution upgrade.
#[must_use]
pub fn update_commands() -> Vec<String> {
    vec![
        String::from("sudo apt-get update -y"),
        String::from(
            "sudo DEBIAN_FRONTEND=noninteractive apt-get -y -o Dpkg::Options::=\"--force-confdef\" -o Dpkg::Options::=\"--force-confold\" dist-upgrade",
        ),
    ]
}

/// Commands that materialise `credentials` on the host.
///
/// Each line is appended to `staging_path` in the login user's home, because
/// an elevated `echo` cannot redirect into the root-owned credentials
/// directory. The staged file is then copied into place with `sudo`.
#[must_use]
pub fn credential_staging_commands(credentials: &str, staging_path: &str) -> Vec<String> {
    let mut commands = vec![String::from("sudo mkdir -p ~/.aws")];
    commands.extend(
        credentials
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("echo {} >> {staging_path}", escape(line.into()))),
    );
    commands.push(format!("sudo cp {staging_path} {REMOTE_CREDENTIALS_PATH}"));
    commands
}

/// Packages and CLI tooling installed after credentials are staged.
#[must_use]
pub fn tooling_commands() -> Vec<String> {
    vec![
        String::from(
            "sudo DEBIAN_FRONTEND=noninteractive apt-get -q -y install python3-pip python3-dev",
        ),
        String::from("sudo -H pip3 install --upgrade pip"),
        String::from("sudo -H pip3 install awscli"),
    ]
}

/// Multi-pass zero-fill delete of the staged and installed credentials.
#[must_use]
pub fn shred_commands(staging_path: &str) -> Vec<String> {
    [REMOTE_CREDENTIALS_PATH, staging_path]
        .into_iter()
        .map(|path| format!("sudo shred -n {SHRED_PASSES} -z -u {path}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn filter_skips_comments_and_blank_lines() {
        let commands =
            filter_commands("# comment\n\necho hi\n   \n  # indented comment\n  ls -la  \n".lines());
        assert_eq!(commands, vec![String::from("echo hi"), String::from("ls -la")]);
    }

    #[rstest]
    fn render_substitutes_known_placeholders_only() {
        let context = ScriptContext {
            admin_password: String::from("admin-secret"),
            readonly_password: String::from("ro-secret"),
            vpc_cidr: String::from("10.0.0.0/16"),
            public_ip: String::from("203.0.113.10"),
            private_ip: String::from("10.0.1.5"),
            instance_name: String::from("db1"),
        };
        let rendered = context.render(
            "echo {admin_password} {readonly_password} {vpc_cidr} {public_ip} {private_ip} {instance_name} ${HOME} {other}",
        );
        assert_eq!(
            rendered,
            "echo admin-secret ro-secret 10.0.0.0/16 203.0.113.10 10.0.1.5 db1 ${HOME} {other}"
        );
    }

    #[rstest]
    fn staging_appends_each_line_then_copies() {
        let commands = credential_staging_commands(
            "[default]\n\naws_access_key_id = AKIA\n",
            "~/hangar-credentials",
        );
        assert_eq!(
            commands,
            vec![
                String::from("sudo mkdir -p ~/.aws"),
                String::from("echo '[default]' >> ~/hangar-credentials"),
                String::from("echo 'aws_access_key_id = AKIA' >> ~/hangar-credentials"),
                String::from("sudo cp ~/hangar-credentials ~/.aws/credentials"),
            ]
        );
    }

    #[rstest]
    fn shred_covers_both_credential_files() {
        let commands = shred_commands("~/hangar-credentials");
        assert_eq!(
            commands,
            vec![
                String::from("sudo shred -n 200 -z -u ~/.aws/credentials"),
                String::from("sudo shred -n 200 -z -u ~/hangar-credentials"),
            ]
        );
    }
}
