//! Activation script synthesis.
//!
//! A sourced activation script puts the bin directory of a channel release
//! on `PATH`. When a release is already available locally it refreshes the
//! channel in background; otherwise it updates in foreground first. Output
//! is a pure function of its inputs so that regenerated scripts compare
//! byte-equal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use trdl_core::error::TrdlError;
use trdl_core::fs::murmur_hash;
use trdl_core::Channel;

/// Base name of a generated script.
const SCRIPT_BASENAME: &str = "source_script";

/// Target shell of an activation script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// POSIX sh compatible shells.
    Unix,
    /// PowerShell.
    Pwsh,
}

impl Shell {
    /// `pwsh` on Windows, `unix` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Shell::Pwsh
        } else {
            Shell::Unix
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shell::Unix => "unix",
            Shell::Pwsh => "pwsh",
        }
    }

    fn extension(&self) -> Option<&'static str> {
        match self {
            Shell::Unix => None,
            Shell::Pwsh => Some("ps1"),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shell {
    type Err = TrdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unix" => Ok(Shell::Unix),
            "pwsh" => Ok(Shell::Pwsh),
            _ => Err(TrdlError::InvalidArgument(format!(
                "unsupported shell {s:?} specified, use one of the following: \"unix\", \"pwsh\""
            ))),
        }
    }
}

/// Options baked into a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UseOptions {
    pub no_self_update: bool,
}

impl UseOptions {
    /// Suffix distinguishing non-default option sets.
    fn hash_suffix(&self) -> Option<String> {
        self.no_self_update
            .then(|| murmur_hash(&[&format!("{{NoSelfUpdate:{}}}", self.no_self_update)]))
    }
}

/// Everything a script depends on.
#[derive(Debug, Clone)]
pub struct ActivationScript<'a> {
    /// Agent executable the script calls back into.
    pub agent: &'a Path,
    pub repo: &'a str,
    pub group: &'a str,
    pub channel: Channel,
    pub shell: Shell,
    pub opts: UseOptions,
    /// Directory for background update logs.
    pub logs_dir: &'a Path,
}

impl ActivationScript<'_> {
    /// Script file name, e.g. `source_script`, `source_script_<hash>.ps1`.
    pub fn file_name(&self) -> String {
        let mut name = SCRIPT_BASENAME.to_string();
        if let Some(suffix) = self.opts.hash_suffix() {
            name.push('_');
            name.push_str(&suffix);
        }
        if let Some(ext) = self.shell.extension() {
            name.push('.');
            name.push_str(ext);
        }
        name
    }

    /// Prefix of the background log files.
    fn log_basename(&self) -> String {
        let mut name = format!("use_{}_{}_{}", self.group, self.channel, self.shell);
        if let Some(suffix) = self.opts.hash_suffix() {
            name.push('_');
            name.push_str(&suffix);
        }
        name
    }

    pub fn stdout_log_path(&self) -> PathBuf {
        self.logs_dir
            .join(format!("{}_background_update_stdout.log", self.log_basename()))
    }

    pub fn stderr_log_path(&self) -> PathBuf {
        self.logs_dir
            .join(format!("{}_background_update_stderr.log", self.log_basename()))
    }

    /// Name of the variable recording the active group and channel.
    fn env_name(&self) -> String {
        let mut formatted = String::with_capacity(self.repo.len());
        let mut in_run = false;
        for c in self.repo.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                formatted.push(c.to_ascii_uppercase());
                in_run = false;
            } else if !in_run {
                formatted.push('_');
                in_run = true;
            }
        }
        format!("TRDL_USE_{formatted}_GROUP_CHANNEL")
    }

    /// Render the script text.
    pub fn render(&self) -> String {
        let common_args = format!("{} {} {}", self.repo, self.group, self.channel);
        let mut foreground_args = common_args.clone();
        let mut background_args = format!(
            "{common_args} --in-background --background-stdout-file={} --background-stderr-file={}",
            quote(&self.stdout_log_path().to_string_lossy()),
            quote(&self.stderr_log_path().to_string_lossy()),
        );
        if self.opts.no_self_update {
            foreground_args.push_str(" --no-self-update");
            background_args.push_str(" --no-self-update");
        }

        let stderr_log = quote(&self.stderr_log_path().to_string_lossy());
        let agent = self.agent.to_string_lossy();
        let env_name = self.env_name();
        let env_value = format!("{} {}", self.group, self.channel);

        let script = match self.shell {
            Shell::Unix => {
                let agent = quote(&agent);
                format!(
                    r#"
if [ -s {stderr_log} ]; then
   echo Previous run of "trdl update" in background generated following errors:
   cat {stderr_log}
fi

if trdl_repo_bin_path="$({agent} bin-path {common_args} 2>/dev/null)"; then
   {agent} update {background_args}
else
   {agent} update {foreground_args}
   trdl_repo_bin_path="$({agent} bin-path {common_args})"
fi

export {env_name}="{env_value}"

export PATH="$trdl_repo_bin_path${{PATH:+:${{PATH}}}}"
"#
                )
            }
            Shell::Pwsh => format!(
                r#"
if (Test-Path {stderr_log} -PathType Leaf) {{
  $trdlStderrLog = Get-Content {stderr_log}
  if (!([String]::IsNullOrWhiteSpace($trdlStderrLog))) {{
    'Previous run of "trdl update" in background generated following errors:'
    $trdlStderrLog
  }}
}}

if ((Invoke-Expression -Command "{agent} bin-path {common_args}" 2> $null | Out-String -OutVariable trdlRepoBinPath) -and ($LastExitCode -eq 0)) {{
   {agent} update {background_args}
}} else {{
   {agent} update {foreground_args}
   $trdlRepoBinPath = {agent} bin-path {common_args}
}}

[System.Environment]::SetEnvironmentVariable('{env_name}','{env_value}',[System.EnvironmentVariableTarget]::Process);

$trdlRepoBinPath = $trdlRepoBinPath.Trim()
$oldPath = [System.Environment]::GetEnvironmentVariable('PATH',[System.EnvironmentVariableTarget]::Process)
$newPath = "$trdlRepoBinPath;$oldPath"
[System.Environment]::SetEnvironmentVariable('Path',$newPath,[System.EnvironmentVariableTarget]::Process);
"#
            ),
        };

        format!("{}\n", script.trim())
    }
}

/// Double-quote `s`, escaping quotes, backslashes and control characters.
fn quote(s: &str) -> String {
    format!("{s:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script<'a>(shell: Shell, opts: UseOptions, logs: &'a Path) -> ActivationScript<'a> {
        ActivationScript {
            agent: Path::new("/usr/local/bin/trdl"),
            repo: "werf",
            group: "1.2",
            channel: Channel::Stable,
            shell,
            opts,
            logs_dir: logs,
        }
    }

    #[test]
    fn test_shell_parse() {
        assert_eq!("unix".parse::<Shell>().unwrap(), Shell::Unix);
        assert_eq!("pwsh".parse::<Shell>().unwrap(), Shell::Pwsh);
        assert!(matches!(
            "fish".parse::<Shell>().unwrap_err(),
            TrdlError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_file_names() {
        let logs = Path::new("/logs");
        assert_eq!(
            script(Shell::Unix, UseOptions::default(), logs).file_name(),
            "source_script"
        );
        assert_eq!(
            script(Shell::Pwsh, UseOptions::default(), logs).file_name(),
            "source_script.ps1"
        );

        let hash = murmur_hash(&["{NoSelfUpdate:true}"]);
        let opts = UseOptions {
            no_self_update: true,
        };
        assert_eq!(
            script(Shell::Unix, opts, logs).file_name(),
            format!("source_script_{hash}")
        );
        assert_eq!(
            script(Shell::Pwsh, opts, logs).file_name(),
            format!("source_script_{hash}.ps1")
        );
    }

    #[test]
    fn test_log_paths() {
        let logs = Path::new("/home/u/.trdl/logs/repositories/werf");
        let s = script(Shell::Unix, UseOptions::default(), logs);
        assert_eq!(
            s.stdout_log_path(),
            logs.join("use_1.2_stable_unix_background_update_stdout.log")
        );
        assert_eq!(
            s.stderr_log_path(),
            logs.join("use_1.2_stable_unix_background_update_stderr.log")
        );
    }

    #[test]
    fn test_render_unix() {
        let logs = Path::new("/logs");
        let text = script(Shell::Unix, UseOptions::default(), logs).render();

        assert!(text.starts_with("if [ -s \"/logs/use_1.2_stable_unix_background_update_stderr.log\" ]; then\n"));
        assert!(text.ends_with("export PATH=\"$trdl_repo_bin_path${PATH:+:${PATH}}\"\n"));
        assert!(text.contains(
            "if trdl_repo_bin_path=\"$(\"/usr/local/bin/trdl\" bin-path werf 1.2 stable 2>/dev/null)\"; then\n"
        ));
        assert!(text.contains(
            "   \"/usr/local/bin/trdl\" update werf 1.2 stable --in-background \
             --background-stdout-file=\"/logs/use_1.2_stable_unix_background_update_stdout.log\" \
             --background-stderr-file=\"/logs/use_1.2_stable_unix_background_update_stderr.log\"\n"
        ));
        assert!(text.contains("   \"/usr/local/bin/trdl\" update werf 1.2 stable\n"));
        assert!(text.contains("export TRDL_USE_WERF_GROUP_CHANNEL=\"1.2 stable\"\n"));
        assert!(!text.contains("--no-self-update"));
    }

    #[test]
    fn test_render_pwsh() {
        let logs = Path::new("/logs");
        let text = script(Shell::Pwsh, UseOptions::default(), logs).render();

        assert!(text.starts_with("if (Test-Path \"/logs/use_1.2_stable_pwsh_background_update_stderr.log\" -PathType Leaf) {\n"));
        assert!(text.contains("-Command \"/usr/local/bin/trdl bin-path werf 1.2 stable\""));
        assert!(text.contains(
            "[System.Environment]::SetEnvironmentVariable('TRDL_USE_WERF_GROUP_CHANNEL','1.2 stable',[System.EnvironmentVariableTarget]::Process);"
        ));
        assert!(text.ends_with("[System.Environment]::SetEnvironmentVariable('Path',$newPath,[System.EnvironmentVariableTarget]::Process);\n"));
    }

    #[test]
    fn test_render_no_self_update() {
        let logs = Path::new("/logs");
        let opts = UseOptions {
            no_self_update: true,
        };
        let text = script(Shell::Unix, opts, logs).render();
        assert_eq!(text.matches("--no-self-update").count(), 2);
        assert!(text.contains("   \"/usr/local/bin/trdl\" update werf 1.2 stable --no-self-update\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let logs = Path::new("/logs");
        let a = script(Shell::Unix, UseOptions::default(), logs).render();
        let b = script(Shell::Unix, UseOptions::default(), logs).render();
        assert_eq!(a, b);
    }

    #[test]
    fn test_env_name_sanitizes_repo() {
        let logs = Path::new("/logs");
        let mut s = script(Shell::Unix, UseOptions::default(), logs);
        s.repo = "my-repo.v2__x";
        assert_eq!(s.env_name(), "TRDL_USE_MY_REPO_V2__X_GROUP_CHANNEL");

        s.repo = "a--b";
        assert_eq!(s.env_name(), "TRDL_USE_A_B_GROUP_CHANNEL");
    }
}
