//! Test doubles for tmux.
//!
//! [`FakeTmux`] implements [`TmuxCommandRunner`] for the one-shot commands the
//! registry and metadata store issue, with tmux's own error texts.
//! [`install_control_script`] writes a shell script that speaks enough
//! control mode to stand in for `tmux -C attach-session`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeSession {
    pub created: i64,
    pub attached: u32,
    pub path: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    sessions: BTreeMap<String, FakeSession>,
    failing_keys: BTreeSet<String>,
    calls: Vec<Vec<String>>,
    clock: i64,
}

#[derive(Debug, Default)]
pub struct FakeTmux {
    state: Mutex<State>,
}

impl FakeTmux {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                clock: 1_700_000_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Add a session as if another client had created it.
    pub fn insert(&self, name: &str, session: FakeSession) {
        self.state().sessions.insert(name.to_string(), session);
    }

    pub fn session(&self, name: &str) -> Option<FakeSession> {
        self.state().sessions.get(name).cloned()
    }

    pub fn session_names(&self) -> Vec<String> {
        self.state().sessions.keys().cloned().collect()
    }

    pub fn set_attached(&self, name: &str, attached: u32) {
        if let Some(session) = self.state().sessions.get_mut(name) {
            session.attached = attached;
        }
    }

    pub fn remove(&self, name: &str) {
        self.state().sessions.remove(name);
    }

    /// Make `set-environment` fail for `key`.
    pub fn fail_key(&self, key: &str) {
        self.state().failing_keys.insert(key.to_string());
    }

    /// Every command run so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }
}

fn failed(args: &[&str], output: impl Into<String>) -> TmuxError {
    TmuxError::CommandFailed {
        command: format!("tmux {}", args.join(" ")),
        code: 1,
        output: output.into(),
    }
}

/// Value following `flag`, if any.
fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1).copied())
}

impl TmuxCommandRunner for FakeTmux {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut state = self.state();
        state.calls.push(args.iter().map(|s| s.to_string()).collect());

        let target = flag_value(args, "-t").map(|t| t.trim_start_matches('=').to_string());
        let no_server = || failed(args, "no server running on /tmp/tmux-1000/default");
        let missing = |name: &str| failed(args, format!("can't find session: {name}"));

        match args.first().copied() {
            Some("list-sessions") => {
                if state.sessions.is_empty() {
                    return Err(no_server());
                }
                let format = flag_value(args, "-F").unwrap_or("#{session_name}");
                let mut out = String::new();
                for (name, s) in &state.sessions {
                    let line = format
                        .replace("#{session_name}", name)
                        .replace("#{session_created}", &s.created.to_string())
                        .replace("#{session_attached}", &s.attached.to_string())
                        .replace("#{pane_current_path}", &s.path);
                    out.push_str(&line);
                    out.push('\n');
                }
                Ok(out)
            }
            Some("has-session") => {
                let name = target.unwrap_or_default();
                if state.sessions.is_empty() {
                    Err(no_server())
                } else if state.sessions.contains_key(&name) {
                    Ok(String::new())
                } else {
                    Err(missing(&name))
                }
            }
            Some("new-session") => {
                let name = flag_value(args, "-s").unwrap_or_default().to_string();
                if state.sessions.contains_key(&name) {
                    return Err(failed(args, format!("duplicate session: {name}")));
                }
                let mut env = BTreeMap::new();
                let mut command = Vec::new();
                let mut i = 1;
                while i < args.len() {
                    match args[i] {
                        "-d" => i += 1,
                        "-s" | "-c" => i += 2,
                        "-e" => {
                            if let Some((k, v)) = args.get(i + 1).and_then(|kv| kv.split_once('=')) {
                                env.insert(k.to_string(), v.to_string());
                            }
                            i += 2;
                        }
                        _ => {
                            command = args[i..].iter().map(|s| s.to_string()).collect();
                            break;
                        }
                    }
                }
                state.clock += 1;
                let session = FakeSession {
                    created: state.clock,
                    attached: 0,
                    path: flag_value(args, "-c").unwrap_or("/").to_string(),
                    command,
                    env,
                };
                state.sessions.insert(name, session);
                Ok(String::new())
            }
            Some("kill-session") => {
                let name = target.unwrap_or_default();
                if state.sessions.is_empty() {
                    return Err(no_server());
                }
                match state.sessions.remove(&name) {
                    Some(_) => Ok(String::new()),
                    None => Err(missing(&name)),
                }
            }
            Some("set-environment") => {
                let name = target.unwrap_or_default();
                let (key, value) = match args.len() {
                    n if n >= 2 => (args[n - 2], args[n - 1]),
                    _ => return Err(failed(args, "usage: set-environment")),
                };
                if state.failing_keys.contains(key) {
                    return Err(failed(args, "simulated failure"));
                }
                match state.sessions.get_mut(&name) {
                    Some(session) => {
                        session.env.insert(key.to_string(), value.to_string());
                        Ok(String::new())
                    }
                    None => Err(missing(&name)),
                }
            }
            Some("show-environment") => {
                let name = target.unwrap_or_default();
                let key = args.last().copied().unwrap_or_default();
                let session = state.sessions.get(&name).ok_or_else(|| missing(&name))?;
                match session.env.get(key) {
                    Some(value) => Ok(format!("{key}={value}\n")),
                    None => Err(failed(args, format!("unknown variable: {key}"))),
                }
            }
            _ => Err(failed(args, format!("unknown command: {}", args.join(" ")))),
        }
    }
}

/// Answers every command line with one response block. Attaching to a
/// session named `missing` fails the way tmux does.
pub const CONTROL_SCRIPT: &str = r#"#!/bin/sh
name="${4#=}"
if [ "$name" = "missing" ]; then
  echo "can't find session: $name" >&2
  exit 1
fi
echo '%begin 1700000000 1 0'
echo '%end 1700000000 1 0'
echo "%session-changed \$1 $name"
n=1
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    detach-client)
      echo "%begin 1700000000 $n 1"; echo "%end 1700000000 $n 1"
      echo '%exit detached'
      exit 0;;
    display-message*)
      echo "%begin 1700000000 $n 1"; echo 'b25d,80x24,0,0,1'; echo "%end 1700000000 $n 1";;
    split-window*)
      echo "%begin 1700000000 $n 1"; echo '%5'; echo "%end 1700000000 $n 1"
      echo '%layout-change @1 d3da,161x24,0,0{80x24,0,0,1,80x24,81,0,5}';;
    list-windows*)
      printf '%%begin 1700000000 %s 1\n@1\t1\td3da,161x24,0,0{80x24,0,0,1,80x24,81,0,5}\tzsh\n%%end 1700000000 %s 1\n' $n $n;;
    list-panes*)
      printf '%%begin 1700000000 %s 1\n%%1\t@1\t80\t24\t0\t0\t1\t0\t/tmp\tzsh\n%%5\t@1\t80\t24\t81\t0\t0\t0\t/tmp\tvim\n%%end 1700000000 %s 1\n' $n $n;;
    bogus*)
      echo "%begin 1700000000 $n 1"; echo "unknown command: bogus"; echo "%error 1700000000 $n 1";;
    silent*)
      ;;
    *)
      echo "%begin 1700000000 $n 1"; echo "%end 1700000000 $n 1";;
  esac
done
"#;

/// Write [`CONTROL_SCRIPT`] as an executable `tmux` in `dir`.
#[cfg(unix)]
pub fn install_control_script(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("tmux");
    std::fs::write(&path, CONTROL_SCRIPT).expect("write control script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod control script");
    path
}
