//! Subcommand implementations. Each builds on [`BackendFacade`].

use chrono::{DateTime, Local, Utc};

use deckterm_core::{BackendKind, RecoverableSessionInfo};
use deckterm_runtime::{BackendFacade, OpenRequest, Recovered};

use crate::cli::{KillOpts, LsOpts, OpenOpts, RecoverOpts};

pub fn cmd_detect(facade: &BackendFacade) {
    let detection = facade.detection();
    match (&detection.path, detection.available) {
        (Some(path), true) => {
            let version = detection.version.as_deref().unwrap_or("unknown version");
            println!("{} ({version})", path.display());
        }
        _ => println!("tmux not found; sessions will run as direct shells"),
    }
}

pub async fn cmd_ls(facade: &BackendFacade, opts: &LsOpts) -> anyhow::Result<()> {
    let sessions = if opts.all {
        facade.list_all().await?
    } else {
        facade.list_recoverable().await?
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    let output = format_sessions(&sessions);
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

pub async fn cmd_open(facade: &BackendFacade, opts: OpenOpts) -> anyhow::Result<()> {
    let backend = if opts.direct {
        BackendKind::Direct
    } else {
        BackendKind::Multiplexed
    };
    let session = facade
        .open(OpenRequest {
            title: opts.title,
            working_dir: opts.cwd,
            backend: Some(backend),
            ..OpenRequest::default()
        })
        .await?;

    match &session.multiplexer_name {
        Some(name) => {
            facade.close(session.id, false).await?;
            println!("{name}");
        }
        None => {
            // A direct shell does not outlive this process.
            facade.close(session.id, true).await?;
            println!("direct shell {} started and stopped", session.id);
        }
    }
    Ok(())
}

pub async fn cmd_recover(facade: &BackendFacade, opts: &RecoverOpts) -> anyhow::Result<()> {
    match facade.recover(&opts.name).await? {
        Recovered::Session(session) => {
            let snapshot = facade.session(session.id);
            facade.close(session.id, false).await?;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                let title = if session.name.is_empty() { "(untitled)" } else { session.name.as_str() };
                println!("{}  card {}  {title}", opts.name, session.id);
            }
        }
        Recovered::Foreign(info) => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{} has no card id (foreign session)", info.name);
            }
        }
    }
    Ok(())
}

pub async fn cmd_kill(facade: &BackendFacade, opts: &KillOpts) -> anyhow::Result<()> {
    facade.kill_by_name(&opts.name).await?;
    println!("killed {}", opts.name);
    Ok(())
}

fn format_sessions(sessions: &[RecoverableSessionInfo]) -> String {
    sessions
        .iter()
        .map(|s| {
            format!(
                "{:<18} {}  {:<8} {}",
                s.name,
                format_created(s.created_at),
                if s.attached { "attached" } else { "-" },
                s.current_path
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_created(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_one_line_per_session() {
        let created = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let sessions = vec![
            RecoverableSessionInfo {
                name: "deckterm-0badf00d".into(),
                short_id: "0badf00d".into(),
                created_at: created,
                attached: false,
                current_path: "/srv".into(),
            },
            RecoverableSessionInfo {
                name: "deckterm-cafebabe".into(),
                short_id: "cafebabe".into(),
                created_at: created,
                attached: true,
                current_path: "/tmp".into(),
            },
        ];
        let table = format_sessions(&sessions);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("deckterm-0badf00d"));
        assert!(lines[0].ends_with("/srv"));
        assert!(lines[1].contains("attached"));
    }

    #[test]
    fn empty_list_prints_nothing() {
        assert!(format_sessions(&[]).is_empty());
    }
}
