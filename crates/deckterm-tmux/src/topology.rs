//! Window/pane listing formats used to refresh a control client's topology.

use deckterm_core::{MultiplexedPane, MultiplexedWindow, PaneId, WindowId};

use crate::error::TmuxError;

/// Tab-delimited format string for `list-windows -F`.
pub const LIST_WINDOWS_FORMAT: &str =
    "#{window_id}\t#{window_active}\t#{window_layout}\t#{window_name}";

/// Tab-delimited format string for `list-panes -s -F`. The title goes last
/// since it is free text.
pub const LIST_PANES_FORMAT: &str = "#{pane_id}\t#{window_id}\t#{pane_width}\t#{pane_height}\t#{pane_left}\t#{pane_top}\t#{pane_active}\t#{pane_in_mode}\t#{pane_current_path}\t#{pane_title}";

pub fn parse_list_windows_output(output: &str) -> Result<Vec<MultiplexedWindow>, TmuxError> {
    let mut windows = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(4, '\t').collect();
        if parts.len() < 4 {
            return Err(malformed(idx + 1, "list-windows", 4, parts.len()));
        }
        let id = WindowId::parse_ref(parts[0])
            .ok_or_else(|| TmuxError::Decode(format!("line {}: bad window id {:?}", idx + 1, parts[0])))?;
        windows.push(MultiplexedWindow {
            id,
            name: parts[3].to_string(),
            layout: parts[2].to_string(),
            active: parse_bool(parts[1]),
        });
    }
    Ok(windows)
}

pub fn parse_list_panes_output(output: &str) -> Result<Vec<MultiplexedPane>, TmuxError> {
    let mut panes = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(10, '\t').collect();
        if parts.len() < 10 {
            return Err(malformed(idx + 1, "list-panes", 10, parts.len()));
        }
        let (Some(id), Some(window_id)) = (PaneId::parse_ref(parts[0]), WindowId::parse_ref(parts[1]))
        else {
            return Err(TmuxError::Decode(format!(
                "line {}: bad pane/window id {:?}/{:?}",
                idx + 1,
                parts[0],
                parts[1]
            )));
        };
        panes.push(MultiplexedPane {
            id,
            window_id,
            width: parts[2].parse().unwrap_or(80),
            height: parts[3].parse().unwrap_or(24),
            x: parts[4].parse().unwrap_or(0),
            y: parts[5].parse().unwrap_or(0),
            active: parse_bool(parts[6]),
            in_mode: parse_bool(parts[7]),
            current_path: parts[8].to_string(),
            title: parts[9].to_string(),
        });
    }
    Ok(panes)
}

fn malformed(line_num: usize, command: &str, expected: usize, got: usize) -> TmuxError {
    TmuxError::Decode(format!(
        "{command} line {line_num}: expected {expected} tab-separated fields, got {got}"
    ))
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim(), "1" | "true")
}
