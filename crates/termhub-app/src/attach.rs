//! Line-oriented front end for `termhub attach`
//!
//! Every stdin line goes to the active session followed by a carriage
//! return. Lines starting with `~` are client commands; `~~` sends a literal
//! tilde.

use std::io::Write;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};

use termhub_terminal::{
    CellMetrics, ContainerSize, KeyValueStore, MemoryStore, SessionId, SessionInfo,
};
use termhub_types::{Geometry, ReadyState, DEFAULT_COLS, DEFAULT_ROWS};

use crate::client::{ClientCommand, ClientEvent, ClientRuntime};
use crate::config::ClientSettings;
use crate::storage::FileStore;

const HELP: &str = "\
~new                     open a new session
~switch N                switch to session N
~close [N]               close session N, or the active one
~reset                   replace the active session with a fresh one
~stop                    stop the active session
~list                    list sessions
~reconnect               reconnect after giving up
~endpoint PATH           attach to another endpoint
~toggle                  show or hide session output
~call NS FUNC [ARGS]     send a command frame, ARGS is a JSON array
~keys SEQ                send keys without a newline (^C, [UP], [F1], ...)
~eof                     send Ctrl-D
~~text                   send a line starting with ~
~quit                    leave";

/// A parsed stdin line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Input(String),
    Command(ClientCommand),
    Help,
    Invalid(String),
}

pub fn parse_line(line: &str) -> Line {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(escaped) = line.strip_prefix("~~") {
        return Line::Input(format!("~{}\r", escaped));
    }
    let Some(command) = line.strip_prefix('~') else {
        return Line::Input(format!("{}\r", line));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "new" => Line::Command(ClientCommand::NewSession),
        "switch" => match rest.parse() {
            Ok(position) => Line::Command(ClientCommand::Switch(position)),
            Err(_) => Line::Invalid(format!("~switch needs a session number, got '{}'", rest)),
        },
        "close" if rest.is_empty() => Line::Command(ClientCommand::Close(None)),
        "close" => match rest.parse() {
            Ok(position) => Line::Command(ClientCommand::Close(Some(position))),
            Err(_) => Line::Invalid(format!("~close takes a session number, got '{}'", rest)),
        },
        "reset" => Line::Command(ClientCommand::Reset),
        "stop" => Line::Command(ClientCommand::Stop),
        "list" | "ls" => Line::Command(ClientCommand::List),
        "reconnect" => Line::Command(ClientCommand::Reconnect),
        "endpoint" if rest.is_empty() => Line::Invalid("~endpoint needs a path".to_string()),
        "endpoint" => Line::Command(ClientCommand::Endpoint(rest.to_string())),
        "toggle" => Line::Command(ClientCommand::TogglePanel),
        "call" => parse_call(rest),
        "keys" => Line::Input(expand_keys(rest)),
        "eof" => Line::Input("\x04".to_string()),
        "quit" | "q" => Line::Command(ClientCommand::Quit),
        "help" | "?" => Line::Help,
        other => Line::Invalid(format!("Unknown command '~{}', try ~help", other)),
    }
}

fn parse_call(rest: &str) -> Line {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let (Some(namespace), Some(func_name)) = (parts.next(), parts.next()) else {
        return Line::Invalid("~call needs a namespace and a function name".to_string());
    };
    if namespace.is_empty() || func_name.is_empty() {
        return Line::Invalid("~call needs a namespace and a function name".to_string());
    }
    let args = match parts.next().map(str::trim).filter(|a| !a.is_empty()) {
        None => Vec::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(args)) => args,
            Ok(single) => vec![single],
            Err(e) => return Line::Invalid(format!("~call arguments are not JSON: {}", e)),
        },
    };
    Line::Command(ClientCommand::Call {
        namespace: namespace.to_string(),
        func_name: func_name.to_string(),
        args,
    })
}

/// Translate `^X` control notation and bracketed key names into bytes
pub fn expand_keys(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '^' => match chars.peek().copied() {
                Some(next) => {
                    let upper = next.to_ascii_uppercase();
                    let control = match upper {
                        'A'..='Z' => Some(((upper as u8) - b'A' + 1) as char),
                        '@' => Some('\x00'),
                        '[' => Some('\x1b'),
                        '\\' => Some('\x1c'),
                        ']' => Some('\x1d'),
                        '^' => Some('\x1e'),
                        '_' => Some('\x1f'),
                        _ => None,
                    };
                    chars.next();
                    match control {
                        Some(c) => result.push(c),
                        None => {
                            result.push('^');
                            result.push(next);
                        }
                    }
                }
                None => result.push('^'),
            },
            '[' => {
                let rest: String = chars.clone().collect();
                match named_key(&rest) {
                    Some((sequence, consumed)) => {
                        result.push_str(sequence);
                        for _ in 0..consumed {
                            chars.next();
                        }
                    }
                    None => result.push('['),
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Escape sequence and the number of chars it consumes after the `[`
fn named_key(input: &str) -> Option<(&'static str, usize)> {
    const KEYS: [(&str, &str); 22] = [
        ("UP]", "\x1b[A"),
        ("DOWN]", "\x1b[B"),
        ("RIGHT]", "\x1b[C"),
        ("LEFT]", "\x1b[D"),
        ("HOME]", "\x1b[H"),
        ("END]", "\x1b[F"),
        ("PGUP]", "\x1b[5~"),
        ("PGDN]", "\x1b[6~"),
        ("INSERT]", "\x1b[2~"),
        ("DELETE]", "\x1b[3~"),
        ("F10]", "\x1b[21~"),
        ("F11]", "\x1b[23~"),
        ("F12]", "\x1b[24~"),
        ("F1]", "\x1bOP"),
        ("F2]", "\x1bOQ"),
        ("F3]", "\x1bOR"),
        ("F4]", "\x1bOS"),
        ("F5]", "\x1b[15~"),
        ("F6]", "\x1b[17~"),
        ("F7]", "\x1b[18~"),
        ("F8]", "\x1b[19~"),
        ("F9]", "\x1b[20~"),
    ];
    KEYS.iter()
        .find(|(name, _)| input.starts_with(name))
        .map(|(name, sequence)| (*sequence, name.len()))
}

// ============================================================================
// Terminal geometry
// ============================================================================

/// Size of the controlling terminal, or 24x80 when stdout is not a tty
#[cfg(unix)]
pub fn terminal_size() -> Geometry {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only writes into the winsize we pass
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if rc == 0 && size.ws_row > 0 && size.ws_col > 0 {
        Geometry::new(size.ws_row, size.ws_col)
    } else {
        Geometry::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

#[cfg(not(unix))]
pub fn terminal_size() -> Geometry {
    Geometry::new(DEFAULT_ROWS, DEFAULT_COLS)
}

/// Pixel container that fits exactly `geometry` cells
pub fn container_for(geometry: Geometry) -> ContainerSize {
    let metrics = CellMetrics::default();
    ContainerSize::new(
        u32::from(geometry.cols) * metrics.width_px,
        u32::from(geometry.rows) * metrics.height_px,
    )
}

#[cfg(unix)]
fn watch_window_size(commands: UnboundedSender<ClientCommand>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(e) => {
            log::warn!("Cannot watch terminal size: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while winch.recv().await.is_some() {
            let container = container_for(terminal_size());
            if commands.send(ClientCommand::Resize(container)).is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn watch_window_size(_commands: UnboundedSender<ClientCommand>) {}

// ============================================================================
// Runner
// ============================================================================

fn open_store(settings: &ClientSettings) -> Result<Box<dyn KeyValueStore>> {
    match &settings.storage_path {
        Some(path) => {
            let store = FileStore::open(path.clone())
                .with_context(|| format!("Failed to open storage {}", path.display()))?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(MemoryStore::default())),
    }
}

pub async fn run(settings: ClientSettings) -> Result<()> {
    let store = open_store(&settings)?;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let runtime = ClientRuntime::new(
        &settings,
        store,
        container_for(terminal_size()),
        event_tx,
    );
    let client = tokio::spawn(runtime.run(command_rx));

    eprintln!(
        "{}",
        format!(
            "termhub attached to {}{} (~help for commands)",
            settings.host, settings.endpoint
        )
        .bright_cyan()
    );
    watch_window_size(command_tx.clone());
    command_tx
        .send(ClientCommand::NewSession)
        .context("Client runtime stopped before the first session")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    let command = match parse_line(&line) {
                        Line::Input(text) => ClientCommand::Input(text),
                        Line::Command(command) => command,
                        Line::Help => {
                            eprintln!("{}", HELP.bright_black());
                            continue;
                        }
                        Line::Invalid(message) => {
                            eprintln!("{}", message.bright_red());
                            continue;
                        }
                    };
                    let quitting = command == ClientCommand::Quit;
                    if command_tx.send(command).is_err() || quitting {
                        break;
                    }
                }
                None => {
                    let _ = command_tx.send(ClientCommand::Quit);
                    break;
                }
            },
            event = event_rx.recv() => match event {
                Some(event) => render(event)?,
                None => break,
            },
        }
    }

    drop(command_tx);
    client.await.context("Client runtime panicked")?;
    while let Ok(event) = event_rx.try_recv() {
        render(event)?;
    }
    eprintln!("{}", "Detached".bright_cyan());
    Ok(())
}

fn render(event: ClientEvent) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match event {
        ClientEvent::Output(bytes) => stdout.write_all(&bytes)?,
        ClientEvent::Redraw(screen) => {
            stdout.write_all(b"\x1b[H\x1b[2J")?;
            stdout.write_all(screen.as_bytes())?;
        }
        ClientEvent::Connection(state) => {
            let label = match state {
                ReadyState::Open => "connected".green(),
                ReadyState::Connecting => "connecting".yellow(),
                ReadyState::Closing | ReadyState::Closed => "disconnected".red(),
            };
            eprintln!("{} {}", "[connection]".bright_black(), label);
        }
        ClientEvent::Sessions { sessions, active } => {
            eprintln!("{}", format_sessions(&sessions, active));
        }
        ClientEvent::Reply {
            namespace,
            command,
            data,
        } => {
            eprintln!(
                "{} {}",
                format!("[{}.{}]", namespace, command).bright_magenta(),
                data
            );
        }
        ClientEvent::PanelVisible(visible) => {
            let state = if visible { "shown" } else { "hidden" };
            eprintln!("{}", format!("Output {}", state).bright_black());
        }
        ClientEvent::Notice(message) => eprintln!("{}", message.bright_yellow()),
    }
    stdout.flush()?;
    Ok(())
}

fn format_sessions(sessions: &[SessionInfo], active: Option<SessionId>) -> String {
    if sessions.is_empty() {
        return "No sessions".to_string();
    }
    sessions
        .iter()
        .enumerate()
        .map(|(index, info)| {
            let marker = if Some(info.id) == active { "*" } else { " " };
            format!("{} {:>2}  {}  (id {})", marker, index + 1, info.name, info.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use termhub_terminal::SessionPhase;

    #[test]
    fn test_plain_lines_get_carriage_return() {
        assert_eq!(parse_line("ls -la"), Line::Input("ls -la\r".to_string()));
        assert_eq!(parse_line(""), Line::Input("\r".to_string()));
        assert_eq!(parse_line("echo hi\r\n"), Line::Input("echo hi\r".to_string()));
    }

    #[test]
    fn test_double_tilde_escapes() {
        assert_eq!(parse_line("~~/bin"), Line::Input("~/bin\r".to_string()));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse_line("~new"), Line::Command(ClientCommand::NewSession));
        assert_eq!(parse_line("~switch 3"), Line::Command(ClientCommand::Switch(3)));
        assert_eq!(parse_line("~close"), Line::Command(ClientCommand::Close(None)));
        assert_eq!(
            parse_line("~close 2"),
            Line::Command(ClientCommand::Close(Some(2)))
        );
        assert_eq!(parse_line("~ls"), Line::Command(ClientCommand::List));
        assert_eq!(parse_line("~q"), Line::Command(ClientCommand::Quit));
        assert_eq!(parse_line("~eof"), Line::Input("\x04".to_string()));
        assert_eq!(
            parse_line("~endpoint terminal/pty1/"),
            Line::Command(ClientCommand::Endpoint("terminal/pty1/".to_string()))
        );
    }

    #[test]
    fn test_bad_commands_are_invalid() {
        assert!(matches!(parse_line("~switch two"), Line::Invalid(_)));
        assert!(matches!(parse_line("~endpoint"), Line::Invalid(_)));
        assert!(matches!(parse_line("~bogus"), Line::Invalid(_)));
        assert!(matches!(parse_line("~call files"), Line::Invalid(_)));
        assert!(matches!(parse_line("~call files list [1,"), Line::Invalid(_)));
    }

    #[test]
    fn test_call_arguments() {
        assert_eq!(
            parse_line(r#"~call files list ["/tmp", 2]"#),
            Line::Command(ClientCommand::Call {
                namespace: "files".to_string(),
                func_name: "list".to_string(),
                args: vec![json!("/tmp"), json!(2)],
            })
        );
        assert_eq!(
            parse_line("~call files count 5"),
            Line::Command(ClientCommand::Call {
                namespace: "files".to_string(),
                func_name: "count".to_string(),
                args: vec![json!(5)],
            })
        );
        assert_eq!(
            parse_line("~call app ping"),
            Line::Command(ClientCommand::Call {
                namespace: "app".to_string(),
                func_name: "ping".to_string(),
                args: vec![],
            })
        );
    }

    #[test]
    fn test_expand_keys() {
        assert_eq!(expand_keys("^C"), "\x03");
        assert_eq!(expand_keys("^c^d"), "\x03\x04");
        assert_eq!(expand_keys("[UP][UP]x"), "\x1b[A\x1b[Ax");
        assert_eq!(expand_keys("[F1][F12]"), "\x1bOP\x1b[24~");
        assert_eq!(expand_keys("^1 [nope]"), "^1 [nope]");
        assert_eq!(expand_keys("end^"), "end^");
        assert_eq!(parse_line("~keys ^C"), Line::Input("\x03".to_string()));
    }

    #[test]
    fn test_container_for_round_trips_cells() {
        let container = container_for(Geometry::new(24, 80));
        assert_eq!(container, ContainerSize::new(720, 408));
    }

    #[test]
    fn test_format_sessions_marks_active() {
        let sessions = vec![
            SessionInfo {
                id: SessionId(1),
                name: "/bin/zsh".to_string(),
                phase: SessionPhase::Inactive,
                has_buffer: true,
            },
            SessionInfo {
                id: SessionId(2),
                name: "/bin/zsh (1)".to_string(),
                phase: SessionPhase::Active,
                has_buffer: false,
            },
        ];
        let listing = format_sessions(&sessions, Some(SessionId(2)));
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("   1  /bin/zsh"));
        assert!(lines[1].starts_with("*  2  /bin/zsh (1)"));
        assert_eq!(format_sessions(&[], None), "No sessions");
    }
}
