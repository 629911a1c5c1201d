//! Console Dispatch
//!
//! Routes a parsed command to its handler and renders the JSON reply, and
//! drives the read-dispatch-write loop over any async reader and writer.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::handlers::{
    clear_handler, delete_handler, get_handler, keys_handler, pin_handler, set_handler,
    stats_handler, tidy_handler, ConsoleState,
};
use crate::error::{CacheError, Result};
use crate::models::{Command, ErrorResponse, HelpResponse};

/// What the console should do after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write this line
    Output(String),
    /// Blank input; write nothing
    Skip,
    Quit,
}

/// Parses and executes one input line.
pub fn dispatch(state: &ConsoleState, line: &str) -> Reply {
    if line.trim().is_empty() {
        return Reply::Skip;
    }

    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(err) => return Reply::Output(render_error(&err)),
    };
    debug!(?command, "Dispatching console command");

    let output = match command {
        Command::Set { key, value, ttl } => render(set_handler(state, &key, value, ttl)),
        Command::Pin { key, value } => render(pin_handler(state, &key, value)),
        Command::Get { key } => render(get_handler(state, &key)),
        Command::Del { key } => render(delete_handler(state, &key)),
        Command::Keys => render(Ok(keys_handler(state))),
        Command::Stats => render(Ok(stats_handler(state))),
        Command::Tidy => render(tidy_handler(state)),
        Command::Clear => render(clear_handler(state)),
        Command::Help => render(Ok(HelpResponse::new())),
        Command::Quit => return Reply::Quit,
    };
    Reply::Output(output)
}

/// Reads commands from `reader` until EOF or `QUIT`, writing one reply line
/// per command to `writer`.
pub async fn run_console<R, W>(state: ConsoleState, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        match dispatch(&state, &line) {
            Reply::Output(out) => {
                writer.write_all(out.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Reply::Skip => {}
            Reply::Quit => {
                info!("Console received QUIT");
                break;
            }
        }
    }
    Ok(())
}

fn render<S: Serialize>(result: Result<S>) -> String {
    let json = result.and_then(|body| {
        serde_json::to_string(&body).map_err(|e| CacheError::Internal(e.to_string()))
    });
    match json {
        Ok(json) => json,
        Err(err) => render_error(&err),
    }
}

fn render_error(err: &CacheError) -> String {
    serde_json::to_string(&ErrorResponse::from(err))
        .unwrap_or_else(|_| serde_json::json!({ "error": err.code() }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;

    fn state() -> ConsoleState {
        ConsoleState::from_options(CacheOptions::default()).unwrap()
    }

    fn output(reply: Reply) -> serde_json::Value {
        match reply {
            Reply::Output(line) => serde_json::from_str(&line).unwrap(),
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_set_get() {
        let state = state();

        let set = output(dispatch(&state, "SET k hello"));
        assert_eq!(set["key"], "k");

        let get = output(dispatch(&state, "GET k"));
        assert_eq!(get["value"], "hello");
        assert_eq!(get["size"], 5);
    }

    #[test]
    fn test_dispatch_errors_are_json() {
        let state = state();

        let missing = output(dispatch(&state, "GET nope"));
        assert_eq!(missing["code"], "not_found");

        let bad = output(dispatch(&state, "BOGUS"));
        assert_eq!(bad["code"], "invalid");
    }

    #[test]
    fn test_dispatch_blank_and_quit() {
        let state = state();
        assert_eq!(dispatch(&state, "   "), Reply::Skip);
        assert_eq!(dispatch(&state, "quit"), Reply::Quit);
    }

    #[tokio::test]
    async fn test_run_console_until_quit() {
        let input = b"SET a 1\nKEYS\n\nQUIT\nSET b 2\n".to_vec();
        let mut out = Vec::new();
        let state = state();

        run_console(state.clone(), &input[..], &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"keys\":[\"a\"]"));
        assert!(!state.cache.contains_key("b"));
    }
}
