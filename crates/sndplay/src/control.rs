//! Interactive playback control from stdin lines.

use crossbeam_channel::Sender;

/// A control request from the terminal or a signal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TogglePause,
    Seek { ms: u64 },
    Quit,
}

/// Parse one input line. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<ControlCommand> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    match cmd {
        "p" | "pause" => Some(ControlCommand::TogglePause),
        "q" | "quit" | "stop" => Some(ControlCommand::Quit),
        "s" | "seek" => {
            let ms = parts.next()?.parse().ok()?;
            Some(ControlCommand::Seek { ms })
        }
        _ => None,
    }
}

/// Forward stdin commands to `tx` from a background thread until stdin closes.
pub fn spawn_stdin_reader(tx: Sender<ControlCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => tracing::warn!(input = line.trim(), "unknown command (p | s <ms> | q)"),
                },
            }
        }
    });
}
