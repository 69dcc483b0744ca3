pub mod render;
pub mod state;

use crate::bus::{Bus, Mailbox, Message, Participant, Reply};
use crate::config::RunConfiguration;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::prelude::*;
use state::AppState;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Operator commands from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuiCommand {
    Quit,
    Start,
    Stop,
    Pause,
    Resume,
    Reset,
    Approve,
    Decline,
}

impl TuiCommand {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('q') => Some(TuiCommand::Quit),
            KeyCode::Char('s') => Some(TuiCommand::Start),
            KeyCode::Char('x') => Some(TuiCommand::Stop),
            KeyCode::Char('p') => Some(TuiCommand::Pause),
            KeyCode::Char('r') => Some(TuiCommand::Resume),
            KeyCode::Char('z') => Some(TuiCommand::Reset),
            KeyCode::Char('a') => Some(TuiCommand::Approve),
            KeyCode::Char('d') => Some(TuiCommand::Decline),
            _ => None,
        }
    }
}

/// Run the TUI. Reads and scrolls `state_tx`, sends commands on `cmd_tx`.
pub async fn run_tui(
    state_tx: watch::Sender<AppState>,
    cmd_tx: mpsc::Sender<TuiCommand>,
) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = tui_loop(&mut terminal, state_tx, cmd_tx).await;

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state_tx: watch::Sender<AppState>,
    cmd_tx: mpsc::Sender<TuiCommand>,
) -> Result<()> {
    let mut spinner_frame: u8 = 0;
    loop {
        let state = state_tx.borrow().clone();
        terminal.draw(|f| render::draw(f, &state, spinner_frame))?;
        spinner_frame = spinner_frame.wrapping_add(1);

        // Poll for keyboard events with 100ms timeout
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('j') => state_tx.send_modify(|s| {
                        s.log_scroll_offset = s.log_scroll_offset.saturating_add(1);
                    }),
                    KeyCode::Char('k') => state_tx.send_modify(|s| {
                        s.log_scroll_offset = s.log_scroll_offset.saturating_sub(1);
                    }),
                    code => {
                        if let Some(cmd) = TuiCommand::from_key(code) {
                            let _ = cmd_tx.send(cmd).await;
                            if cmd == TuiCommand::Quit {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Apply coordinator pushes addressed to the UI.
pub async fn follow_bus(mut mailbox: Mailbox, state_tx: watch::Sender<AppState>) {
    while let Some(mut env) = mailbox.recv().await {
        if env.reply.is_some() {
            let action = env.message.action();
            env.respond(Reply::Rejected {
                reason: format!("ui does not answer {action}"),
            });
            continue;
        }
        state_tx.send_modify(|s| s.apply(env.message));
    }
}

/// Turn keyboard commands into coordinator requests. A start uses the run
/// defaults from the config file.
pub async fn forward_commands(
    bus: Bus,
    run: RunConfiguration,
    mut cmd_rx: mpsc::Receiver<TuiCommand>,
    state_tx: watch::Sender<AppState>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let message = match cmd {
            TuiCommand::Quit => break,
            TuiCommand::Start => Message::Start { config: run.clone() },
            TuiCommand::Stop => Message::Stop,
            TuiCommand::Pause => Message::Pause,
            TuiCommand::Resume => Message::Resume,
            TuiCommand::Reset => Message::Reset,
            TuiCommand::Approve | TuiCommand::Decline => {
                let pending = state_tx.borrow().approval.as_ref().map(|a| a.request_id);
                let Some(request_id) = pending else {
                    continue;
                };
                Message::ApprovalAnswer {
                    request_id,
                    approved: cmd == TuiCommand::Approve,
                }
            }
        };
        let action = message.action();
        match bus.request(Participant::Ui, Participant::Coordinator, message).await {
            Ok(Reply::Rejected { reason }) => {
                state_tx.send_modify(|s| s.push_log("WARN", format!("{action} rejected: {reason}")));
            }
            Ok(_) => tracing::debug!(action, "command accepted"),
            Err(e) => {
                tracing::warn!(action, error = %e, "command not delivered");
                state_tx.send_modify(|s| s.push_log("ERROR", format!("{action} failed: {e}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(TuiCommand::from_key(KeyCode::Char('s')), Some(TuiCommand::Start));
        assert_eq!(TuiCommand::from_key(KeyCode::Char('x')), Some(TuiCommand::Stop));
        assert_eq!(TuiCommand::from_key(KeyCode::Char('z')), Some(TuiCommand::Reset));
        assert_eq!(TuiCommand::from_key(KeyCode::Char('j')), None);
    }

    #[tokio::test]
    async fn test_rejected_command_lands_in_log() {
        let bus = Bus::new();
        let mut coordinator = bus.attach(Participant::Coordinator);
        tokio::spawn(async move {
            while let Some(mut env) = coordinator.recv().await {
                env.respond(Reply::Rejected { reason: "no active run".into() });
            }
        });
        let (state_tx, state_rx) = watch::channel(AppState::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        cmd_tx.send(TuiCommand::Stop).await.unwrap();
        cmd_tx.send(TuiCommand::Quit).await.unwrap();
        forward_commands(bus, RunConfiguration::default(), cmd_rx, state_tx).await;

        let state = state_rx.borrow();
        assert_eq!(state.logs.back().unwrap().message, "stop rejected: no active run");
    }
}
