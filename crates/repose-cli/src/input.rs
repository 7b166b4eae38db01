//! Keyboard shutdown monitor (Esc, q, Q).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use repose_core::WaitSignal;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawn a thread that trips `signal` when the user presses Esc or q.
pub fn spawn_keyboard_monitor(signal: Arc<WaitSignal>) -> JoinHandle<()> {
    thread::spawn(move || {
        while !signal.is_triggered() {
            if !event::poll(POLL_INTERVAL).unwrap_or(false) {
                continue;
            }
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => {
                        info!("quit requested, stopping...");
                        signal.trigger();
                        break;
                    }
                    _ => {}
                }
            }
        }
    })
}
