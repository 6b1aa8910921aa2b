//! Local terminal as a display surface
//!
//! Raw-mode stdin/stdout attached to the session through the I/O bridge.
//! `Ctrl+]` detaches.

use std::io::{Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use tokio::sync::mpsc;

use pl_core::SurfaceSize;
use pl_session::{DisplaySurface, SessionOrchestrator, SessionState, SurfaceEvent};

/// Buffered terminal events between the blocking reader and the relay
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Size of the local terminal, or 80x24 if it cannot be queried
pub fn current_size() -> SurfaceSize {
    size()
        .map(|(cols, rows)| SurfaceSize::new(cols, rows))
        .unwrap_or_else(|_| SurfaceSize::default_terminal())
}

/// Renders remote output to stdout
pub struct TerminalSurface {
    stdout: Mutex<Stdout>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(std::io::stdout()),
        }
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface for TerminalSurface {
    fn render(&self, data: &[u8]) {
        let mut stdout = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = stdout.write_all(data).and_then(|_| stdout.flush()) {
            tracing::warn!("Failed to write to terminal: {}", e);
        }
    }
}

/// Attach the local terminal to a connected session.
///
/// Returns `true` if the user detached and `false` if the session left the
/// connected state on its own.
pub async fn run_terminal(orchestrator: &SessionOrchestrator) -> Result<bool> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    if let Err(e) = stdout.execute(EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e.into());
    }

    let result = relay(orchestrator).await;

    let _ = stdout.execute(LeaveAlternateScreen);
    disable_raw_mode()?;
    result
}

async fn relay(orchestrator: &SessionOrchestrator) -> Result<bool> {
    let (surface_tx, surface_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    orchestrator.attach_surface(Arc::new(TerminalSurface::new()), surface_rx);

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop);
    let reader = tokio::task::spawn_blocking(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            if event::poll(Duration::from_millis(10)).unwrap_or(false) {
                if let Ok(evt) = event::read() {
                    if event_tx.blocking_send(evt).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The remote may have been sized for a different window
    let _ = surface_tx.send(SurfaceEvent::Resize(current_size())).await;

    let mut state = orchestrator.watch();
    let detached = loop {
        tokio::select! {
            Some(evt) = event_rx.recv() => {
                let Some(event) = translate(evt) else {
                    continue;
                };
                let Some(event) = event else {
                    break true;
                };
                if surface_tx.send(event).await.is_err() {
                    break false;
                }
            }
            changed = state.changed() => {
                let connected = matches!(*state.borrow(), SessionState::Connected { .. });
                if changed.is_err() || !connected {
                    break false;
                }
            }
        }
    };

    stop.store(true, Ordering::Relaxed);
    let _ = surface_tx.send(SurfaceEvent::Disposed).await;
    let _ = reader.await;

    Ok(detached)
}

/// Map a terminal event to a surface event.
///
/// `None` ignores the event; `Some(None)` is the detach key.
fn translate(evt: Event) -> Option<Option<SurfaceEvent>> {
    match evt {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) => {
            if kind == KeyEventKind::Release {
                return None;
            }
            if is_detach_key(code, modifiers) {
                return Some(None);
            }
            let data = key_to_bytes(code, modifiers);
            (!data.is_empty()).then(|| Some(SurfaceEvent::Input(Bytes::from(data))))
        }
        Event::Paste(text) => Some(Some(SurfaceEvent::Input(Bytes::from(text)))),
        Event::Resize(cols, rows) => Some(Some(SurfaceEvent::Resize(SurfaceSize::new(cols, rows)))),
        Event::FocusGained => Some(Some(SurfaceEvent::Focus(true))),
        Event::FocusLost => Some(Some(SurfaceEvent::Focus(false))),
        Event::Mouse(_) => None,
    }
}

fn is_detach_key(code: KeyCode, modifiers: KeyModifiers) -> bool {
    modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char(']')
}

/// Bytes a terminal would send for a key press
fn key_to_bytes(code: KeyCode, modifiers: KeyModifiers) -> Vec<u8> {
    match code {
        KeyCode::Char(c) if modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii() => {
            // Ctrl+A = 0x01 ... Ctrl+_ = 0x1f
            vec![(c.to_ascii_lowercase() as u8) & 0x1f]
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            let encoded = c.encode_utf8(&mut buf).as_bytes();
            if modifiers.contains(KeyModifiers::ALT) {
                [&[0x1b][..], encoded].concat()
            } else {
                encoded.to_vec()
            }
        }
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Tab => b"\t".to_vec(),
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::F(n) => function_key(n).map(<[u8]>::to_vec).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn function_key(n: u8) -> Option<&'static [u8]> {
    let seq: &'static [u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    };
    Some(seq)
}
