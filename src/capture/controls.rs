use crate::capture::session::{ControlInput, SessionEvent};
use crate::common::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent};
use std::time::Duration;

/// Keyboard stop signal for interactive capture: `q` or Esc ends the session
/// at the next iteration boundary. Polling is zero-timeout so the loop never
/// blocks on input.
pub struct KeyboardControls;

impl ControlInput for KeyboardControls {
    fn poll(&mut self) -> Result<SessionEvent> {
        if event::poll(Duration::from_millis(0))? {
            if let Event::Key(KeyEvent { code, .. }) = event::read()? {
                if matches!(code, KeyCode::Esc | KeyCode::Char('q')) {
                    return Ok(SessionEvent::Stop);
                }
            }
        }
        Ok(SessionEvent::Continue)
    }
}
