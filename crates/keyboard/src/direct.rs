//! Character-by-character direct-injection back end (spec §4.7),
//! grounded on `mark10112-voice-to-text`'s `enigo`-backed key simulation.

use std::time::Duration;

use enigo::{Direction, Enigo, Key, Keyboard, Settings};

use crate::{error::KeyboardError, KeyboardBackend};

pub struct DirectInjectionBackend {
    char_delay: Duration,
}

impl DirectInjectionBackend {
    /// `char_delay` defaults to 1ms; configurable to suppress scrambled
    /// output on slow receivers.
    pub fn new(char_delay: Duration) -> Self {
        Self { char_delay }
    }
}

impl Default for DirectInjectionBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl KeyboardBackend for DirectInjectionBackend {
    fn type_text(&mut self, text: &str) -> Result<(), KeyboardError> {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| KeyboardError::DirectInjection(e.to_string()))?;

        let chars: Vec<char> = text.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            enigo
                .key(Key::Unicode(*c), Direction::Click)
                .map_err(|e| KeyboardError::DirectInjection(e.to_string()))?;
            if i + 1 != chars.len() {
                std::thread::sleep(self.char_delay);
            }
        }
        Ok(())
    }
}
