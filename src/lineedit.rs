//! Interactive line editing over the serial port: cursor motion, backspace,
//! and history recall via the arrow-key escape sequence.
use crate::history::History;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum LineEvent {
    /// A complete line is ready; the bytes are in the editor's buffer,
    /// `len` long.
    Complete(usize),
    None,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EscState {
    None,
    Esc,
    Bracket,
}

/// A fixed-capacity line buffer with cursor motion and escape-sequence
/// decoding. `CAP` defaults to 80, a generous single-line shell command.
pub struct LineEditor<const CAP: usize = 80> {
    buf: [u8; CAP],
    len: usize,
    cursor: usize,
    esc: EscState,
    history_cursor: Option<usize>,
    pub echo: bool,
}

impl<const CAP: usize> LineEditor<CAP> {
    pub const fn new(echo: bool) -> Self {
        Self {
            buf: [0u8; CAP],
            len: 0,
            cursor: 0,
            esc: EscState::None,
            history_cursor: None,
            echo,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    fn clear(&mut self) {
        self.len = 0;
        self.cursor = 0;
        self.history_cursor = None;
    }

    fn insert(&mut self, byte: u8) {
        if self.len >= CAP {
            return;
        }
        for i in (self.cursor..self.len).rev() {
            self.buf[i + 1] = self.buf[i];
        }
        self.buf[self.cursor] = byte;
        self.len += 1;
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        for i in self.cursor..self.len {
            self.buf[i - 1] = self.buf[i];
        }
        self.cursor -= 1;
        self.len -= 1;
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        if self.cursor < self.len {
            self.cursor += 1;
        }
    }

    fn recall(&mut self, history: &History, older: bool) {
        let cursor = match (self.history_cursor, older) {
            (None, true) => 0,
            (Some(n), true) => n + 1,
            (Some(0), false) | (None, false) => return,
            (Some(n), false) => n - 1,
        };
        if let Some(entry) = history.nth_back(cursor) {
            self.len = entry.len().min(CAP);
            self.buf[..self.len].copy_from_slice(&entry.as_bytes()[..self.len]);
            self.cursor = self.len;
            self.history_cursor = Some(cursor);
        }
    }

    /// Feed one incoming byte. Returns `LineEvent::Complete` when CR
    /// terminates a line ; the caller reads
    /// the line via `as_str()` and must call `clear()`-via-next-`feed`
    /// bookkeeping itself by calling [`LineEditor::take`].
    pub fn feed(&mut self, byte: u8, history: &History) -> LineEvent {
        match self.esc {
            EscState::None => {}
            EscState::Esc => {
                self.esc = if byte == b'[' { EscState::Bracket } else { EscState::None };
                return LineEvent::None;
            }
            EscState::Bracket => {
                self.esc = EscState::None;
                match byte {
                    b'A' => self.recall(history, true),
                    b'B' => self.recall(history, false),
                    b'C' => self.move_right(),
                    b'D' => self.move_left(),
                    _ => {}
                }
                return LineEvent::None;
            }
        }

        match byte {
            0x1b => {
                self.esc = EscState::Esc;
                LineEvent::None
            }
            b'\r' => LineEvent::Complete(self.len),
            0x08 | 0x7f => {
                self.backspace();
                LineEvent::None
            }
            _ => {
                self.insert(byte);
                LineEvent::None
            }
        }
    }

    /// Consume the completed line and reset for the next one.
    pub fn take(&mut self) -> usize {
        let len = self.len;
        self.clear();
        len
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_completes_line_on_cr() {
        let history = History::<4>::new();
        let mut editor: LineEditor<16> = LineEditor::new(false);
        for &b in b"R" {
            assert_eq!(editor.feed(b, &history), LineEvent::None);
        }
        assert_eq!(editor.feed(b'\r', &history), LineEvent::Complete(1));
        assert_eq!(editor.as_str(), "R");
    }

    #[test]
    fn backspace_removes_last_char() {
        let history = History::<4>::new();
        let mut editor: LineEditor<16> = LineEditor::new(false);
        editor.feed(b'A', &history);
        editor.feed(b'B', &history);
        editor.feed(0x7f, &history);
        assert_eq!(editor.as_str(), "A");
    }

    #[test]
    fn left_arrow_then_insert_splices_into_middle() {
        let history = History::<4>::new();
        let mut editor: LineEditor<16> = LineEditor::new(false);
        editor.feed(b'A', &history);
        editor.feed(b'C', &history);
        editor.feed(0x1b, &history);
        editor.feed(b'[', &history);
        editor.feed(b'D', &history);
        editor.feed(b'B', &history);
        assert_eq!(editor.as_str(), "ABC");
    }

    #[test]
    fn up_arrow_recalls_most_recent_history_entry() {
        let mut history = History::<4>::new();
        history.push("OLD");
        let mut editor: LineEditor<16> = LineEditor::new(false);
        editor.feed(0x1b, &history);
        editor.feed(b'[', &history);
        editor.feed(b'A', &history);
        assert_eq!(editor.as_str(), "OLD");
    }

    #[test]
    fn take_resets_for_next_line() {
        let history = History::<4>::new();
        let mut editor: LineEditor<16> = LineEditor::new(false);
        editor.feed(b'X', &history);
        let len = editor.take();
        assert_eq!(len, 1);
        assert_eq!(editor.as_str(), "");
    }
}
