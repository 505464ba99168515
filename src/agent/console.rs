//! Shared operator line reader.
//!
//! The REPL and the confirmation prompt read from the same stdin; one reader
//! behind a mutex keeps buffered input from being split between them.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

type LineSource = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

pub struct Console {
    lines: Mutex<LineSource>,
}

impl Console {
    /// Console over process stdin.
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Console over any buffered reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: Mutex::new(boxed.lines()),
        }
    }

    /// Print `prompt` and read one line. `None` at end of input.
    pub async fn read_line(&self, prompt: &str) -> std::io::Result<Option<String>> {
        if !prompt.is_empty() {
            let mut out = std::io::stdout();
            write!(out, "{prompt}")?;
            out.flush()?;
        }
        let mut lines = self.lines.lock().await;
        lines.next_line().await
    }
}
