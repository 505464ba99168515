//! Bounded views of process output and files.

use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// How much of a file's end is read before splitting into lines.
const TAIL_READ_BYTES: u64 = 1024 * 1024;

/// Keep the tail of `text`: clamp to `max_bytes` first, then to `max_lines`.
pub fn tail_text(text: &str, max_lines: usize, max_bytes: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = if text.len() > max_bytes {
        &text[ceil_char_boundary(text, text.len() - max_bytes)..]
    } else {
        text
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Smallest byte index >= `i` that is a valid char boundary.
fn ceil_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos < s.len() && !s.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Last `lines` lines of a file, reading at most the final megabyte.
pub async fn tail_file(path: &Path, lines: usize) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let read = size.min(TAIL_READ_BYTES);
    if read < size {
        file.seek(SeekFrom::End(-(read as i64))).await?;
    }
    let mut buf = Vec::with_capacity(read as usize);
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}
