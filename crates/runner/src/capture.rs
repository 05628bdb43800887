use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use pywarden_core::{OutputCallback, OutputStream};

const READ_CHUNK: usize = 8 * 1024;

/// Incremental UTF-8 decoder: a multi-byte sequence split across reads is
/// held back until the rest arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Captured text of one pipe, readable even if its reader is aborted.
pub type SharedBuffer = Arc<Mutex<String>>;

pub fn take_buffer(buffer: &SharedBuffer) -> String {
    let mut guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::take(&mut *guard)
}

/// Spawns the single reader for a pipe: each decoded chunk is appended to
/// `buffer` (when given) and handed to `callback` (when given).
pub fn spawn_tee<R>(
    reader: R,
    stream: OutputStream,
    buffer: Option<SharedBuffer>,
    callback: Option<OutputCallback>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut decoder = Utf8Decoder::default();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    tracing::warn!(%stream, error = %err, "pipe read failed");
                    break;
                }
            };
            let text = decoder.push(&chunk[..read]);
            deliver(&text, stream, buffer.as_ref(), callback.as_ref());
        }
        let rest = decoder.finish();
        deliver(&rest, stream, buffer.as_ref(), callback.as_ref());
    })
}

fn deliver(
    text: &str,
    stream: OutputStream,
    buffer: Option<&SharedBuffer>,
    callback: Option<&OutputCallback>,
) {
    if text.is_empty() {
        return;
    }
    if let Some(buffer) = buffer {
        buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(text);
    }
    if let Some(callback) = callback {
        callback(text, stream);
    }
}
