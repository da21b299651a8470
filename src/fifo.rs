//! Named-pipe command input.
//!
//! The GUI and the Bluetooth bridge each `echo` a token into the pipe. We
//! hold it open read-write so the pipe never reports EOF between writers.

use std::fs::Permissions;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use nix::sys::stat::Mode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Commands are a few bytes; anything past this is garbage.
const MAX_LINE_LENGTH: usize = 256;

/// The GUI and the Bluetooth bridge run as other users.
const FIFO_MODE: u32 = 0o666;

/// Create the pipe (world-writable) unless something is already there.
pub async fn ensure_fifo(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => bail!("{} exists and is not a named pipe", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }

    info!(path = %path.display(), "Creating command pipe");
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(FIFO_MODE))
        .with_context(|| format!("Failed to create {}", path.display()))?;
    // mkfifo honours the umask; widen it again.
    tokio::fs::set_permissions(path, Permissions::from_mode(FIFO_MODE))
        .await
        .with_context(|| format!("Failed to chmod {}", path.display()))?;
    Ok(())
}

/// Forward every command written to the pipe at `path` until the receiver
/// goes away.
pub async fn read_commands(path: PathBuf, commands: mpsc::Sender<String>) -> anyhow::Result<()> {
    let receiver = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    info!(path = %path.display(), "Listening for commands");
    forward_lines(receiver, commands).await?;
    Ok(())
}

/// Send each line from `reader` (without its newline) to `commands`.
/// Oversized and non-UTF-8 lines are dropped with a warning.
pub async fn forward_lines(
    reader: impl AsyncRead + Unpin,
    commands: mpsc::Sender<String>,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(MAX_LINE_LENGTH);
    loop {
        let line = match read_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Dropping command line: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        if commands.send(line).await.is_err() {
            return Ok(());
        }
    }
}

/// Read one line of at most `MAX_LINE_LENGTH` bytes. `Ok(None)` on EOF.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    buf.clear();
    let limit = MAX_LINE_LENGTH as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if n as u64 == limit {
        skip_rest_of_line(reader).await?;
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_LENGTH} byte limit"),
        ));
    }

    String::from_utf8(std::mem::take(buf))
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 command"))
}

/// Discard input up to and including the next newline, without buffering it.
async fn skip_rest_of_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(pos) = memchr::memchr(b'\n', available) {
            reader.consume(pos + 1);
            return Ok(());
        }
        let n = available.len();
        reader.consume(n);
    }
}
