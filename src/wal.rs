use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Encode one event as `[len][bincode][crc32]`, returning the bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Append-only event log of a data directory.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry is dropped on replay via the length prefix and CRC.
///
/// Appends are staged until `flush_sync`. A failed append or flush discards
/// the whole staged batch and truncates the file back to the last synced
/// length, so a batch the caller saw fail can never be committed later by
/// somebody else's flush.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful fsync.
    synced_len: u64,
    staged_len: u64,
    staged_events: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed; the file length is unknown.
    broken: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            staged_len: 0,
            staged_events: 0,
            appends_since_compact: 0,
            broken: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage one event without syncing. `flush_sync` commits the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("WAL is in an unknown state after a failed rollback"));
        }
        match encode_event(&mut self.writer, event) {
            Ok(written) => {
                self.staged_len += written;
                self.staged_events += 1;
                Ok(())
            }
            Err(e) => Err(self.rollback(e)),
        }
    }

    /// Write and fsync the staged batch. On failure nothing of it stays.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("WAL is in an unknown state after a failed rollback"));
        }
        match self.write_through() {
            Ok(()) => {
                self.synced_len += self.staged_len;
                self.appends_since_compact += self.staged_events;
                self.staged_len = 0;
                self.staged_events = 0;
                Ok(())
            }
            Err(e) => Err(self.rollback(e)),
        }
    }

    fn write_through(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            // the bytes reach the file, the fsync does not
            self.writer.flush()?;
            return Err(io::Error::other("fsync failed"));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop the staged batch: discard the buffer unflushed and cut the file
    /// back to `synced_len`. Returns `cause` for the caller to propagate.
    fn rollback(&mut self, cause: io::Error) -> io::Error {
        let staged = self.staged_events;
        self.staged_len = 0;
        self.staged_events = 0;

        let reopened = OpenOptions::new().append(true).open(&self.path).and_then(|file| {
            file.set_len(self.synced_len)?;
            Ok(file)
        });
        match reopened {
            Ok(file) => {
                let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
                // into_parts hands back the buffer instead of flushing it on drop
                let _ = old.into_parts();
                warn!(path = %self.path.display(), staged, "rolled back WAL batch: {cause}");
            }
            Err(e) => {
                self.broken = true;
                error!(path = %self.path.display(), "WAL rollback failed: {e}");
            }
        }
        cause
    }

    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted events to a temp file next to the log and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.staged_len = 0;
        self.staged_events = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid event back. A truncated or corrupt tail ends the replay.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}
