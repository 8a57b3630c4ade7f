use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event. A length prefix above it can only
/// come from a torn or corrupt write.
const MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;

/// Encode a single event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
/// Payloads replay would refuse are rejected here instead of being logged.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_ENTRY_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact entry. `Ok(None)` marks the end of the usable log:
/// clean EOF, a torn tail, a CRC mismatch or an undecodable payload.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// Append-only write-ahead log of one account.
///
/// Events are encoded up front with `encode_entry`; the engine's writer
/// task hands a whole group-commit batch to `append_batch`, which either
/// makes all of it durable or leaves the file as it was.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last durable batch.
    committed_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
        })
    }

    /// Encode one event into its on-disk entry.
    pub fn encode_entry(event: &Event) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        encode_event(&mut buf, event)?;
        Ok(buf)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let entry = Self::encode_entry(event)?;
        self.append_batch(&[entry])
    }

    /// Write and fsync pre-encoded entries. On failure the file is cut
    /// back to its last durable length so no partial batch survives.
    pub fn append_batch(&mut self, entries: &[Vec<u8>]) -> io::Result<()> {
        let written = self.write_and_sync(entries);
        if let Err(e) = written {
            if let Err(rollback) = self.rollback() {
                tracing::error!("{}: WAL rollback failed: {rollback}", self.path.display());
            }
            return Err(e);
        }
        self.committed_len += entries.iter().map(|e| e.len() as u64).sum::<u64>();
        self.appends_since_compact += entries.len() as u64;
        Ok(())
    }

    fn write_and_sync(&mut self, entries: &[Vec<u8>]) -> io::Result<()> {
        for entry in entries {
            self.writer.write_all(entry)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop whatever the failed batch left in the buffer or the file.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer without flushing it.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event set next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event. Anything after the first damaged entry is
    /// discarded; a missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut consumed: u64 = 0;
        while let Some(event) = read_entry(&mut reader)? {
            consumed += 8 + bincode::serialized_size(&event).unwrap_or(0);
            events.push(event);
        }
        if consumed < total {
            tracing::warn!(
                "{}: discarded {} trailing bytes after {} events",
                path.display(),
                total - consumed,
                events.len()
            );
        }
        Ok(events)
    }
}
