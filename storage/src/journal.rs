use crc32fast::Hasher;
use std::io::SeekFrom;
use std::path::Path;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::warn;
use vulngraph_core::error::{ErrorCode, VulngraphError};

/// `[lsn: u64][crc32: u32][len: u32]`
pub const FRAME_HEADER_LEN: u64 = 16;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch in frame {0}")]
    CrcMismatch(u64),
    #[error("corrupt journal entry")]
    CorruptEntry,
}

impl VulngraphError for JournalError {
    fn error_code(&self) -> ErrorCode {
        match self {
            JournalError::Io(_) => ErrorCode::Unavailable,
            JournalError::CrcMismatch(_) | JournalError::CorruptEntry => ErrorCode::Internal,
        }
    }
}

/// Fixed-size prefix of every frame, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    lsn: u64,
    crc: u32,
    len: u32,
}

impl FrameHeader {
    fn for_payload(lsn: u64, payload: &[u8]) -> Result<Self, JournalError> {
        Ok(Self {
            lsn,
            crc: checksum(payload),
            len: u32::try_from(payload.len()).map_err(|_| JournalError::CorruptEntry)?,
        })
    }

    fn encode(&self) -> [u8; FRAME_HEADER_LEN as usize] {
        let mut out = [0u8; FRAME_HEADER_LEN as usize];
        out[..8].copy_from_slice(&self.lsn.to_be_bytes());
        out[8..12].copy_from_slice(&self.crc.to_be_bytes());
        out[12..].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    fn decode(raw: &[u8; FRAME_HEADER_LEN as usize]) -> Self {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&raw[..8]);
        crc.copy_from_slice(&raw[8..12]);
        len.copy_from_slice(&raw[12..]);
        Self {
            lsn: u64::from_be_bytes(lsn),
            crc: u32::from_be_bytes(crc),
            len: u32::from_be_bytes(len),
        }
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// `Ok(false)` when the file ended before `buf` was filled.
async fn read_full(file: &mut File, buf: &mut [u8]) -> Result<bool, JournalError> {
    match file.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(JournalError::Io(e)),
    }
}

/// Append-only journal of committed graph batches, one CRC-checked frame each.
pub struct Journal {
    file: BufWriter<File>,
    next_lsn: u64,
}

impl Journal {
    /// Open or create the journal at `path`. Run [`Journal::replay`] before
    /// appending so LSNs continue from the last durable frame.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .await?;
        Ok(Self {
            file: BufWriter::new(file),
            next_lsn: 1,
        })
    }

    /// Buffer one frame and return its LSN. Durable only after [`Journal::flush`].
    pub async fn append(&mut self, payload: &[u8]) -> Result<u64, JournalError> {
        let header = FrameHeader::for_payload(self.next_lsn, payload)?;
        self.file.write_all(&header.encode()).await?;
        self.file.write_all(payload).await?;
        self.next_lsn += 1;
        Ok(header.lsn)
    }

    pub async fn flush(&mut self) -> Result<(), JournalError> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        Ok(())
    }

    /// LSN of the last appended frame, 0 for an empty journal.
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Feed every complete frame to `apply` in order and return the last LSN.
    /// Bytes after the last complete frame are cut off; a complete frame with a
    /// bad checksum is an error.
    pub async fn replay<F>(&mut self, mut apply: F) -> Result<u64, JournalError>
    where
        F: FnMut(u64, &[u8]) -> Result<(), JournalError>,
    {
        self.file.flush().await?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(0)).await?;

        let mut last_lsn = 0;
        let mut durable_len = 0;
        let mut raw = [0u8; FRAME_HEADER_LEN as usize];
        while read_full(file, &mut raw).await? {
            let header = FrameHeader::decode(&raw);
            let mut payload = vec![0u8; header.len as usize];
            if !read_full(file, &mut payload).await? {
                break;
            }
            if checksum(&payload) != header.crc {
                return Err(JournalError::CrcMismatch(header.lsn));
            }
            apply(header.lsn, &payload)?;
            last_lsn = header.lsn;
            durable_len += FRAME_HEADER_LEN + u64::from(header.len);
        }

        let file_len = file.metadata().await?.len();
        if durable_len < file_len {
            warn!(
                durable_len,
                dropped = file_len - durable_len,
                last_lsn,
                "cutting torn frame from journal tail"
            );
            file.set_len(durable_len).await?;
        }
        file.seek(SeekFrom::End(0)).await?;
        self.next_lsn = last_lsn + 1;
        Ok(last_lsn)
    }
}
