//! Replays raw exports (`DB<id>_raw.txt`) as a block reader.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::comm::adapters::storage::hex_dump::{parse_hex, raw_export_path};

use super::{BlockReader, ReadFuture, ReaderError, SessionFuture};

#[derive(Debug)]
pub struct HexSnapshotReader {
    dir: PathBuf,
    connected: AtomicBool,
}

impl HexSnapshotReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            connected: AtomicBool::new(false),
        }
    }
}

impl BlockReader for HexSnapshotReader {
    fn endpoint(&self) -> String {
        format!("snapshot://{}", self.dir.display())
    }

    fn connect(&self) -> SessionFuture<'_> {
        Box::pin(async move {
            let meta = tokio::fs::metadata(&self.dir)
                .await
                .map_err(|e| ReaderError::Transport {
                    message: format!("{}: {e}", self.dir.display()),
                })?;
            if !meta.is_dir() {
                return Err(ReaderError::Transport {
                    message: format!("{} is not a directory", self.dir.display()),
                });
            }
            self.connected.store(true, Ordering::SeqCst);
            log::debug!("[reader] endpoint={} connected", self.endpoint());
            Ok(())
        })
    }

    fn read(&self, block_id: u32, start_offset: u32, length: u32) -> ReadFuture<'_> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ReaderError::NotConnected);
            }

            let path = raw_export_path(&self.dir, block_id);
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ReaderError::BlockNotFound { block_id })
                }
                Err(e) => {
                    return Err(ReaderError::Transport {
                        message: format!("{}: {e}", path.display()),
                    })
                }
            };

            let bytes = parse_hex(&text).map_err(|e| {
                log::warn!("[reader] block={} bad raw export {}: {}", block_id, path.display(), e);
                ReaderError::Transport {
                    message: format!("{}: {e}", path.display()),
                }
            })?;
            let start = (start_offset as usize).min(bytes.len());
            let end = start.saturating_add(length as usize).min(bytes.len());
            Ok(bytes[start..end].to_vec())
        })
    }

    fn disconnect(&self) -> SessionFuture<'_> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn replays_exported_blocks() {
        let dir = std::env::temp_dir().join(format!("plc-block-mapper-replay-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(raw_export_path(&dir, 100), "00640000bf800000").unwrap();
        std::fs::write(raw_export_path(&dir, 101), "not hex").unwrap();

        let reader = HexSnapshotReader::new(&dir);
        reader.connect().await.unwrap();

        assert_eq!(reader.read(100, 0, 2).await.unwrap(), vec![0x00, 0x64]);
        assert_eq!(reader.read(100, 4, 100).await.unwrap(), vec![0xBF, 0x80, 0x00, 0x00]);
        assert_eq!(
            reader.read(102, 0, 4).await,
            Err(ReaderError::BlockNotFound { block_id: 102 })
        );
        assert!(matches!(
            reader.read(101, 0, 4).await,
            Err(ReaderError::Transport { .. })
        ));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn missing_directory_fails_the_handshake() {
        let dir = std::env::temp_dir().join(format!("plc-block-mapper-missing-{}", Uuid::new_v4()));
        let reader = HexSnapshotReader::new(dir);
        assert!(matches!(
            reader.connect().await,
            Err(ReaderError::Transport { .. })
        ));
        assert_eq!(reader.read(1, 0, 1).await, Err(ReaderError::NotConnected));
    }
}
