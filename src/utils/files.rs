use crate::core::error::PeerError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn file_error(path: &Path, source: std::io::Error) -> PeerError {
    PeerError::File {
        path: path.display().to_string(),
        source,
    }
}

/// Read a file into chunks of at most `chunk_size` bytes
///
/// An empty file yields no chunks.
pub async fn split_file(path: &Path, chunk_size: usize) -> Result<Vec<Vec<u8>>, PeerError> {
    let data = fs::read(path).await.map_err(|e| file_error(path, e))?;
    Ok(data.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect())
}

/// Write `chunks` in order to `path`, creating parent directories
pub async fn combine_chunks(chunks: &[Vec<u8>], path: &Path) -> Result<(), PeerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| file_error(parent, e))?;
    }

    let mut file = fs::File::create(path).await.map_err(|e| file_error(path, e))?;
    for chunk in chunks {
        file.write_all(chunk).await.map_err(|e| file_error(path, e))?;
    }
    file.flush().await.map_err(|e| file_error(path, e))?;
    Ok(())
}

/// Final path component, also stripping quote characters left by shells
pub fn strip_filename(filename: &str) -> String {
    let trimmed = filename.trim().trim_matches(|c| c == '\'' || c == '"');
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// Where a downloaded file lands: `<dir>/<peer_id>_<filename>`
pub fn output_path(dir: &Path, peer_id: &str, filename: &str) -> PathBuf {
    dir.join(format!("{}_{}", peer_id, strip_filename(filename)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_split_then_combine_restores_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("input.bin");
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let chunks = split_file(&source, 16384).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 16384);
        assert_eq!(chunks[2].len(), 40_000 - 2 * 16384);

        let target = dir.path().join("nested/out/copy.bin");
        combine_chunks(&chunks, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_file_has_no_chunks() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty");
        std::fs::write(&source, b"").unwrap();

        assert!(split_file(&source, 1024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_file_error() {
        let err = split_file(Path::new("/nonexistent/file.bin"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::File { .. }));
    }

    #[test]
    fn test_strip_filename() {
        assert_eq!(strip_filename("input/image.jpg"), "image.jpg");
        assert_eq!(strip_filename("'/tmp/a b.txt'"), "a b.txt");
        assert_eq!(strip_filename("C:\\data\\x.bin"), "x.bin");
        assert_eq!(strip_filename("plain"), "plain");
    }

    #[test]
    fn test_output_path_prefixes_peer_id() {
        let path = output_path(Path::new("output"), "abc123", "dir/a.bin");
        assert_eq!(path, PathBuf::from("output/abc123_a.bin"));
    }
}
