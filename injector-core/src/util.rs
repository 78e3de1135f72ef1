//! Small filesystem helpers shared by config loading and key persistence.
//!
//! Grounded on `monolake-core`'s own `util::file_read`: monoio has no
//! `statx` support, so the file length is obtained via a synchronous `stat`
//! before the async read fills an exactly-sized owned buffer.

use std::path::Path;

use monoio::buf::IoBufMut;

pub async fn file_read(path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
    let file_length = {
        let file = std::fs::File::open(&path)?;
        file.metadata().map(|meta| meta.len() as usize)?
    };

    let file = monoio::fs::File::open(path).await?;
    let buffer = unsafe { Vec::with_capacity(file_length).slice_mut_unchecked(0..file_length) };
    let (res, buf) = file.read_exact_at(buffer, 0).await;
    res?;
    Ok(buf.into_inner())
}

pub fn file_write_sync(path: impl AsRef<Path>, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
