//! Single-file tar streams for build contexts and container copies.

use std::io::{self, Read};

use tar::{Archive, Builder, EntryType, Header};

/// Ownership and permissions of an archived file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

impl FileMode {
    pub const fn root(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
        }
    }
}

/// Build a tar stream holding one regular file.
pub fn single_file(name: &str, contents: &[u8], mode: FileMode) -> io::Result<Vec<u8>> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(mode.mode);
    header.set_uid(mode.uid);
    header.set_gid(mode.gid);
    header.set_mtime(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );

    let mut builder = Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

/// Read the first regular file out of a tar stream.
pub fn first_file(archive: &[u8]) -> io::Result<Vec<u8>> {
    let mut archive = Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "archive contains no regular file",
    ))
}
