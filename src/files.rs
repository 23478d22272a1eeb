//! Capability-scoped helpers for reading and writing whole UTF-8 files.

use std::io;

use camino::Utf8Path;
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} is missing a file name"),
        )
    })?;
    Ok((parent, file_name))
}

/// Reads the whole file at `path`.
///
/// # Errors
///
/// Returns an I/O error when the file or its directory cannot be opened.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.read_to_string(file_name)
}

/// Replaces the file at `path` with `contents`, creating parent directories.
///
/// # Errors
///
/// Returns an I/O error when the directory cannot be created or the file
/// cannot be written.
pub fn write_string(path: &Utf8Path, contents: &str) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    Dir::open_ambient_dir(parent, ambient_authority())?.write(file_name, contents)
}

/// Opens `path` for appending, creating the file and its parent directories.
///
/// # Errors
///
/// Returns an I/O error when the directory or file cannot be opened.
pub fn open_append(path: &Utf8Path) -> io::Result<std::fs::File> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    Dir::open_ambient_dir(parent, ambient_authority())?
        .open_with(file_name, &options)
        .map(cap_std::fs_utf8::File::into_std)
}
