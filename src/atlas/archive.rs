//! Versioned JSON archives for the persisted map files.
//!
//! Every store writes one file holding an envelope:
//! `{ "format": "...", "version": N, "payload": { ... } }`.
//! Loading checks both fields before touching the payload so a file written
//! by another store, or by an incompatible build, is rejected up front.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

/// Current archive layout version.
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    version: u32,
    payload: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    format: String,
    version: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    payload: T,
}

/// Serialize `payload` into `path` under the given format tag.
pub fn save<T: Serialize>(path: &Path, format: &str, payload: &T) -> Result<()> {
    let file = File::create(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let envelope = EnvelopeRef {
        format,
        version: ARCHIVE_VERSION,
        payload,
    };
    serde_json::to_writer(&mut writer, &envelope).map_err(|source| MapError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an archive written by [`save`] with the same format tag.
pub fn load<T: DeserializeOwned>(path: &Path, format: &str) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let header: EnvelopeHeader =
        serde_json::from_slice(&bytes).map_err(|source| MapError::Deserialize {
            path: path.to_path_buf(),
            source,
        })?;
    if header.format != format || header.version != ARCHIVE_VERSION {
        return Err(MapError::UnsupportedArchive {
            path: path.to_path_buf(),
            found: format!("{} v{}", header.format, header.version),
            expected: format!("{} v{}", format, ARCHIVE_VERSION),
        });
    }

    let envelope: Envelope<T> =
        serde_json::from_slice(&bytes).map_err(|source| MapError::Deserialize {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(envelope.payload)
}
