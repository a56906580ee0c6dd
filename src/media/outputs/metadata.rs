// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::Metadata;
use crate::errors::OutputError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One JSON object per line, one line per frame
pub struct MetadataWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl MetadataWriter {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let file = File::create(path).map_err(|source| OutputError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    pub fn write(&mut self, metadata: &Metadata) -> Result<(), OutputError> {
        serde_json::to_writer(&mut self.out, metadata)?;
        self.out.write_all(b"\n").map_err(|source| OutputError::File {
            path: self.path.clone(),
            source,
        })
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.out.flush().map_err(|source| OutputError::File {
            path: self.path.clone(),
            source,
        })
    }
}
