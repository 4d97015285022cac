use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Entry {
    name: String,
    dir: bool,
    data: Vec<u8>,
}

/// Combines two zip archives into one. An entry in `overlay` replaces the `base` entry with the
/// same path but keeps its position.
pub fn merge_zips(base: &[u8], overlay: &[u8]) -> Result<Vec<u8>, MergeError> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for bytes in [base, overlay] {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            let entry = Entry {
                name: file.name().to_string(),
                dir: file.is_dir(),
                data,
            };
            match positions.get(&entry.name) {
                Some(&at) => entries[at] = entry,
                None => {
                    positions.insert(entry.name.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        if entry.dir {
            writer.add_directory(entry.name, options)?;
        } else {
            writer.start_file(entry.name, options)?;
            writer.write_all(&entry.data)?;
        }
    }
    Ok(writer.finish()?.into_inner())
}
