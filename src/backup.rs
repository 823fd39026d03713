use anyhow::{anyhow, Context};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

pub const MOODLE_XML_ENTRY: &str = "moodle.xml";
pub const COURSE_FILES_DIR: &str = "course_files";

/// A 1.9-era course backup, either still zipped or already unpacked.
pub enum LegacyBackup {
    Folder(PathBuf),
    Zip(ZipArchive<File>),
}

impl LegacyBackup {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if path.is_dir() {
            if !path.join(MOODLE_XML_ENTRY).is_file() {
                return Err(anyhow!(
                    "{} not found in {}",
                    MOODLE_XML_ENTRY,
                    path.to_string_lossy()
                ));
            }
            return Ok(Self::Folder(path.to_path_buf()));
        }
        if !is_zip_file(path)? {
            return Err(anyhow!(
                "not a backup folder or zip archive: {}",
                path.to_string_lossy()
            ));
        }
        let f = File::open(path)
            .with_context(|| format!("failed to open backup {}", path.to_string_lossy()))?;
        let archive = ZipArchive::new(f).context("invalid zip archive")?;
        Ok(Self::Zip(archive))
    }

    pub fn read_moodle_xml(&mut self) -> anyhow::Result<String> {
        let bytes = self
            .read_entry(MOODLE_XML_ENTRY)?
            .ok_or_else(|| anyhow!("backup missing {}", MOODLE_XML_ENTRY))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads `course_files/<rel>`; `Ok(None)` when the backup does not ship it.
    pub fn read_course_file(&mut self, rel: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() || rel.split('/').any(|seg| seg == "..") {
            return Err(anyhow!("refusing course file path {}", rel));
        }
        self.read_entry(&format!("{}/{}", COURSE_FILES_DIR, rel))
    }

    fn read_entry(&mut self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self {
            Self::Folder(root) => {
                let p = root.join(name);
                if !p.is_file() {
                    return Ok(None);
                }
                let bytes = std::fs::read(&p)
                    .with_context(|| format!("failed to read {}", p.to_string_lossy()))?;
                Ok(Some(bytes))
            }
            Self::Zip(archive) => match archive.by_name(name) {
                Ok(mut entry) => {
                    let mut buf = Vec::new();
                    entry
                        .read_to_end(&mut buf)
                        .with_context(|| format!("failed to read zip entry {}", name))?;
                    Ok(Some(buf))
                }
                Err(ZipError::FileNotFound) => Ok(None),
                Err(e) => Err(e).with_context(|| format!("failed to open zip entry {}", name)),
            },
        }
    }
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
