//! Numerically named segment files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{WalError, WalResult};

/// Path of segment `number` inside `dir`.
pub fn path(dir: &Path, number: u64) -> PathBuf {
    dir.join(number.to_string())
}

/// Segment numbers present in `dir`, ascending. Non-numeric entries are ignored.
/// A missing directory holds no segments.
pub fn list(dir: &Path) -> WalResult<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut numbers = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// The segment currently receiving appends.
pub(crate) struct ActiveSegment {
    dir: PathBuf,
    number: u64,
    writer: BufWriter<File>,
    /// Records written to this segment so far.
    events: u64,
}

impl ActiveSegment {
    /// Open the highest-numbered segment in `dir`, or segment 1 if there is none.
    pub fn open_latest(dir: &Path) -> WalResult<Self> {
        if dir.exists() && !dir.is_dir() {
            return Err(WalError::NotADirectory(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let number = list(dir)?.last().copied().unwrap_or(1);
        let events = count_lines(&path(dir, number))?;
        let writer = BufWriter::new(open_append(&path(dir, number))?);
        Ok(Self {
            dir: dir.to_path_buf(),
            number,
            writer,
            events,
        })
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    /// Append a batch of encoded lines and push them to the OS.
    pub fn append(&mut self, batch: &str, count: u64, fsync: bool) -> io::Result<()> {
        self.writer.write_all(batch.as_bytes())?;
        self.writer.flush()?;
        if fsync {
            self.writer.get_ref().sync_data()?;
        }
        self.events += count;
        Ok(())
    }

    /// Close this segment and continue in the next number.
    pub fn rotate(&mut self) -> WalResult<u64> {
        let next = self.number + 1;
        let file = open_append(&path(&self.dir, next)).map_err(|source| WalError::Rotate {
            segment: next,
            source,
        })?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writer = BufWriter::new(file);
        self.number = next;
        self.events = 0;
        Ok(next)
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn count_lines(path: &Path) -> io::Result<u64> {
    match File::open(path) {
        Ok(file) => {
            let mut n = 0;
            for line in BufReader::new(file).lines() {
                if !line?.is_empty() {
                    n += 1;
                }
            }
            Ok(n)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_sorts_numerically_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10", "2", "1", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("3")).unwrap();
        assert_eq!(list(dir.path()).unwrap(), vec![1, 2, 10]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn open_latest_resumes_highest_segment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(path(dir.path(), 1), "a\n").unwrap();
        fs::write(path(dir.path(), 4), "a\nb\n").unwrap();
        let segment = ActiveSegment::open_latest(dir.path()).unwrap();
        assert_eq!(segment.number(), 4);
        assert_eq!(segment.events(), 2);
    }

    #[test]
    fn open_latest_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("log");
        let segment = ActiveSegment::open_latest(&log_dir).unwrap();
        assert_eq!(segment.number(), 1);
        assert!(path(&log_dir, 1).exists());
    }

    #[test]
    fn rotate_moves_to_next_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = ActiveSegment::open_latest(dir.path()).unwrap();
        segment.append("x\n", 1, false).unwrap();
        assert_eq!(segment.rotate().unwrap(), 2);
        assert_eq!(segment.events(), 0);
        segment.append("y\n", 1, false).unwrap();
        assert_eq!(fs::read_to_string(path(dir.path(), 1)).unwrap(), "x\n");
        assert_eq!(fs::read_to_string(path(dir.path(), 2)).unwrap(), "y\n");
    }
}
