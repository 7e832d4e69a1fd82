use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::source::Sample;

/// Line-per-sample CSV writer for one unit's output file.
///
/// Records are `timestamp,value,status` with no header row. The file is
/// removed on drop unless [`RecordSink::finish`] succeeded, so a unit that
/// fails, is cancelled or unwinds leaves no partial output behind.
pub struct RecordSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    records: u64,
    finished: bool,
}

impl RecordSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            records: 0,
            finished: false,
        })
    }

    pub fn write(&mut self, sample: &Sample) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        let timestamp = sample.timestamp.to_string();
        let value = sample.value.to_string();
        writer.write_record([timestamp.as_str(), value.as_str(), sample.status.as_str()])?;
        self.records += 1;
        Ok(())
    }

    /// Flush and sync the file, returning the number of records written.
    /// A file that cannot be completed is removed.
    pub fn finish(mut self) -> io::Result<u64> {
        let mut writer = self.writer.take().ok_or_else(closed)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);
        self.finished = true;
        Ok(self.records)
    }

    /// Close the sink and delete whatever was written.
    pub fn abandon(self) {
        drop(self);
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        // Close before removing; open files cannot be deleted everywhere.
        drop(self.writer.take());
        if !self.finished {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "record sink already closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_plain_lines_without_header() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let mut sink = RecordSink::create(&path).unwrap();
        sink.write(&Sample::new(100, 1.5, "Good")).unwrap();
        sink.write(&Sample::new(200, 2.0, "Suspect")).unwrap();
        sink.write(&Sample::new(-5, -0.25, "")).unwrap();
        assert_eq!(sink.finish().unwrap(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "100,1.5,Good\n200,2,Suspect\n-5,-0.25,\n");
    }

    #[test]
    fn status_with_delimiter_is_quoted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let mut sink = RecordSink::create(&path).unwrap();
        sink.write(&Sample::new(1, 3.0, "Bad, stale")).unwrap();
        sink.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,3,\"Bad, stale\"\n");
    }

    #[test]
    fn abandon_removes_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let mut sink = RecordSink::create(&path).unwrap();
        sink.write(&Sample::new(1, 1.0, "Good")).unwrap();
        sink.abandon();
        assert!(!path.exists());
    }

    #[test]
    fn dropped_sink_removes_partial_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        {
            let mut sink = RecordSink::create(&path).unwrap();
            sink.write(&Sample::new(1, 1.0, "Good")).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn unwinding_removes_partial_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let result = std::panic::catch_unwind(|| {
            let mut sink = RecordSink::create(&path).unwrap();
            sink.write(&Sample::new(1, 1.0, "Good")).unwrap();
            panic!("writer crashed");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn finished_file_survives_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let mut sink = RecordSink::create(&path).unwrap();
        sink.write(&Sample::new(1, 1.0, "Good")).unwrap();
        sink.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,1,Good\n");
    }

    #[test]
    fn create_in_missing_dir_fails() {
        let temp = tempdir().unwrap();
        assert!(RecordSink::create(&temp.path().join("nope").join("out.csv")).is_err());
    }
}
