use anyhow::{Context, Result, anyhow};
use log::debug;
use std::{
    fmt::Write as _,
    io::Write,
    path::Path,
    sync::Mutex,
};

use crate::utils::get_output_writer;

/// Shared append-only destination for distance rows.
///
/// Each call writes one complete line while holding the lock, so rows from
/// concurrent workers never interleave. Row order across files is whatever
/// order the workers finish in.
pub struct ResultSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ResultSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        ResultSink {
            writer: Mutex::new(writer),
        }
    }

    /// Creates the output file, compressed according to its extension.
    pub fn create(path: &Path) -> Result<Self> {
        let writer = get_output_writer(path)
            .with_context(|| format!("Failed to create distance matrix output: {:?}", path))?;
        Ok(Self::new(writer))
    }

    /// Writes `#filenames<TAB>bin_1<TAB>...`.
    pub fn write_header<S: AsRef<str>>(&self, bin_names: &[S]) -> Result<()> {
        let mut line = String::from("#filenames");
        for name in bin_names {
            line.push('\t');
            line.push_str(name.as_ref());
        }
        line.push('\n');
        self.write_line(&line)
    }

    /// Writes one already formatted, newline-terminated row.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Result sink lock poisoned"))?;
        writer
            .write_all(line.as_bytes())
            .context("Failed to write row to distance matrix")
    }

    pub fn flush(&self) -> Result<()> {
        debug!("Flushing distance matrix output");
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Result sink lock poisoned"))?;
        writer.flush().context("Failed to flush distance matrix output")
    }
}

/// Formats `filename<TAB>score_1<TAB>...\n` into `buf`, replacing its content.
pub fn format_row(buf: &mut String, filename: &str, scores: &[f64]) {
    buf.clear();
    buf.push_str(filename);
    for score in scores {
        // Writing into a String cannot fail
        let _ = write!(buf, "\t{}", score);
    }
    buf.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::Arc,
        thread,
    };

    /// Writer that records each write_all call separately.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_format_row() {
        let mut buf = String::from("stale");
        format_row(&mut buf, "q.fa", &[0.25, 1.0, f64::NAN]);
        assert_eq!(buf, "q.fa\t0.25\t1\tNaN\n");
        format_row(&mut buf, "empty.fa", &[]);
        assert_eq!(buf, "empty.fa\n");
    }

    #[test]
    fn test_header() {
        let recorder = Recorder::default();
        let sink = ResultSink::new(Box::new(recorder.clone()));
        sink.write_header(&["bin1", "bin2"]).unwrap();
        let out = String::from_utf8(recorder.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "#filenames\tbin1\tbin2\n");
    }

    #[test]
    fn test_concurrent_rows_do_not_interleave() {
        let recorder = Recorder::default();
        let sink = Arc::new(ResultSink::new(Box::new(recorder.clone())));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    let mut buf = String::new();
                    for i in 0..200 {
                        let scores = vec![t as f64; 16];
                        format_row(&mut buf, &format!("file_{}_{}", t, i), &scores);
                        sink.write_line(&buf).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let out = String::from_utf8(recorder.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 8 * 200);
        for line in lines {
            let fields: Vec<&str> = line.split('\t').collect();
            assert_eq!(fields.len(), 17, "malformed row: {}", line);
            let t: usize = fields[0].split('_').nth(1).unwrap().parse().unwrap();
            assert!(fields[1..].iter().all(|f| *f == t.to_string()));
        }
    }
}
