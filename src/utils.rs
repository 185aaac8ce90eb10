use anyhow::{Context, Result};
use flate2::{Compression as GzCompression, read::MultiGzDecoder, write::GzEncoder};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use psutil::process::Process;
use std::{
    ffi::OsString,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};
use xz2::{read::XzDecoder, write::XzEncoder};
use zstd::{stream::read::Decoder as ZstdDecoder, stream::write::Encoder as ZstdEncoder};

/// Worker count for a run: `0` means one per logical core.
pub fn get_num_threads(requested: usize) -> usize {
    let threads = match requested {
        0 => num_cpus::get(),
        n => n,
    };
    debug!("Running with {} worker threads", threads);
    threads
}

/// Builds the worker pool used for one run. It is created once and reused
/// for every chunk of files.
pub fn build_thread_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("orion-worker-{}", i))
        .build()
        .context("Failed to build worker thread pool")
}

/// Runs `func` under a progress bar sized for `total_items` files, then logs
/// the elapsed time and the resident memory of the process.
pub fn track_progress_and_resources<F, R>(label: &str, total_items: u64, func: F) -> Result<R>
where
    F: FnOnce(&ProgressBar) -> Result<R>,
{
    info!("{}: {} files queued", label, total_items);
    let started = Instant::now();

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta}) {msg}")
        .unwrap_or_else(|e| {
            debug!("Falling back to default progress style: {}", e);
            ProgressStyle::default_bar()
        })
        .progress_chars("#>-");
    let pb = ProgressBar::new(total_items).with_style(style);

    let result = func(&pb);
    pb.finish_with_message(format!("{} done", label));

    info!("{} took {:.2?}", label, started.elapsed());
    log_resident_memory(label);
    result
}

fn log_resident_memory(label: &str) {
    let rss = Process::current()
        .map_err(|e| e.to_string())
        .and_then(|process| process.memory_info().map_err(|e| e.to_string()));
    match rss {
        Ok(mem) => info!("{}: resident memory {} MB", label, mem.rss() >> 20),
        Err(e) => debug!("Could not read process memory usage: {}", e),
    }
}

/// Stream compression, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Gzip,
    Xz,
    Zstd,
}

impl Codec {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("gz") => Codec::Gzip,
            Some("xz") => Codec::Xz,
            Some("zst") | Some("zstd") => Codec::Zstd,
            _ => Codec::Plain,
        }
    }
}

/// Opens a query, manifest or index file, decompressing `.gz`, `.xz` and
/// `.zst` transparently. The reader is `Send` so any worker can parse it.
pub fn get_input_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let codec = Codec::from_path(path);
    debug!("Opening {:?} for reading ({:?})", path, codec);
    let reader: Box<dyn BufRead + Send> = match codec {
        Codec::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Codec::Xz => Box::new(BufReader::new(XzDecoder::new(file))),
        Codec::Zstd => Box::new(BufReader::new(
            ZstdDecoder::new(file).with_context(|| format!("Failed to start zstd stream for {:?}", path))?,
        )),
        Codec::Plain => Box::new(BufReader::new(file)),
    };
    Ok(reader)
}

/// Creates an output file compressed according to its extension.
/// Compressed streams are finalized when the writer is dropped.
pub fn get_output_writer(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let codec = Codec::from_path(path);
    debug!("Opening {:?} for writing ({:?})", path, codec);
    let writer: Box<dyn Write + Send> = match codec {
        Codec::Gzip => Box::new(BufWriter::new(GzEncoder::new(file, GzCompression::default()))),
        Codec::Xz => Box::new(BufWriter::new(XzEncoder::new(file, 6))),
        Codec::Zstd => Box::new(BufWriter::new(
            ZstdEncoder::new(file, 0)
                .with_context(|| format!("Failed to start zstd stream for {:?}", path))?
                .auto_finish(),
        )),
        Codec::Plain => Box::new(BufWriter::new(file)),
    };
    Ok(writer)
}

/// `<path>.<suffix>`, keeping the full original file name.
pub fn with_appended_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_with_appended_suffix() {
        assert_eq!(
            with_appended_suffix(Path::new("/tmp/out.tsv"), "time"),
            PathBuf::from("/tmp/out.tsv.time")
        );
    }

    #[test]
    fn test_compressed_roundtrip_by_extension() -> Result<()> {
        let dir = TempDir::new()?;
        for name in ["plain.txt", "data.gz", "data.xz", "data.zst"] {
            let path = dir.path().join(name);
            {
                let mut writer = get_output_writer(&path)?;
                writer.write_all(b"ACGT\nTTGA\n")?;
                writer.flush()?;
            }
            let mut content = String::new();
            get_input_reader(&path)?.read_to_string(&mut content)?;
            assert_eq!(content, "ACGT\nTTGA\n", "{}", name);
        }
        Ok(())
    }

    #[test]
    fn test_codec_from_path() {
        assert_eq!(Codec::from_path(Path::new("a.fa.GZ")), Codec::Gzip);
        assert_eq!(Codec::from_path(Path::new("idx.bin.zstd")), Codec::Zstd);
        assert_eq!(Codec::from_path(Path::new("reads.xz")), Codec::Xz);
        assert_eq!(Codec::from_path(Path::new("reads.fq")), Codec::Plain);
        assert_eq!(Codec::from_path(Path::new("noext")), Codec::Plain);
    }

    #[test]
    fn test_get_num_threads() {
        assert_eq!(get_num_threads(3), 3);
        assert!(get_num_threads(0) >= 1);
    }
}
