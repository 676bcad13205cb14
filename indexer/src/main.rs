use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lawpy_core::config::{DEFAULT_BATCH_SIZE, DEFAULT_SEARCH_LIMIT, DEFAULT_STORE_DIR};
use lawpy_core::store::{GenerationWriter, SledStore};
use lawpy_core::{IndexReport, Indexer, Query, Retriever, SourceDocument, StopwordSet};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lawpy-indexer")]
#[command(about = "Build and query the legal opinion keyword index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Input path (.json / .jsonl file, or a directory searched recursively)
    #[arg(long)]
    input: String,
    /// Index store directory
    #[arg(long, default_value = DEFAULT_STORE_DIR)]
    store: String,
    /// Documents per parallel batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Worker threads (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,
    /// Extra stopword list, one word per line
    #[arg(long)]
    stopwords: Option<PathBuf>,
    /// Use only the --stopwords list instead of adding it to the built-in set
    #[arg(long, default_value_t = false, requires = "stopwords")]
    replace_stopwords: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new index generation from scratch and make it live
    Build(IndexArgs),
    /// Re-index documents into the live generation, replacing their postings
    Upsert(IndexArgs),
    /// Rank documents for a set of keywords and print them as JSON
    Search {
        /// Query keywords; quote multi-word phrases
        #[arg(required = true)]
        keywords: Vec<String>,
        /// Index store directory
        #[arg(long, default_value = DEFAULT_STORE_DIR)]
        store: String,
        /// Maximum number of results
        #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_SEARCH_LIMIT).unwrap_or(NonZeroUsize::MIN))]
        limit: NonZeroUsize,
        /// Give up if the lookups have not started within this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the manifest of the live generation
    Stats {
        /// Index store directory
        #[arg(long, default_value = DEFAULT_STORE_DIR)]
        store: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => build_index(&args),
        Commands::Upsert(args) => upsert_index(&args),
        Commands::Search { keywords, store, limit, timeout_ms } => search(&keywords, &store, limit, timeout_ms),
        Commands::Stats { store } => stats(&store),
    }
}

fn build_index(args: &IndexArgs) -> Result<()> {
    let indexer = prepare_indexer(args)?;
    let store = SledStore::open(&args.store).with_context(|| format!("opening store {}", args.store))?;
    let mut writer = store.begin_generation(indexer.stopwords().version())?;
    let report = index_inputs(&indexer, Path::new(&args.input), &mut writer)?;
    let manifest = store.commit(writer, report.rejected as u64)?;
    tracing::info!(store = %args.store, generation = manifest.generation, "index build complete");
    print_json(&manifest)
}

fn upsert_index(args: &IndexArgs) -> Result<()> {
    let indexer = prepare_indexer(args)?;
    let store = SledStore::open(&args.store).with_context(|| format!("opening store {}", args.store))?;
    let mut writer = store.open_current(indexer.stopwords().version())?;
    let report = index_inputs(&indexer, Path::new(&args.input), &mut writer)?;
    let manifest = store.commit(writer, report.rejected as u64)?;
    tracing::info!(store = %args.store, generation = manifest.generation, documents = report.documents, "upsert complete");
    print_json(&manifest)
}

fn search(keywords: &[String], store: &str, limit: NonZeroUsize, timeout_ms: Option<u64>) -> Result<()> {
    let store = SledStore::open(store).with_context(|| format!("opening store {store}"))?;
    let mut query = Query::new(keywords).with_limit(limit);
    if let Some(ms) = timeout_ms {
        query = query.with_timeout(Duration::from_millis(ms));
    }
    let results = Retriever::new(&store).search(&query)?;
    print_json(&results)
}

fn stats(store: &str) -> Result<()> {
    let store = SledStore::open(store).with_context(|| format!("opening store {store}"))?;
    match store.manifest()? {
        Some(manifest) => print_json(&manifest),
        None => bail!("store has no committed index generation"),
    }
}

fn prepare_indexer(args: &IndexArgs) -> Result<Indexer> {
    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new().num_threads(n).build_global()?;
    }
    let stopwords = load_stopwords(args.stopwords.as_deref(), args.replace_stopwords)?;
    tracing::info!(version = stopwords.version(), words = stopwords.len(), "stopword set loaded");
    Ok(Indexer::new(stopwords).with_batch_size(args.batch_size))
}

fn load_stopwords(file: Option<&Path>, replace: bool) -> Result<StopwordSet> {
    let Some(file) = file else { return Ok(StopwordSet::legal()) };
    let custom = StopwordSet::from_file(file)?;
    Ok(if replace { custom } else { StopwordSet::legal().merge(custom) })
}

fn index_inputs(indexer: &Indexer, input: &Path, writer: &mut GenerationWriter) -> Result<IndexReport> {
    let files = discover_inputs(input)?;
    if files.is_empty() {
        bail!("no .json or .jsonl input found at {}", input.display());
    }
    let mut report = IndexReport::default();
    for file in files {
        let (records, malformed) = read_records(&file)?;
        tracing::info!(file = %file.display(), records = records.len(), malformed, "indexing file");
        let file_report = indexer.run(records, &mut *writer)?;
        report.absorb(&file_report);
        report.rejected += malformed;
    }
    tracing::info!(
        documents = report.documents,
        rejected = report.rejected,
        postings = report.postings,
        "ingested documents"
    );
    Ok(report)
}

fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && is_input_file(p) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input path {} does not exist", input.display());
    }
    Ok(files)
}

fn is_input_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json" | "jsonl"))
}

/// Decode every record of one export file. Lines or array elements that are
/// not valid records are skipped and counted.
fn read_records(file: &Path) -> Result<(Vec<SourceDocument>, usize)> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    let mut records = Vec::new();
    let mut malformed = 0;

    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SourceDocument>(&line) {
                Ok(doc) => records.push(doc),
                Err(e) => {
                    tracing::warn!(file = %file.display(), line = lineno + 1, error = %e, "skipping malformed record");
                    malformed += 1;
                }
            }
        }
        return Ok((records, malformed));
    }

    let json: serde_json::Value =
        serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
    let values = match json {
        serde_json::Value::Array(arr) => arr,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => bail!("{} holds neither an object nor an array", file.display()),
    };
    for (idx, v) in values.into_iter().enumerate() {
        match serde_json::from_value::<SourceDocument>(v) {
            Ok(doc) => records.push(doc),
            Err(e) => {
                tracing::warn!(file = %file.display(), index = idx, error = %e, "skipping malformed record");
                malformed += 1;
            }
        }
    }
    Ok((records, malformed))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lawpy_core::IndexReader;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_jsonl_and_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        fs::write(
            &path,
            "{\"id\":\"d1\",\"textBlock\":\"custody\",\"link\":\"u1\",\"title\":\"T1\"}\n\nnot json\n{\"_id\":{\"$oid\":\"d2\"},\"text\":\"divorce\"}\n",
        )
        .unwrap();
        let (records, malformed) = read_records(&path).unwrap();
        assert_eq!(malformed, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "u1");
        assert_eq!(records[1].doc_id.as_deref(), Some("d2"));
    }

    #[test]
    fn reads_json_array_and_single_object() {
        let dir = tempdir().unwrap();
        let arr = dir.path().join("a.json");
        fs::write(&arr, r#"[{"id":"d1","text":"x"},{"id":"d2","text":"y"},42]"#).unwrap();
        let (records, malformed) = read_records(&arr).unwrap();
        assert_eq!((records.len(), malformed), (2, 1));

        let one = dir.path().join("b.json");
        fs::write(&one, r#"{"id":"d3","text":"z"}"#).unwrap();
        let (records, _) = read_records(&one).unwrap();
        assert_eq!(records[0].doc_id.as_deref(), Some("d3"));
    }

    #[test]
    fn discovers_inputs_recursively() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("nested/b.jsonl"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let files = discover_inputs(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_input_file(f)));
        assert!(discover_inputs(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn builds_and_upserts_through_the_store() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("ops.jsonl");
        fs::write(
            &input,
            "{\"id\":\"d1\",\"text\":\"Child custody dispute after divorce.\"}\n{\"text\":\"no id\"}\n",
        )
        .unwrap();
        let store = SledStore::open(dir.path().join("store")).unwrap();
        let indexer = Indexer::default();

        let mut writer = store.begin_generation(indexer.stopwords().version()).unwrap();
        let report = index_inputs(&indexer, &input, &mut writer).unwrap();
        assert_eq!((report.documents, report.rejected), (1, 1));
        store.commit(writer, report.rejected as u64).unwrap();

        fs::write(&input, "{\"id\":\"d1\",\"text\":\"Alimony only.\"}\n").unwrap();
        let mut writer = store.open_current(indexer.stopwords().version()).unwrap();
        index_inputs(&indexer, &input, &mut writer).unwrap();
        store.commit(writer, 0).unwrap();

        assert!(store.postings_for(&["custody".into()]).unwrap().is_empty());
        assert_eq!(store.postings_for(&["alimony".into()]).unwrap().len(), 1);
    }

    #[test]
    fn custom_stopwords_merge_or_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stop.txt");
        fs::write(&path, "version: fam-1\nminor\n").unwrap();
        let merged = load_stopwords(Some(&path), false).unwrap();
        assert!(merged.contains("minor") && merged.contains("court"));
        let replaced = load_stopwords(Some(&path), true).unwrap();
        assert!(replaced.contains("minor") && !replaced.contains("court"));
        assert_eq!(replaced.version(), "fam-1");
    }
}
