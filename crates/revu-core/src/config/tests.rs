use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 10] = [
    "REVU_QDRANT_URL",
    "REVU_CHUNK_SIZE",
    "REVU_CHUNK_OVERLAP",
    "REVU_CACHE_MAX_ENTRIES",
    "REVU_CACHE_TTL_SECS",
    "REVU_TOKEN_BUDGET",
    "REVU_TOP_K",
    "REVU_MIN_SCORE",
    "REVU_BATCH_SIZE",
    "REVU_LOG_LEVEL",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
#[serial]
fn defaults_when_file_missing() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/revu.toml")).unwrap();
    assert_eq!(config.chunker.chunk_size, 60);
    assert_eq!(config.chunker.overlap_lines, 5);
    assert_eq!(config.cache.max_entries, 10_000);
    assert_eq!(config.cache.ttl_secs, 604_800);
    assert_eq!(config.retrieval.top_k, 10);
    assert!((config.retrieval.min_score - 0.25).abs() < f32::EPSILON);
    assert_eq!(config.prompt.token_budget, 8000);
    assert_eq!(config.indexer.batch_size, 10);
    assert_eq!(config.store.qdrant_url, None);
    assert_eq!(config.indexer_config().vector_size, None);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn parses_partial_file() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[chunker]
chunk_size = 80

[scoring]
semantic = 0.7

[retrieval]
collection = "custom_chunks"
include_insights = false

[cache]
persist_path = "/tmp/revu-cache.json"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.chunker.chunk_size, 80);
    assert_eq!(config.chunker.overlap_lines, 5);
    assert!((config.scoring.semantic - 0.7).abs() < f32::EPSILON);
    assert!((config.scoring.recency - 0.1).abs() < f32::EPSILON);
    assert_eq!(config.retrieval.collection, "custom_chunks");
    assert!(!config.retrieval.include_insights);
    assert_eq!(
        config.cache_config().persist_path.as_deref(),
        Some(Path::new("/tmp/revu-cache.json"))
    );
    assert_eq!(config.indexer_config().collection, "custom_chunks");
}

#[test]
#[serial]
fn env_overrides_file_values() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[prompt]\ntoken_budget = 4000\n").unwrap();

    unsafe {
        std::env::set_var("REVU_TOKEN_BUDGET", "2000");
        std::env::set_var("REVU_TOP_K", "3");
        std::env::set_var("REVU_MIN_SCORE", "0.5");
        std::env::set_var("REVU_QDRANT_URL", "http://qdrant:6334");
        std::env::set_var("REVU_CACHE_TTL_SECS", "60");
    }
    let config = Config::load(file.path()).unwrap();
    clear_env();

    assert_eq!(config.prompt.token_budget, 2000);
    assert_eq!(config.retrieval.top_k, 3);
    assert!((config.retrieval.min_score - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.store.qdrant_url.as_deref(), Some("http://qdrant:6334"));
    assert_eq!(config.cache_config().ttl, Duration::from_secs(60));
}

#[test]
#[serial]
fn store_section_reaches_the_indexer() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "[store]\nqdrant_url = \"http://localhost:6334\"\nvector_size = 384\n"
    )
    .unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.store.qdrant_url.as_deref(), Some("http://localhost:6334"));
    assert_eq!(config.indexer_config().vector_size, Some(384));

    unsafe { std::env::set_var("REVU_QDRANT_URL", "") };
    let config = Config::load(file.path()).unwrap();
    clear_env();
    assert_eq!(config.store.qdrant_url, None);

    let mut bad = tempfile::NamedTempFile::new().unwrap();
    write!(bad, "[store]\nqdrant_url = \"localhost:6334\"\n").unwrap();
    assert!(Config::load(bad.path()).is_err());

    let mut zero = tempfile::NamedTempFile::new().unwrap();
    write!(zero, "[store]\nvector_size = 0\n").unwrap();
    assert!(Config::load(zero.path()).is_err());
}

#[test]
#[serial]
fn invalid_env_value_is_ignored() {
    clear_env();
    unsafe { std::env::set_var("REVU_CHUNK_SIZE", "lots") };
    let config = Config::load(Path::new("/nonexistent/revu.toml")).unwrap();
    clear_env();
    assert_eq!(config.chunker.chunk_size, 60);
}

#[test]
#[serial]
fn rejects_invalid_values() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[chunker]\nchunk_size = 4\noverlap_lines = 4\n").unwrap();
    let err = Config::load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("[chunker]"));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[prompt]\ntoken_budget = 0\n").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[chunker\nchunk_size = ").unwrap();
    let err = Config::load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
fn runtime_options_follow_sections() {
    let config = Config::default();
    let prompt = config.prompt_options();
    assert_eq!(prompt.token_budget, 8000);
    assert!((prompt.fractions.context - 0.6).abs() < f32::EPSILON);

    let retriever = config.retriever_config();
    assert_eq!(retriever.collection, "revu_code_chunks");
    assert_eq!(retriever.timeout, Duration::from_secs(30));

    let indexer = config.indexer_config();
    assert_eq!(indexer.retry.max_attempts, 3);
    assert_eq!(indexer.chunker, config.chunker_config());
}
