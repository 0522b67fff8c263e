pub mod classify;
pub mod evaluate;
pub mod init;
pub mod localize;

use std::io::Read;
use std::path::Path;

use crate::collab::{Corpus, CorpusProvider, JsonCorpus};
use crate::config::{self, Config};
use crate::error::{FaultlineError, Result};
use crate::scanner::{self, SourceTreeCorpus};

/// Load the discovered config, or defaults when none exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match config::find_config_file(explicit) {
        Some(p) => Config::load(&p),
        None => Ok(Config::default()),
    }
}

/// Read a bug report from a file, or from stdin when `input` is `-`.
pub fn read_report(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| FaultlineError::io("reading bug report from stdin", e))?;
        return Ok(text);
    }
    std::fs::read_to_string(input)
        .map_err(|e| FaultlineError::io(format!("reading bug report '{input}'"), e))
}

/// Corpus from a JSON file when given, otherwise from scanning `root`.
pub fn load_corpus(json: Option<&Path>, root: &Path, config: &Config) -> Result<Corpus> {
    match json {
        Some(path) => JsonCorpus::new(path).load(),
        None => {
            let options = scanner::scan_options_from_config(&config.scan, root);
            SourceTreeCorpus::new(options)?.load()
        }
    }
}
