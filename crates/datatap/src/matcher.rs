//! Pattern expansion of request URIs.
//!
//! A request URI is either an exact object reference or, in glob and regex
//! modes, a pattern over the basenames of its parent directory. Expansion
//! lists the directory through the scheme's fetcher, filters the names, and
//! returns full URIs in lexicographic order so downstream concatenation is
//! deterministic.

use glob::Pattern;
use regex::Regex;
use serde::Serialize;

use datatap_io::uri::{join_uri, split_uri};
use datatap_io::{FetcherOptions, Registry};

use crate::error::Error;

/// How a request URI designates its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The URI names exactly one object; no listing happens.
    #[default]
    Exact,
    /// The basename is a glob pattern over the parent directory.
    Glob,
    /// The basename is a regex matched from the start of each sibling name.
    Regex,
}

/// Expand a request URI into the sorted list of concrete URIs it designates.
pub fn expand(
    registry: &Registry,
    uri: &str,
    mode: MatchMode,
    options: &FetcherOptions,
) -> Result<Vec<String>, Error> {
    if mode == MatchMode::Exact {
        return Ok(vec![uri.to_string()]);
    }

    let (dirpath, pattern) = split_uri(uri);
    let mut fetcher = registry.get(uri, options)?;
    let mut names = fetcher.listdir(dirpath)?;
    names.sort();

    let matched: Vec<String> = match mode {
        MatchMode::Exact => unreachable!(),
        MatchMode::Glob => {
            let pattern = Pattern::new(pattern)?;
            names
                .into_iter()
                .filter(|name| pattern.matches(name))
                .collect()
        }
        MatchMode::Regex => {
            // anchored at the start, like a prefix match
            let pattern = Regex::new(&format!("^(?:{pattern})"))?;
            names
                .into_iter()
                .filter(|name| pattern.is_match(name))
                .collect()
        }
    };

    Ok(matched
        .into_iter()
        .map(|name| join_uri(dirpath, &name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatap_io::{FetchError, FetchedFile, Fetcher};

    struct FakeDir(Vec<String>);

    impl Fetcher for FakeDir {
        fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError> {
            Err(FetchError::NotFound(uri.to_string()))
        }

        fn listdir(&mut self, _dirpath: &str) -> Result<Vec<String>, FetchError> {
            Ok(self.0.clone())
        }

        fn mtime(&mut self, _uri: &str) -> Result<Option<i64>, FetchError> {
            Ok(None)
        }
    }

    fn registry_with(names: &[&str]) -> Registry {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let mut registry = Registry::empty();
        registry.register(&["fake"], move |_| Box::new(FakeDir(names.clone())));
        registry
    }

    #[test]
    fn test_exact_mode_passes_through() {
        let registry = Registry::empty();
        let uris = expand(
            &registry,
            "fake://host/dir/a.csv",
            MatchMode::Exact,
            &FetcherOptions::default(),
        )
        .unwrap();
        assert_eq!(uris, vec!["fake://host/dir/a.csv"]);
    }

    #[test]
    fn test_glob_expansion_is_sorted() {
        let registry = registry_with(&["0_1.csv", "1_0.csv", "0_0.csv"]);
        let uris = expand(
            &registry,
            "fake://host/dir/0_*.csv",
            MatchMode::Glob,
            &FetcherOptions::default(),
        )
        .unwrap();
        assert_eq!(
            uris,
            vec!["fake://host/dir/0_0.csv", "fake://host/dir/0_1.csv"]
        );
    }

    #[test]
    fn test_regex_matches_from_the_start() {
        let registry = registry_with(&["jan.csv", "feb.csv", "notes-jan.csv"]);
        let uris = expand(
            &registry,
            r"fake://host/dir/(jan|feb)\.csv",
            MatchMode::Regex,
            &FetcherOptions::default(),
        )
        .unwrap();
        // "notes-jan.csv" contains the pattern but does not start with it
        assert_eq!(
            uris,
            vec!["fake://host/dir/feb.csv", "fake://host/dir/jan.csv"]
        );
    }

    #[test]
    fn test_glob_and_equivalent_regex_agree() {
        let registry = registry_with(&["0_1.csv", "1_0.csv", "0_0.csv", "0_2.txt"]);
        let options = FetcherOptions::default();
        let globbed = expand(
            &registry,
            "fake://host/dir/0_*.csv",
            MatchMode::Glob,
            &options,
        )
        .unwrap();
        let rexed = expand(
            &registry,
            r"fake://host/dir/0_.*\.csv",
            MatchMode::Regex,
            &options,
        )
        .unwrap();
        assert_eq!(globbed, rexed);
        assert_eq!(
            globbed,
            vec!["fake://host/dir/0_0.csv", "fake://host/dir/0_1.csv"]
        );
    }

    #[test]
    fn test_no_match_yields_empty_list() {
        let registry = registry_with(&["a.csv"]);
        let uris = expand(
            &registry,
            "fake://host/dir/*.parquet",
            MatchMode::Glob,
            &FetcherOptions::default(),
        )
        .unwrap();
        assert!(uris.is_empty());
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let registry = registry_with(&["a.csv"]);
        let err = expand(
            &registry,
            "fake://host/dir/a(.csv",
            MatchMode::Regex,
            &FetcherOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RegexPattern(_)));
    }
}
