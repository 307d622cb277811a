//! Supported symbol validation
//!
//! The service only answers for symbols it actually has data files for.
//! The supported set is discovered from the import directory at startup
//! by scanning for `<SYMBOL>_values.csv` files; when the scan finds
//! nothing a built-in default set is used so the service still comes up
//! in an empty environment.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

/// Suffix of per-symbol data files, e.g. `BTC_values.csv`.
const VALUES_SUFFIX: &str = "_values.csv";

/// Fallback set when discovery finds no data files.
const DEFAULT_SYMBOLS: [&str; 5] = ["BTC", "ETH", "LTC", "XRP", "DOGE"];

/// Seam for deciding whether a symbol is served.
pub trait SymbolValidator: Send + Sync + 'static {
    /// Whether the symbol is in the supported set.
    fn is_supported(&self, symbol: &str) -> bool;

    /// The supported set, sorted.
    fn supported_symbols(&self) -> Vec<String>;
}

/// Validator backed by a fixed set of symbols.
pub struct SetBasedSymbolValidator {
    symbols: HashSet<String>,
}

impl SetBasedSymbolValidator {
    /// Build a validator from an explicit symbol list.
    pub fn new(symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a validator from the data files under `dir`.
    ///
    /// Every `<SYMBOL>_values.csv` file contributes its symbol. An
    /// unreadable or empty directory falls back to the default set.
    pub fn discover_from_directory(dir: &Path) -> Self {
        let mut symbols = HashSet::new();

        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if let Some(symbol) = name.strip_suffix(VALUES_SUFFIX) {
                        if !symbol.is_empty() {
                            symbols.insert(symbol.to_uppercase());
                        }
                    }
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot scan import directory for symbols");
            }
        }

        if symbols.is_empty() {
            warn!(dir = %dir.display(), "no symbol data files found, using default symbol set");
            symbols = DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect();
        } else {
            info!(count = symbols.len(), "discovered supported symbols from data files");
        }

        Self { symbols }
    }
}

impl SymbolValidator for SetBasedSymbolValidator {
    fn is_supported(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    fn supported_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }
}

/// Whether a string has the shape of a ticker: 3 to 10 ASCII uppercase
/// letters. Shape-invalid input is rejected before the supported-set
/// check so malformed requests never reach it.
pub fn is_valid_ticker(symbol: &str) -> bool {
    (3..=10).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_uppercase())
}
