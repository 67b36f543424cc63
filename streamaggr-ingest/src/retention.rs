//! What happens to raw input rows once a rule set has matched them

use streamaggr_core::MetricRow;

/// Fate of input rows after aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputRetention {
    /// Rows matched by at least one rule are dropped, the rest are stored
    #[default]
    DropMatched,
    /// Every row is stored, matched or not
    KeepAll,
    /// No row is stored
    DropAll,
}

impl InputRetention {
    /// Build from the `keep_input` / `drop_input` flags.
    ///
    /// `keep_input` wins if both are set; configuration validation rejects
    /// that combination before it gets here.
    pub fn from_flags(keep_input: bool, drop_input: bool) -> Self {
        match (keep_input, drop_input) {
            (true, _) => InputRetention::KeepAll,
            (false, true) => InputRetention::DropAll,
            (false, false) => InputRetention::DropMatched,
        }
    }

    /// Whether a row with the given match flag should be stored
    pub fn keep_row(&self, matched: u8) -> bool {
        match self {
            InputRetention::DropMatched => matched == 0,
            InputRetention::KeepAll => true,
            InputRetention::DropAll => false,
        }
    }

    /// Remove the rows that should not be stored.
    ///
    /// `match_idxs` is the bitmap filled by the transformation context and
    /// must have one entry per row.
    pub fn retain_rows(&self, rows: &mut Vec<MetricRow>, match_idxs: &[u8]) {
        debug_assert_eq!(rows.len(), match_idxs.len());
        match self {
            InputRetention::KeepAll => {}
            InputRetention::DropAll => rows.clear(),
            InputRetention::DropMatched => {
                let mut flags = match_idxs.iter();
                rows.retain(|_| flags.next().map_or(true, |&m| m == 0));
            }
        }
    }
}
