//! Wave scheduler (C4): partition accepted proposals into conflict-free
//! parallel waves using file/directory/package/symbol overlap
//! heuristics, plus structural-merge ordering for milestones.

mod conflict;
mod merge_predict;
mod partition;

pub use conflict::{conflict, Sensitivity};
pub use merge_predict::{classify_merge, MergeClass, SymbolRange};
pub use partition::partition_waves;

/// A minimal view of a proposal the wave scheduler needs: its changed
/// files, optional declared symbols (escape hatch), and category.
#[derive(Clone, Debug)]
pub struct WaveItem {
    pub id: String,
    pub files: Vec<String>,
    pub target_symbols: Option<Vec<String>>,
    pub category: String,
}
