//! Query result sets
//!
//! The in-memory hash-keyed result-set layer: the physical layout
//! descriptor, raw entry storage, typed row iteration and sorting, and the
//! pairwise aggregation reduce that folds partial result sets together.

pub mod descriptor;
pub mod dictionary;
pub mod reduce;
pub mod result_set;

pub use descriptor::{
    advance_slot, AggKind, ColWidths, GroupByHashType, OrderEntry, QueryMemoryDescriptor,
    TargetInfo, EMPTY_KEY_64, INIT_SENTINEL,
};
pub use dictionary::StringDictionary;
pub use reduce::ResultSetManager;
pub use result_set::{ResultSet, ResultSetStorage, TargetValue};
