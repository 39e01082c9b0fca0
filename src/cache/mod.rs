pub(crate) mod snapshot;

pub use snapshot::{clear_snapshot, load_snapshot, save_snapshot, ShelfSnapshot};
