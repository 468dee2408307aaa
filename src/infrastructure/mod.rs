pub mod csv_ledger;
pub mod mock;
pub mod persistence;

pub use csv_ledger::{load_ledger_csv, save_ledger_csv};
pub use mock::{SimulatedBacktestExecutor, TracingProgressSink};
pub use persistence::{JsonFileIterationStore, MemoryIterationStore};
