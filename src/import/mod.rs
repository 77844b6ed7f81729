pub mod importer;
pub mod supervisor;
pub mod window;

pub use importer::{ImportSettings, ImportSummary, Importer};
pub use supervisor::supervise;
pub use window::windows_to_fetch;
