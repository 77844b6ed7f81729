pub mod decline_report;
pub mod import_assets;
