pub mod cache;
pub mod receipts;
