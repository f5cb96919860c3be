//! Command handlers, one `impl Engine` block per command family

pub mod apps;
pub mod bulk;
pub mod images;
pub mod status;
pub mod tunnel;
