pub mod commands;
pub mod output;
pub mod registers;
pub mod registry;
pub mod session;
pub mod state;
pub mod timeprogram;
pub mod values;
