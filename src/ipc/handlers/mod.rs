pub mod core;
pub mod counter;
pub mod import_csv;
pub mod packages;
pub mod players;
pub mod programs;
pub mod reference;
pub mod registrations;
