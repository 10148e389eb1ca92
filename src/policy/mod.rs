// src/policy/mod.rs

pub mod catalog;
pub mod evaluator;
pub mod predicate;
pub mod sql;
pub mod table;

pub use predicate::Predicate;
pub use table::PolicyTable;
