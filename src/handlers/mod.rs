// src/handlers/mod.rs

pub mod audit;
pub mod data;
