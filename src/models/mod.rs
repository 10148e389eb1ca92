// src/models/mod.rs

pub mod audit;
pub mod context;
pub mod policy;
pub mod tenancy;
