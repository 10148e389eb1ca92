// src/common/mod.rs

pub mod db_utils;
pub mod error;
