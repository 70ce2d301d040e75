//! TenderAcquire - tender synchronization and document acquisition.
//!
//! Ingests tender listings from government e-procurement portals, reconciles
//! them against persisted state, and orchestrates acquisition of the
//! associated documents (notices, zips, pre-bid docs, corrigenda, results).

pub mod browser;
pub mod captcha;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod services;
