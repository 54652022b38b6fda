//! # apivault
//!
//! Versioned storage for OpenAPI and Swagger schema documents.
//!
//! Clients upload a JSON or YAML schema for an application (optionally
//! scoped to one of its services). apivault validates the document, decides
//! whether it differs from the latest stored version, and if so records it
//! as the next version: a database row plus an artifact file on disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ HTTP / CLI │──▶│   SchemaRegistry     │──▶│  SQLite    │
//! │  (axum)    │   │ parse → validate →   │   │ catalog +  │
//! └────────────┘   │ metadata → version   │   │ versions   │
//!                  └──────────┬───────────┘   └────────────┘
//!                             ▼
//!                      ┌────────────┐
//!                      │ Artifacts  │
//!                      │ (files)    │
//!                      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! apivault init                                   # create database
//! apivault upload petstore.yaml --app shop        # store version 1
//! apivault versions shop                          # list history
//! apivault serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`canonical`] | Order-independent canonical form for change detection |
//! | [`metadata`] | Structural summary of a schema document |
//! | [`validator`] | Parsing and structural validation |
//! | [`versions`] | Version allocation and latest-pointer transitions |
//! | [`artifact`] | On-disk artifact storage |
//! | [`catalog`] | Application and service records |
//! | [`registry`] | Upload orchestration and queries |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI entry points |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod artifact;
pub mod canonical;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod server;
pub mod validator;
pub mod versions;
