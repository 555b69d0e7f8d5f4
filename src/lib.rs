/*!
# Sheetdesk

A multi-user spreadsheet workspace: datasets with typed columns, several views per dataset,
and a pure pipeline that turns a view's rows into what the grid shows.

## Overview

Users create datasets (tables) and present them through views: grids that own their rows,
charts that read the first grid's rows, and dashboards of aggregate widgets. Every view keeps
its own filters, sorts, grouping and color rules. Rows can be imported from CSV, JSON or
Excel files and exported again as CSV, XLSX or JSON. Paid plans are billed through PayMongo.

## Architecture

### Row view pipeline
- **Technologies**: Rust, regex, chrono
- Search → rule filters → date range → sort → row colors → grouping → pagination
- Cell color rules are evaluated up front, since cell-color filters read their output
- Pure and total: unknown operators and missing columns are misses, never errors

### Workspace layer
- **Technologies**: tokio
- Immutable session state changed only through reducer actions
- Structural edits are written first and applied locally once acknowledged
- Cell edits are debounced per cell; color rule evaluation is debounced per view
- Client-local undo log of acknowledged actions; realtime refreshes are dropped while editing

### Backend facade
- Trait over the managed backend: tables, views, folders, shares, subscriptions
- In-memory implementation with ownership and share checks and a broadcast change feed
- Snapshots are gzip-compressed JSON

### HTTP layer
- **Technologies**: axum, tower-http, reqwest
- Payment intents, gateway webhooks, subscription cancel and reactivate
- View queries, charts, imports, exports and column deletion

## Modules

- **cell**: Tagged cell values, coercions and the sparse row record
- **rules**: Filter, sort and color rule types and their evaluation
- **pipeline**: The row view pipeline
- **spreadsheet**: Datasets, columns, views, folders, shares and undo actions
- **chart**: Chart series and dashboard widgets
- **session**: View-session state and its reducer
- **debounce**: Keyed trailing-edge debouncer
- **backend**: Backend traits and the in-memory backend
- **workspace**: Orchestration of edits, undo and realtime for one dataset
- **loader**: CSV, JSON and Excel parsing
- **importer**: Batched import of parsed rows into a view
- **downloader**: CSV, XLSX and JSON export
- **saving**: Backend snapshots
- **payments**: Payment intents, webhooks and subscription state
- **app**: Routing and handlers
- **config**: Server flags and environment
- **error**: API error type and its HTTP mapping
*/

pub mod backend;
pub mod cell;
pub mod chart;
pub mod debounce;
pub mod downloader;
pub mod importer;
pub mod loader;
pub mod payments;
pub mod pipeline;
pub mod rules;
pub mod saving;
pub mod session;
pub mod spreadsheet;
pub mod workspace;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod error;

pub use cell::{CellValue, ColumnType, Row};
pub use pipeline::{PipelineOutput, ViewConfig};
pub use spreadsheet::{Column, Dataset, View, ViewType};
