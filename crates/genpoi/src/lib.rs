//! Point-of-interest extraction for Anvil worlds.
//!
//! Scans the chunks of each configured region set, classifies the tile
//! entities, entities, players and manual POIs through user filters, and
//! writes the `markersDB.js`, `markers.js` and `baseMarkers.js` scripts the
//! map viewer loads.

pub mod bucket;
pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod markers;
pub mod output;
pub mod pipeline;
pub mod players;
pub mod poi;
pub mod world;

pub use error::{Error, Result};
