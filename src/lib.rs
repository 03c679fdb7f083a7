//! Palette overlay pipeline for tiled pixel canvases.
//!
//! Learns an anchor position from the host's pixel-placement calls, snaps
//! uploaded images to the canvas palette, cuts them into tile-sized chunks
//! and sits in front of tile fetches so a compositor can draw over them.

#[macro_use]
pub mod logger;

pub mod capture;
pub mod cli;
pub mod config;
pub mod intercept;
pub mod io;
pub mod net;
pub mod ops;
pub mod palette;
pub mod project;
pub mod session;
pub mod store;
pub mod tiles;
