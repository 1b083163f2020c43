//! AutoOrtho: a synthetic, on-demand filesystem over flight-simulator
//! scenery that discovers which orthoimagery tiles a scenery descriptor
//! references and ensures those tiles materialize before (or shortly
//! after) the simulator reads them.
//!
//! The crate is organized around the four core components: the Tile
//! Cache ([`cache`]), the DSF Parser/Prefetch ([`dsf`]), the Read-Path
//! Policy Engine ([`policy`]), and the Flight Follower ([`flight`]). The
//! Mount Adapter ([`mount`]) wires these into a [`fuser`] filesystem.

pub mod cache;
pub mod config;
pub mod coord;
pub mod dsf;
pub mod error;
pub mod flight;
pub mod mount;
pub mod policy;
pub mod renderer;
pub mod tile_key;

pub use cache::TileCache;
pub use config::{default_log_dir, AutoOrthoConfig};
pub use flight::FlightFollower;
pub use mount::AutoOrthoFs;
pub use renderer::{PlaceholderRenderer, TileRenderer};
pub use tile_key::TileKey;
