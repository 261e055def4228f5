//! Wire objects for the trackbell HTTP front-end API.
//!
//! These types are shared by the server and by chat adapters that drive it.

pub mod objects;
