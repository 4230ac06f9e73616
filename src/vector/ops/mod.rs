//! Layer set operations
//!
//! Overlay of a layer with a method layer, written into a result layer. The geometry
//! work is done by the engine; these methods only pass the layers through and report
//! failures.

mod set;
