//! Generic Attribute Profile application tree.
//!
//! An [`Application`] owns every service, characteristic, and descriptor
//! exported by the peripheral. Nodes are stored in an arena and addressed by
//! typed handles. Each node also has a fixed object path under the
//! application root, which is how the daemon addresses it.

pub use {app::*, flags::*, io::*};

mod app;
mod flags;
mod io;
mod node;
