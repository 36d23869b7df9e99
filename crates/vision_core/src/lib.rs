//! vision_core: overlay helpers shared by training visualizers.

pub mod overlay;

pub mod prelude {
    pub use crate::overlay::*;
}
