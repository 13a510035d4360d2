//! Composite delivery: the relay bus, panel-to-panel links, and the
//! containers that drive them.

pub mod bus;
pub mod container;
pub mod peers;

pub use bus::{ChildRegistration, RelayBus, Routed};
pub use container::{CompositeView, FrameMounter, Layout, PanelManifest};
pub use peers::{LinkFilter, PeerRelay};
