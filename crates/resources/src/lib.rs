//! Resource Model
//!
//! Types shared by the API server client and the informer:
//! - `ObjectMeta` / `Resource`: identity, labels and resume token of a stored object
//! - `WatchEvent`: one change record of a watch stream
//! - `LabelSelector` / `ListOptions`: server-side and client-side filtering
//! - `core_v1`: concrete core/v1 kinds

pub mod core_v1;
pub mod event;
pub mod key;
pub mod list;
pub mod meta;
pub mod resource;
pub mod selector;

pub use core_v1::*;
pub use event::*;
pub use key::*;
pub use list::*;
pub use meta::*;
pub use resource::*;
pub use selector::*;
