//! Data models for the forum.
//!
//! Wire shapes are camelCase JSON; storage rows are mapped in `db::repository`.

mod group;
mod post;
mod subscription;
mod thread;
mod topic;
mod user;

pub use group::*;
pub use post::*;
pub use subscription::*;
pub use thread::*;
pub use topic::*;
pub use user::*;
