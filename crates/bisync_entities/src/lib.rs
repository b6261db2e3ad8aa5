//! # bisync Entities
//!
//! Typed administration entities synchronized by the bisync engine.
//!
//! This crate provides:
//! - [`Entity`]: a generic handle (type, id, field state, shared engine)
//! - [`EntityType`]: schema plus creation, deletion and listing capabilities
//! - [`User`], [`UserGroup`], [`SecurityRole`] and [`Fence`] with their
//!   schemas, typed field constants and domain operations
//!
//! ## Example
//!
//! ```no_run
//! use bisync_engine::{MockSession, SyncConfig, SyncEngine};
//! use bisync_entities::User;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(SyncEngine::new(
//!     SyncConfig::new("11.3.0800".parse().unwrap()),
//!     MockSession::new(),
//! ));
//! let mut user = User::new(engine, "54F3D26011D2896560009A8E67019608");
//! let _ = user.full_name();
//! let _ = user.add_to_user_groups(["E96685CD4E60068559F7DFAC7C2AA851"]);
//! ```
//!
//! ## Key Invariants
//!
//! - Field values are fetched on first access and cached afterwards
//! - Setters only mark fields dirty; `flush` sends them
//! - Collection operations are sent immediately and skip no-op members

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod fence;
mod security_role;
mod user;
mod user_group;

pub use entity::{create, list, Entity, EntityType};
pub use fence::{Fence, FenceChanges, FenceType, NewFence, FENCE, FENCE_MIN_VERSION};
pub use security_role::{SecurityRole, SECURITY_ROLE};
pub use user::{Address, NewUser, User, UserChanges, USER};
pub use user_group::{NewUserGroup, UserGroup, USER_GROUP};
