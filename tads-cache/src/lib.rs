//! Object memory cache for the TADS 2 runtime.
//!
//! The cache keeps variable-sized binary objects in a small number of
//! fixed-size heap chunks. Objects are named by 16-bit object numbers.
//! When the chunks fill up, the cache first compacts them, sliding movable
//! objects together to merge free space, and then evicts the least recently
//! used objects, writing them to a swap file or dropping them if they can be
//! re-read from where they were originally loaded.
//!
//! # Layers
//!
//! The [global context][`GlobalContext`] owns all memory and all object
//! descriptors. It works on global object numbers and exposes explicit
//! lock and unlock primitives.
//!
//! A [client context][`ClientContext`] gives a subsystem its own dense
//! numbering on top of a shared global context, supplies the callbacks for
//! loading objects from their original source, and hands out
//! [object guards][`ObjectGuard`] that unlock when dropped.
//!
//! # Locking
//!
//! An object's bytes may only move or leave memory while nobody holds a lock
//! on it. Accessors re-derive the location of the bytes from the descriptor
//! on every call, so no reference into the heap outlives a lock.

#![warn(missing_docs)]

pub use self::{
    client::*,
    config::*,
    error::*,
    global::{Descriptor, GlobalContext, LoadFn, LoadHandle, ObjFlags, Stats},
    objnum::*,
    swap::*,
};

mod chunk;
mod client;
mod config;
mod error;
mod global;
mod heap;
mod objnum;
mod swap;
