#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::enum_variant_names, clippy::type_complexity)]

pub mod authors;
pub mod cli;
pub mod concurrency;
pub mod errors;
pub mod git;
pub mod migrate;
pub mod paths;
pub mod term_out;
pub mod tfvc;
pub mod topo_sort;

pub(crate) type FHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub(crate) type FHashSet<T> = rustc_hash::FxHashSet<T>;
