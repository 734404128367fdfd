// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod catalog;
pub mod column;
pub mod debounce;
pub mod editing;
pub mod factories;
pub mod filters;
pub mod focus;
pub mod grid;
pub mod ids;
pub mod keyboard;
pub mod paging;
pub mod prefs;
pub mod record;
pub mod sync;
pub mod table;
pub mod value;
pub mod virtual_rows;

pub use catalog::*;
pub use column::*;
pub use debounce::*;
pub use editing::*;
pub use factories::*;
pub use filters::*;
pub use focus::*;
pub use grid::*;
pub use ids::*;
pub use keyboard::*;
pub use paging::*;
pub use prefs::*;
pub use record::*;
pub use sync::*;
pub use table::*;
pub use value::*;
pub use virtual_rows::*;
